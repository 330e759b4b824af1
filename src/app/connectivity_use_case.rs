use crate::app::ports::{HttpClientPort, HttpFailureKind};
use crate::error::{Result, TaxrefError};
use std::sync::Arc;
use tracing::{info, warn};

/// Pre-flight probe run before any batch starts
pub struct ConnectivityCheck {
    http: Arc<dyn HttpClientPort>,
    probe_url: String,
}

impl ConnectivityCheck {
    pub fn new(http: Arc<dyn HttpClientPort>, probe_url: impl Into<String>) -> Self {
        Self {
            http,
            probe_url: probe_url.into(),
        }
    }

    /// Ok only for a 2xx/3xx answer. A 5xx means the network works but the
    /// remote side is down; any other status is a transport failure.
    pub async fn check(&self) -> Result<()> {
        match self.http.get(&self.probe_url).await {
            Ok(response) if response.is_reachable() => {
                info!("Connectivity OK ({} -> {})", self.probe_url, response.status);
                Ok(())
            }
            Ok(response) if response.is_service_unavailable() => {
                warn!("Probe {} answered HTTP {}", self.probe_url, response.status);
                Err(TaxrefError::ServiceUnavailable { status: response.status })
            }
            Ok(response) => {
                warn!("Probe {} answered HTTP {}", self.probe_url, response.status);
                Err(TaxrefError::Transport(format!("probe answered HTTP {}", response.status)))
            }
            Err(failure) if failure.kind == HttpFailureKind::Connect => {
                warn!("No connectivity: {}", failure);
                Err(TaxrefError::Connectivity(failure.message))
            }
            Err(failure) => Err(TaxrefError::Transport(failure.message)),
        }
    }
}
