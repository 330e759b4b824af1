use async_trait::async_trait;

#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpGetResult, HttpFailure>;
}

#[derive(Clone, Debug)]
pub struct HttpGetResult {
    pub status: u16,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl HttpGetResult {
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    pub fn is_service_unavailable(&self) -> bool {
        (500..=599).contains(&self.status)
    }

    /// 2xx, or a redirect the client did not follow
    pub fn is_reachable(&self) -> bool {
        (200..=399).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpFailureKind {
    /// DNS or TCP/TLS connection could not be established
    Connect,
    Timeout,
    Other,
}

#[derive(Clone, Debug)]
pub struct HttpFailure {
    pub kind: HttpFailureKind,
    pub message: String,
}

impl HttpFailure {
    pub fn new(kind: HttpFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Fire-and-forget sink for batch progress
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, completed: usize, total: usize);
    fn on_finished(&self);
}
