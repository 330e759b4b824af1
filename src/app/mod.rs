pub mod ports;
pub mod connectivity_use_case;
pub mod enrich_use_case;
