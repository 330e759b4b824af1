pub mod http_client;
pub mod progress;

pub use http_client::ReqwestHttp;
pub use progress::ConsoleProgressReporter;
