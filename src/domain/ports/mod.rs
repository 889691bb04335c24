mod connection_handler;
mod metrics_backend;

pub use connection_handler::ConnectionHandler;
pub use metrics_backend::MetricsBackend;
