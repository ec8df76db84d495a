use crate::ip::address::Ipv4Addr;

/// Unified error taxonomy for the engine, matching the failure kinds the
/// ingress and API paths can produce.
#[derive(Debug, thiserror::Error)]
pub enum TcpError {
    #[error("malformed segment: {0}")]
    Malformed(&'static str),

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error("resource exhausted: {0}")]
    Exhausted(&'static str),

    #[error("no PCB for handle")]
    NotFound,

    #[error("blocking call interrupted")]
    Interrupted,

    #[error("connection reset by peer")]
    Reset,

    #[error("no route to {0}")]
    NoRoute(Ipv4Addr),

    #[error("failed to transmit via IP: {0}")]
    FatalTx(&'static str),
}

pub type Result<T> = std::result::Result<T, TcpError>;
