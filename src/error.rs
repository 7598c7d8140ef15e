use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("missing resource: {0}")]
    MissingResource(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pcap error: {0}")]
    Pcap(#[from] pcap::Error),

    #[error("runtime invariant violated: {0}")]
    RuntimeInvariant(String),
}

pub type Result<T> = std::result::Result<T, SimError>;
