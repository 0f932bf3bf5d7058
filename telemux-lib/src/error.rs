#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("malformed descriptor: {reason}: {token:?}")]
    MalformedDescriptor { token: String, reason: String },
    #[error("unknown transport {0:?}")]
    UnknownTransport(String),
    #[error("unknown format {0:?}")]
    UnknownFormat(String),
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("at least one output channel is required")]
    NoOutputs,
    #[error("too many output channels: {count} (max {max})")]
    TooManyOutputs { count: usize, max: usize },

    /// Transport failure on the active input with no failover left to try.
    #[error("input channel failed: {0}")]
    InputFailed(String),
    #[error("every output channel has failed")]
    OutputsFailed,
    #[error("engine already stopped")]
    Stopped,
}

impl Error {
    pub(crate) fn malformed(token: impl Into<String>, reason: impl Into<String>) -> Error {
        Error::MalformedDescriptor {
            token: token.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
