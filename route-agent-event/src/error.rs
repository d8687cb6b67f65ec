use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of a failed handler call, deciding whether the event is redelivered.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0}")]
    Retryable(BoxError),

    #[error("{0}")]
    Fatal(BoxError),
}

impl HandlerError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("handler {handler} failed to initialize: {source}")]
    Init {
        handler: &'static str,
        source: HandlerError,
    },

    #[error("handler {handler} hit an unrecoverable error processing {event}: {source}")]
    Fatal {
        handler: &'static str,
        event: String,
        source: HandlerError,
    },
}
