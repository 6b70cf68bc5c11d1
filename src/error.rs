use std::error::Error as StdError;
use std::sync::Arc;

/// Boxed error type accepted from transports, proxy functions and redirect policies.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Error type returned by this crate.
#[derive(Clone, Debug, thiserror::Error)]
pub enum HttpError {
    /// Network, TLS, redirect or body error from the underlying transport.
    #[error("transport error: {0}")]
    Transport(Arc<dyn StdError + Send + Sync>),
    /// Synthesized from a response status that signals server-side trouble.
    #[error("unexpected HTTP status {status}")]
    UnexpectedStatus { status: u16 },
    /// The call context was cancelled.
    #[error("request cancelled")]
    Cancelled,
    /// The call context deadline passed.
    #[error("request deadline exceeded")]
    DeadlineExceeded,
    /// Invalid client or transport configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Response decoding error.
    #[error("decode error: {0}")]
    Decode(String),
}

impl HttpError {
    /// Wraps any transport-level failure.
    pub fn transport<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Transport(Arc::new(err))
    }

    /// Wraps an already boxed transport failure.
    pub fn transport_boxed(err: BoxError) -> Self {
        Self::Transport(Arc::from(err))
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns `true` for context cancellation and deadline errors.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Returns the underlying `reqwest` error when this is a transport failure raised by it.
    pub fn as_reqwest(&self) -> Option<&reqwest::Error> {
        match self {
            Self::Transport(source) => {
                let source: &(dyn StdError + 'static) = source.as_ref();
                source.downcast_ref::<reqwest::Error>()
            }
            _ => None,
        }
    }

    /// Returns `true` when the transport failure was a timeout inside `reqwest`.
    pub fn is_timeout(&self) -> bool {
        self.as_reqwest().is_some_and(reqwest::Error::is_timeout)
    }

    /// Iterates the display messages of this error and all of its sources.
    pub(crate) fn messages(&self) -> Vec<String> {
        let mut messages = vec![self.to_string()];
        if let Self::Transport(source) = self {
            let root: &(dyn StdError + 'static) = source.as_ref();
            let mut current = Some(root);
            while let Some(err) = current {
                messages.push(err.to_string());
                current = err.source();
            }
        }
        messages
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        Self::transport(err)
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::HttpError;

    #[test]
    fn messages_include_source_chain() {
        let err = HttpError::transport(io::Error::new(
            io::ErrorKind::Other,
            "stopped after 10 redirects",
        ));
        let messages = err.messages();
        assert_eq!(messages[0], "transport error: stopped after 10 redirects");
        assert!(messages.iter().any(|m| m == "stopped after 10 redirects"));
    }

    #[test]
    fn cancellation_errors_are_flagged() {
        assert!(HttpError::Cancelled.is_cancellation());
        assert!(HttpError::DeadlineExceeded.is_cancellation());
        assert!(!HttpError::UnexpectedStatus { status: 500 }.is_cancellation());
    }
}
