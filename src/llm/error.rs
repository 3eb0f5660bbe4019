// Error taxonomy shared by the resolver, the provider adapters and the relay.
//
// Nothing here is retried or swallowed; callers decide what to show the user.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    /// The resolver could not map a user token to a provider and model.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// A hosted vendor was selected but no credential is configured for it.
    #[error("missing credential for {vendor}: {hint}")]
    MissingCredential { vendor: String, hint: String },

    /// DNS, connect, timeout or mid-body read failure.
    #[error("{vendor} transport error: {message}")]
    Transport { vendor: String, message: String },

    /// The vendor answered with a non-success status.
    #[error("{vendor} API error ({status}): {body}")]
    Provider {
        vendor: String,
        status: u16,
        body: String,
    },

    /// The vendor answered, but not in the shape the adapter expects.
    #[error("{vendor} returned an unexpected response: {message}")]
    Decode { vendor: String, message: String },

    /// The request-scoped cancellation token fired.
    #[error("request cancelled")]
    Cancelled,

    /// Writing to the output sink failed.
    #[error("output error: {0}")]
    Output(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LlmError>;

impl LlmError {
    pub fn missing_credential(vendor: &str, hint: impl Into<String>) -> Self {
        Self::MissingCredential {
            vendor: vendor.to_string(),
            hint: hint.into(),
        }
    }

    pub fn transport(vendor: &str, err: impl std::fmt::Display) -> Self {
        Self::Transport {
            vendor: vendor.to_string(),
            message: err.to_string(),
        }
    }

    pub fn decode(vendor: &str, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            vendor: vendor.to_string(),
            message: err.to_string(),
        }
    }

    /// HTTP status carried by a `Provider` error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Provider { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_unknown_model() {
        let err = LlmError::UnknownModel("unknown-token-xyz".into());
        assert_eq!(err.to_string(), "unknown model: unknown-token-xyz");
    }

    #[test]
    fn display_provider_error() {
        let err = LlmError::Provider {
            vendor: "openai".into(),
            status: 401,
            body: "bad key".into(),
        };
        assert_eq!(err.to_string(), "openai API error (401): bad key");
        assert_eq!(err.status(), Some(401));
    }

    #[test]
    fn display_missing_credential() {
        let err = LlmError::missing_credential("groq", "set GROQ_API_KEY");
        assert_eq!(err.to_string(), "missing credential for groq: set GROQ_API_KEY");
        assert_eq!(err.status(), None);
    }

    #[test]
    fn io_error_converts_to_output() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: LlmError = io.into();
        assert!(matches!(err, LlmError::Output(_)));
    }
}
