//! The completion-provider seam between the engine and the model backend.
//!
//! The queue never cares which backend produced a summary; it sees one
//! prompt in and one string out. Every error variant is treated as
//! transient by the retry machinery: retry with backoff, fall back to the
//! brief prompt, then drop the unit without a record.

use async_trait::async_trait;
use thiserror::Error;

/// Errors a provider implementation may surface.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("API key not configured")]
    NoApiKey,

    #[error("network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to parse provider response: {0}")]
    Parse(String),

    #[error("invalid provider configuration: {0}")]
    Config(String),
}

impl From<completions::Error> for ProviderError {
    fn from(err: completions::Error) -> Self {
        match err {
            completions::Error::NoApiKey => ProviderError::NoApiKey,
            completions::Error::Network(message) => ProviderError::Network(message),
            completions::Error::Api { status, message } => ProviderError::Api { status, message },
            completions::Error::Parse(message) => ProviderError::Parse(message),
            completions::Error::Config(message) => ProviderError::Config(message),
        }
    }
}

/// One prompt in, one completion out. Implementations must tolerate being
/// called repeatedly with the same prompt; the retry wrapper will.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

#[async_trait]
impl CompletionProvider for completions::Client {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let request = completions::Request::new(vec![completions::Message::user(prompt)]);
        let response = self.complete(request).await?;
        Ok(response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_map_across() {
        let mapped = ProviderError::from(completions::Error::Api {
            status: 429,
            message: "rate limited".into(),
        });
        assert!(matches!(mapped, ProviderError::Api { status: 429, .. }));

        let mapped = ProviderError::from(completions::Error::NoApiKey);
        assert!(matches!(mapped, ProviderError::NoApiKey));
    }

    #[test]
    fn test_error_display() {
        let err = ProviderError::Api {
            status: 500,
            message: "upstream".into(),
        };
        assert_eq!(err.to_string(), "API error (status 500): upstream");
    }
}
