//! API-key authentication for the HTTP endpoint.

use crate::error::{Result, WorkerError};

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Environment variable holding the server-side secret.
pub const API_KEY_ENV: &str = "API_KEY";

/// The server-held secret callers must present.
///
/// `Debug` is redacted so the key never ends up in logs.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a secret.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Config`] if the secret is empty; an empty key
    /// would let a request with an empty header through.
    pub fn new(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(WorkerError::Config("API key must not be empty".into()));
        }
        Ok(Self(secret))
    }

    /// Read the secret from the `API_KEY` environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Config`] if the variable is unset or empty.
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var(API_KEY_ENV)
            .map_err(|_| WorkerError::Config(format!("{API_KEY_ENV} is not set")))?;
        Self::new(secret)
    }

    /// Whether `presented` matches the secret byte for byte.
    ///
    /// A missing header never matches. The comparison does not short-circuit
    /// on the first differing byte.
    pub fn matches(&self, presented: Option<&[u8]>) -> bool {
        let Some(presented) = presented else {
            return false;
        };
        let expected = self.0.as_bytes();
        if presented.len() != expected.len() {
            return false;
        }
        expected
            .iter()
            .zip(presented)
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}
