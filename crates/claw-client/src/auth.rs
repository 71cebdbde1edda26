//! Credential lookup for authenticated requests

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Supplies the bearer token for requests. Storage is up to the implementor.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current token, or `None` when the user is signed out
    async fn token(&self) -> Option<String>;
}

/// A fixed token (or none)
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Reads the token from an environment variable on every request
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl CredentialProvider for EnvToken {
    async fn token(&self) -> Option<String> {
        std::env::var(&self.var).ok().filter(|t| !t.is_empty())
    }
}

/// Whether an endpoint needs a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPolicy {
    /// Fail with [`Error::Unauthorized`] before sending if no token is available
    Required,
    /// Send the token if there is one, otherwise go unauthenticated
    Optional,
}

impl AuthPolicy {
    /// Apply the policy to a looked-up token
    pub fn resolve(self, token: Option<String>) -> Result<Option<String>> {
        match (self, token) {
            (AuthPolicy::Required, None) => Err(Error::Unauthorized),
            (_, token) => Ok(token),
        }
    }
}
