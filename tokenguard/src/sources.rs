//! Identity provider contracts and implementations

use async_trait::async_trait;

use crate::{error::ProviderError, Token};

#[cfg(feature = "oauth2")]
pub mod oauth2;

/// A source of freshly issued tokens
///
/// The manager only ever talks to the authority through this one
/// operation. Implementations must tolerate being invoked while a prior
/// invocation is still running: a call that exceeds the manager's request
/// budget is abandoned, not cancelled, and the next attempt may start
/// before the abandoned one finishes.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Requests a new token from the identity authority
    async fn request_token(&self) -> Result<Token, ProviderError>;
}

#[async_trait]
impl<P: IdentityProvider + ?Sized> IdentityProvider for std::sync::Arc<P> {
    async fn request_token(&self) -> Result<Token, ProviderError> {
        (**self).request_token().await
    }
}
