//! Failures raised by the token manager

use std::{error::Error as StdError, fmt, sync::Arc, time::Duration};

use thiserror::Error;

/// The error type identity providers may fail with
pub type ProviderError = Box<dyn StdError + Send + Sync + 'static>;

/// A shared, cloneable failure reported by an identity provider
///
/// One renewal failure may need to reach several parties at once: the
/// listener, a caller blocked on the initial token, and the diagnostic
/// record kept by the dispatcher. Sharing the underlying error makes the
/// clone cheap.
#[derive(Debug, Clone)]
pub struct ProviderFailure(Arc<dyn StdError + Send + Sync + 'static>);

impl ProviderFailure {
    pub(crate) fn new(error: ProviderError) -> Self {
        Self(Arc::from(error))
    }

    /// The error as reported by the identity provider
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.0
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl StdError for ProviderFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

/// An error produced while dispatching a single provider call
///
/// These are absorbed by the retry policy until the budget runs out, at
/// which point they are wrapped into a terminal [`Error`].
#[derive(Debug, Clone, Error)]
pub(crate) enum DispatchError {
    /// The provider call did not return within the allotted time
    #[error("identity provider request timed out after {0:?}")]
    Timeout(Duration),
    /// The provider call itself failed
    #[error("identity provider request failed")]
    Provider(#[source] ProviderFailure),
}

/// Terminal failures surfaced by the token manager
///
/// Transient failures within the retry budget never appear here; they only
/// drive retries. A terminal failure is delivered exactly once to the
/// listener and to any caller still blocked waiting for the initial token.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The manager's one-shot `start` was invoked a second time
    #[error("token manager already started")]
    AlreadyStarted,

    /// Retries were exhausted and the final attempt timed out
    ///
    /// If the provider reported a failure of its own before the timeout
    /// fired, it is carried here for diagnostics. It is absent when the
    /// provider simply never returned.
    #[error(
        "token request/renewal failed: identity provider request timed out after {timeout:?}{}",
        fmt_provider_error(.provider_error)
    )]
    RequestTimeout {
        /// The configured per-attempt deadline that was exceeded
        timeout: Duration,
        /// The last failure the provider itself reported, if any
        provider_error: Option<ProviderFailure>,
    },

    /// Retries were exhausted and the final attempt failed in the provider
    #[error("token request/renewal failed")]
    Renewal {
        /// The failure reported by the identity provider
        #[source]
        cause: ProviderFailure,
    },
}

impl Error {
    /// The failure the identity provider itself reported, when one exists
    pub fn provider_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            Error::AlreadyStarted => None,
            Error::RequestTimeout { provider_error, .. } => {
                provider_error.as_ref().map(ProviderFailure::inner)
            }
            Error::Renewal { cause } => Some(cause.inner()),
        }
    }
}

fn fmt_provider_error(provider_error: &Option<ProviderFailure>) -> String {
    match provider_error {
        Some(err) => format!("; identity provider reported: {}", err),
        None => String::new(),
    }
}
