use std::{
    error,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use crate::{
    error::{DispatchError, ProviderFailure},
    sources::IdentityProvider,
    Token,
};

/// Runs provider calls off the scheduler task with an enforced wall-clock
/// timeout.
///
/// Calls execute as their own runtime task so a hung provider never
/// occupies the renewal timer: after a timeout the next attempt can be
/// dispatched promptly while the old call drains in the background.
pub(crate) struct Dispatcher {
    provider: Arc<dyn IdentityProvider>,
    timeout: Duration,
    last_error: Arc<Mutex<Option<ProviderFailure>>>,
}

impl Dispatcher {
    pub(crate) fn new(provider: Arc<dyn IdentityProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    /// The most recent failure the provider itself reported
    ///
    /// Distinct from a timeout: a timed-out call that never returned leaves
    /// nothing here. Used to enrich terminal failure diagnostics.
    pub(crate) fn last_error(&self) -> Option<ProviderFailure> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Executes one provider call, failing with [`DispatchError::Timeout`]
    /// if it does not complete within the configured budget.
    ///
    /// A timed-out call keeps running detached; if it completes later its
    /// result is discarded rather than applied retroactively.
    pub(crate) async fn request_token(&self) -> Result<Token, DispatchError> {
        let provider = Arc::clone(&self.provider);
        let last_error = Arc::clone(&self.last_error);

        let call = tokio::spawn(async move {
            *last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
            match provider.request_token().await {
                Ok(token) => Ok(token),
                Err(err) => {
                    let failure = ProviderFailure::new(err);
                    tracing::error!(
                        error = (&failure as &dyn error::Error),
                        "request to identity provider failed"
                    );
                    *last_error.lock().unwrap_or_else(PoisonError::into_inner) =
                        Some(failure.clone());
                    Err(failure)
                }
            }
        });

        match tokio::time::timeout(self.timeout, call).await {
            Err(_elapsed) => Err(DispatchError::Timeout(self.timeout)),
            Ok(Err(join_err)) => Err(DispatchError::Provider(ProviderFailure::new(Box::new(
                join_err,
            )))),
            Ok(Ok(Ok(token))) => Ok(token),
            Ok(Ok(Err(failure))) => Err(DispatchError::Provider(failure)),
        }
    }
}
