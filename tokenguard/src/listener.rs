use std::sync::Arc;

use crate::{Error, Token};

/// A sink for token lifecycle notifications
///
/// Callbacks are invoked serially, in the order renewal attempts complete,
/// from the manager's renewal task. Implementations should return quickly;
/// a slow callback delays the next scheduled renewal.
pub trait TokenListener: Send + Sync {
    /// Called with each freshly renewed token
    fn on_token_renewed(&self, token: &Token);

    /// Called exactly once when renewal fails terminally
    ///
    /// After this the manager schedules no further attempts.
    fn on_error(&self, error: &Error);
}

impl<L: TokenListener + ?Sized> TokenListener for Arc<L> {
    fn on_token_renewed(&self, token: &Token) {
        (**self).on_token_renewed(token)
    }

    fn on_error(&self, error: &Error) {
        (**self).on_error(error)
    }
}
