//! Background token management and renewal for network clients
//!
//! This library keeps a client continuously supplied with a fresh,
//! non-expired authentication token. A [`TokenManager`] calls out to a
//! pluggable [`IdentityProvider`], schedules the next renewal ahead of
//! expiry, retries failed attempts on a fixed delay, and notifies a
//! [`TokenListener`] of every renewal and of terminal failure. Consumers
//! such as database drivers can rely on [`TokenManager::current_token`]
//! always holding the freshest credential without being aware that
//! renewals are happening at all.
//!
//! Renewal timing is governed by two independent safety margins: a
//! fraction of the token's lifetime (`expiration_refresh_ratio`) and a
//! fixed floor before its expiry (`lower_refresh_bound`). Whichever says
//! to renew sooner wins, so a short-lived token is refreshed early in its
//! life while a long-lived one is still refreshed comfortably before the
//! deadline. Provider calls run under a wall-clock budget on their own
//! runtime task; a hung authority costs one failed attempt, never a
//! stalled manager.
//!
//! # Getting started
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokenguard::{Token, TokenAuthConfig, TokenListener, TokenManager};
//!
//! struct LogListener;
//!
//! impl TokenListener for LogListener {
//!     fn on_token_renewed(&self, token: &Token) {
//!         tracing::info!(expires_at = token.expires_at().0, "token renewed");
//!     }
//!
//!     fn on_error(&self, error: &tokenguard::Error) {
//!         tracing::error!(%error, "token renewal failed terminally");
//!     }
//! }
//!
//! # async fn run(provider: Arc<dyn tokenguard::IdentityProvider>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = TokenAuthConfig::builder()
//!     .expiration_refresh_ratio(0.8)
//!     .lower_refresh_bound_millis(2 * 60 * 1000)
//!     .identity_provider(provider)
//!     .build()?;
//!
//! let manager = TokenManager::new(
//!     config.identity_provider(),
//!     config.token_manager_config().clone(),
//! );
//!
//! // Block until the first token is available, however many retries
//! // that takes.
//! let first = manager.start(LogListener, true).await?;
//! tracing::info!(token = format_args!("{:#?}", first.unwrap().value()), "first token");
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! * `oauth2` (default): provides [`sources::oauth2`], an identity
//!   provider implementing the OAuth2 client credentials flow over HTTP.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod sources;

mod braids;
mod config;
mod dispatcher;
mod error;
mod listener;
mod manager;
mod scheduler;
mod tokens;

pub use braids::*;
pub use config::{
    MissingIdentityProvider, RetryPolicy, TokenAuthConfig, TokenAuthConfigBuilder,
    TokenManagerConfig,
};
pub use error::{Error, ProviderError, ProviderFailure};
pub use listener::TokenListener;
pub use manager::TokenManager;
pub use sources::IdentityProvider;
pub use tokens::Token;
