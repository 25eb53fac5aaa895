use std::{fmt, sync::Arc};

use thiserror::Error;
use tokenguard_clock::DurationMillis;

use crate::sources::IdentityProvider;

/// Retry behavior for failed renewal attempts
///
/// Backoff is flat: a fixed delay between attempts, no jitter, no
/// exponential growth. A hung or failing authority is bounded by the
/// attempt budget instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: DurationMillis,
}

impl RetryPolicy {
    /// Constructs a policy allowing `max_attempts` retries after the first
    /// failed attempt, spaced `delay` apart
    pub fn new(max_attempts: u32, delay: DurationMillis) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Retries allowed after the first failed attempt before giving up
    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Fixed delay between retries
    #[inline]
    pub fn delay(&self) -> DurationMillis {
        self.delay
    }
}

impl Default for RetryPolicy {
    /// Five retries, 100 ms apart
    fn default() -> Self {
        Self::new(5, DurationMillis(100))
    }
}

/// Tuning for the token manager's renewal scheduling
#[derive(Clone, Debug)]
pub struct TokenManagerConfig {
    expiration_refresh_ratio: f64,
    lower_refresh_bound: DurationMillis,
    token_request_exec_timeout: DurationMillis,
    retry_policy: RetryPolicy,
}

impl TokenManagerConfig {
    /// Constructs a new configuration
    pub fn new(
        expiration_refresh_ratio: f64,
        lower_refresh_bound: DurationMillis,
        token_request_exec_timeout: DurationMillis,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            expiration_refresh_ratio,
            lower_refresh_bound,
            token_request_exec_timeout,
            retry_policy,
        }
    }

    /// The ratio of a token's lifetime at which a renewal is triggered
    ///
    /// A value of 0.75 means the token is renewed once 75% of its lifetime
    /// has elapsed (25% remains).
    #[inline]
    pub fn expiration_refresh_ratio(&self) -> f64 {
        self.expiration_refresh_ratio
    }

    /// A fixed floor before expiry at which renewal must start, regardless
    /// of the token's total lifetime
    ///
    /// Zero disables the floor, leaving the refresh ratio in sole control.
    #[inline]
    pub fn lower_refresh_bound(&self) -> DurationMillis {
        self.lower_refresh_bound
    }

    /// The maximum time one provider call may take before it is counted as
    /// a failed attempt
    #[inline]
    pub fn token_request_exec_timeout(&self) -> DurationMillis {
        self.token_request_exec_timeout
    }

    /// The retry policy for failed renewal attempts
    #[inline]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }
}

impl Default for TokenManagerConfig {
    /// Production defaults: renew at 80% of the token lifetime or two
    /// minutes before expiry, whichever comes first; one-second provider
    /// call budget; five retries 100 ms apart
    fn default() -> Self {
        Self::new(
            0.8,
            DurationMillis(2 * 60 * 1000),
            DurationMillis(1_000),
            RetryPolicy::default(),
        )
    }
}

/// A fully wired authentication configuration: manager tuning plus the
/// identity provider to renew tokens against
#[derive(Clone)]
pub struct TokenAuthConfig {
    token_manager_config: TokenManagerConfig,
    identity_provider: Arc<dyn IdentityProvider>,
}

impl TokenAuthConfig {
    /// Starts building a configuration from the defaults
    pub fn builder() -> TokenAuthConfigBuilder {
        TokenAuthConfigBuilder::default()
    }

    /// The manager tuning
    #[inline]
    pub fn token_manager_config(&self) -> &TokenManagerConfig {
        &self.token_manager_config
    }

    /// The identity provider tokens are requested from
    #[inline]
    pub fn identity_provider(&self) -> Arc<dyn IdentityProvider> {
        Arc::clone(&self.identity_provider)
    }
}

impl fmt::Debug for TokenAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenAuthConfig")
            .field("token_manager_config", &self.token_manager_config)
            .finish_non_exhaustive()
    }
}

/// The builder was finished without an identity provider
#[derive(Debug, Error)]
#[error("an identity provider is required to build a TokenAuthConfig")]
pub struct MissingIdentityProvider;

/// Builder for [`TokenAuthConfig`]
#[derive(Default)]
pub struct TokenAuthConfigBuilder {
    expiration_refresh_ratio: Option<f64>,
    lower_refresh_bound_millis: Option<u64>,
    token_request_exec_timeout_in_ms: Option<u64>,
    max_attempts_to_retry: Option<u32>,
    delay_in_ms_to_retry: Option<u64>,
    identity_provider: Option<Arc<dyn IdentityProvider>>,
}

impl TokenAuthConfigBuilder {
    /// Sets the lifetime ratio at which renewal triggers
    pub fn expiration_refresh_ratio(mut self, ratio: f64) -> Self {
        self.expiration_refresh_ratio = Some(ratio);
        self
    }

    /// Sets the fixed floor before expiry at which renewal must start
    pub fn lower_refresh_bound_millis(mut self, millis: u64) -> Self {
        self.lower_refresh_bound_millis = Some(millis);
        self
    }

    /// Sets the per-attempt provider call budget
    pub fn token_request_exec_timeout_in_ms(mut self, millis: u64) -> Self {
        self.token_request_exec_timeout_in_ms = Some(millis);
        self
    }

    /// Sets the number of retries allowed after the first failed attempt
    pub fn max_attempts_to_retry(mut self, attempts: u32) -> Self {
        self.max_attempts_to_retry = Some(attempts);
        self
    }

    /// Sets the fixed delay between retries
    pub fn delay_in_ms_to_retry(mut self, millis: u64) -> Self {
        self.delay_in_ms_to_retry = Some(millis);
        self
    }

    /// Sets the identity provider to request tokens from
    pub fn identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity_provider = Some(provider);
        self
    }

    /// Finishes the configuration
    pub fn build(self) -> Result<TokenAuthConfig, MissingIdentityProvider> {
        let identity_provider = self.identity_provider.ok_or(MissingIdentityProvider)?;
        let defaults = TokenManagerConfig::default();

        let retry_policy = RetryPolicy::new(
            self.max_attempts_to_retry
                .unwrap_or_else(|| defaults.retry_policy().max_attempts()),
            self.delay_in_ms_to_retry
                .map(DurationMillis)
                .unwrap_or_else(|| defaults.retry_policy().delay()),
        );

        Ok(TokenAuthConfig {
            token_manager_config: TokenManagerConfig::new(
                self.expiration_refresh_ratio
                    .unwrap_or_else(|| defaults.expiration_refresh_ratio()),
                self.lower_refresh_bound_millis
                    .map(DurationMillis)
                    .unwrap_or_else(|| defaults.lower_refresh_bound()),
                self.token_request_exec_timeout_in_ms
                    .map(DurationMillis)
                    .unwrap_or_else(|| defaults.token_request_exec_timeout()),
                retry_policy,
            ),
            identity_provider,
        })
    }
}

impl fmt::Debug for TokenAuthConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenAuthConfigBuilder")
            .field("expiration_refresh_ratio", &self.expiration_refresh_ratio)
            .field("lower_refresh_bound_millis", &self.lower_refresh_bound_millis)
            .field(
                "token_request_exec_timeout_in_ms",
                &self.token_request_exec_timeout_in_ms,
            )
            .field("max_attempts_to_retry", &self.max_attempts_to_retry)
            .field("delay_in_ms_to_retry", &self.delay_in_ms_to_retry)
            .finish_non_exhaustive()
    }
}
