use std::{
    error, fmt,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use tokenguard_clock::{Clock, DurationMillis, System, UnixTime};
use tokio::sync::watch;

use crate::{
    dispatcher::Dispatcher,
    error::DispatchError,
    scheduler::{RenewalOutcome, RenewalScheduler, RenewalTask},
    sources::IdentityProvider,
    Error, Token, TokenListener, TokenManagerConfig,
};

/// Keeps a client continuously supplied with a fresh token
///
/// The manager schedules renewals ahead of expiry, retries failed attempts
/// on a fixed delay, and notifies a [`TokenListener`] of every renewal and
/// of terminal failure. It is cheap to clone; clones share the same
/// renewal cycle.
///
/// The lifecycle is one-way: `start` may be called once, and after `stop`
/// the manager schedules nothing further. A stopped manager does not
/// self-heal; construct a new one to resume renewals.
pub struct TokenManager<C = System> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for TokenManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> fmt::Debug for TokenManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("config", &self.inner.config)
            .field("started", &self.inner.started)
            .field("stopped", &self.inner.stopped)
            .finish_non_exhaustive()
    }
}

struct Inner<C> {
    config: TokenManagerConfig,
    dispatcher: Dispatcher,
    scheduler: RenewalScheduler,
    listener: Mutex<Option<Box<dyn TokenListener>>>,
    current_token: watch::Sender<Option<Arc<Token>>>,
    retries: AtomicU32,
    started: AtomicBool,
    stopped: AtomicBool,
    clock: C,
}

impl TokenManager<System> {
    /// Constructs a manager driven by the system clock
    pub fn new(provider: Arc<dyn IdentityProvider>, config: TokenManagerConfig) -> Self {
        Self::with_clock(provider, config, System)
    }
}

impl<C> TokenManager<C>
where
    C: Clock + Send + Sync + 'static,
{
    /// Constructs a manager using the given clock for renewal deadlines
    pub fn with_clock(
        provider: Arc<dyn IdentityProvider>,
        config: TokenManagerConfig,
        clock: C,
    ) -> Self {
        let timeout = Duration::from(config.token_request_exec_timeout());
        let (current_token, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                config,
                dispatcher: Dispatcher::new(provider, timeout),
                scheduler: RenewalScheduler::new(),
                listener: Mutex::new(None),
                current_token,
                retries: AtomicU32::new(0),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                clock,
            }),
        }
    }

    /// Starts the renewal cycle
    ///
    /// Schedules the first renewal attempt immediately. When
    /// `block_for_initial_token` is set, the call does not return until a
    /// first token has been obtained (`Ok(Some(_))`), renewal has failed
    /// terminally (the failure is re-raised here in addition to reaching
    /// the listener), or the manager was stopped mid-wait (`Ok(None)`).
    /// Otherwise it returns `Ok(None)` at once and the first token or
    /// terminal failure surfaces through the listener alone.
    ///
    /// `start` is one-shot: a second call fails with
    /// [`Error::AlreadyStarted`] and leaves the running cycle untouched.
    pub async fn start(
        &self,
        listener: impl TokenListener + 'static,
        block_for_initial_token: bool,
    ) -> Result<Option<Arc<Token>>, Error> {
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyStarted);
        }

        *self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(listener));

        let task = Inner::schedule_renewal(&self.inner, Duration::ZERO);
        tracing::debug!("token manager started");

        if block_for_initial_token {
            self.inner.scheduler.wait_for(task).await
        } else {
            Ok(None)
        }
    }

    /// Stops the renewal cycle
    ///
    /// Cancels the pending attempt; no scheduling decision occurs after
    /// this returns. An in-flight provider call is abandoned rather than
    /// interrupted, and a late result is discarded.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.scheduler.stop();
        tracing::debug!("token manager stopped");
    }

    /// The most recently obtained token, if any
    ///
    /// Reads from other tasks may briefly observe the previous token while
    /// a renewal completes; the reference itself is published atomically.
    pub fn current_token(&self) -> Option<Arc<Token>> {
        self.inner.current_token.borrow().clone()
    }

    /// The configuration the manager was built with
    pub fn config(&self) -> &TokenManagerConfig {
        &self.inner.config
    }

    /// Computes how long to wait before renewing a token with the given
    /// lifetime bounds
    ///
    /// Two renewal points are considered: a fixed floor before expiry
    /// (`lower_refresh_bound`) and the instant the configured fraction of
    /// the token's total lifetime has elapsed (`expiration_refresh_ratio`).
    /// Whichever comes first governs, and a renewal point already in the
    /// past yields a zero delay so the renewal fires immediately.
    pub fn calculate_renewal_delay(
        &self,
        expires_at: UnixTime,
        received_at: UnixTime,
    ) -> DurationMillis {
        self.inner.calculate_renewal_delay(expires_at, received_at)
    }
}

impl<C> Inner<C>
where
    C: Clock + Send + Sync + 'static,
{
    fn schedule_renewal(inner: &Arc<Self>, delay: Duration) -> RenewalTask {
        let renew = Arc::clone(inner);
        inner
            .scheduler
            .schedule_next(delay, Box::pin(async move { renew.renew_token().await }))
    }

    /// One renewal attempt; runs only on the scheduler's task, never
    /// concurrently with itself
    async fn renew_token(self: Arc<Self>) -> RenewalOutcome {
        // A timer that fired while `stop` raced ahead of cancellation must
        // not reschedule.
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(None);
        }

        match self.dispatcher.request_token().await {
            Ok(token) => {
                let token = Arc::new(token);
                self.retries.store(0, Ordering::SeqCst);
                self.current_token.send_replace(Some(Arc::clone(&token)));

                let delay = self.calculate_renewal_delay(token.expires_at(), token.received_at());
                tracing::debug!(
                    expires_at = token.expires_at().0,
                    next_renewal_in_ms = delay.0,
                    "token renewed"
                );

                self.with_listener(|l| l.on_token_renewed(&token));
                // Armed only once the callback has returned, so that even a
                // zero delay cannot start the next attempt while this one
                // is still delivering.
                Self::schedule_renewal(&self, Duration::from(delay));
                Ok(Some(token))
            }
            Err(err) => {
                let failed_attempts = self.retries.fetch_add(1, Ordering::SeqCst);
                if failed_attempts < self.config.retry_policy().max_attempts() {
                    let delay = self.config.retry_policy().delay();
                    tracing::warn!(
                        error = (&err as &dyn error::Error),
                        attempt = failed_attempts + 1,
                        retry_in_ms = delay.0,
                        "token renewal attempt failed, will retry"
                    );
                    Self::schedule_renewal(&self, Duration::from(delay));
                    Ok(None)
                } else {
                    let err = self.terminal_error(err);
                    tracing::error!(
                        error = (&err as &dyn error::Error),
                        "token renewal failed and retries are exhausted"
                    );
                    self.with_listener(|l| l.on_error(&err));
                    Err(err)
                }
            }
        }
    }

    fn with_listener(&self, f: impl FnOnce(&dyn TokenListener)) {
        let guard = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(listener) = guard.as_deref() {
            f(listener);
        }
    }

    /// Normalizes an attempt failure into the terminal error reported to
    /// the listener and any blocked waiter
    fn terminal_error(&self, err: DispatchError) -> Error {
        match err {
            DispatchError::Timeout(timeout) => Error::RequestTimeout {
                timeout,
                provider_error: self.dispatcher.last_error(),
            },
            DispatchError::Provider(cause) => Error::Renewal { cause },
        }
    }

    fn calculate_renewal_delay(&self, expires_at: UnixTime, received_at: UnixTime) -> DurationMillis {
        let ttl_lower = self.ttl_for_lower_refresh(expires_at);
        let ttl_ratio = self.ttl_for_ratio_refresh(expires_at, received_at);
        let delay = ttl_lower.min(ttl_ratio);
        if delay < 0 {
            DurationMillis(0)
        } else {
            DurationMillis(delay as u64)
        }
    }

    /// Time until the fixed-floor renewal point: `lower_refresh_bound`
    /// before expiry
    fn ttl_for_lower_refresh(&self, expires_at: UnixTime) -> i64 {
        let start_of_renewal_zone =
            expires_at.0 as i64 - self.config.lower_refresh_bound().0 as i64;
        start_of_renewal_zone - self.clock.now().0 as i64
    }

    /// Time until the ratio-based renewal point: the moment the configured
    /// fraction of the token's total lifetime has elapsed
    fn ttl_for_ratio_refresh(&self, expires_at: UnixTime, received_at: UnixTime) -> i64 {
        let total_lifetime = expires_at.0 as i64 - received_at.0 as i64;
        let intended_usage =
            (total_lifetime as f64 * self.config.expiration_refresh_ratio()) as i64;
        let start_of_renewal_zone = received_at.0 as i64 + intended_usage;
        start_of_renewal_zone - self.clock.now().0 as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::error::ProviderError;
    use crate::TokenValue;
    use async_trait::async_trait;
    use tokenguard_clock::TestClock;

    const NOW: UnixTime = UnixTime(1_700_000_000_000);

    /// Provider that fails a set number of times before succeeding, minting
    /// tokens with a fixed lifetime against the test clock
    struct ScriptedProvider {
        fail_first: u32,
        lifetime: DurationMillis,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn failing_forever() -> Self {
            Self::new(u32::MAX, DurationMillis(5_000))
        }

        fn new(fail_first: u32, lifetime: DurationMillis) -> Self {
            Self {
                fail_first,
                lifetime,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentityProvider for ScriptedProvider {
        async fn request_token(&self) -> Result<Token, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err("test exception from identity provider".into())
            } else {
                Ok(Token::new(
                    TokenValue::new(format!("token-{}", call)),
                    NOW + self.lifetime,
                    NOW,
                ))
            }
        }
    }

    struct HungProvider;

    #[async_trait]
    impl IdentityProvider for HungProvider {
        async fn request_token(&self) -> Result<Token, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err("much too late".into())
        }
    }

    #[derive(Default)]
    struct Recorder {
        renewed: Mutex<Vec<(Token, tokio::time::Instant)>>,
        errors: Mutex<Vec<Error>>,
    }

    impl Recorder {
        fn renewed_count(&self) -> usize {
            self.renewed.lock().unwrap().len()
        }

        fn error_count(&self) -> usize {
            self.errors.lock().unwrap().len()
        }
    }

    impl TokenListener for Recorder {
        fn on_token_renewed(&self, token: &Token) {
            self.renewed
                .lock()
                .unwrap()
                .push((token.clone(), tokio::time::Instant::now()));
        }

        fn on_error(&self, error: &Error) {
            self.errors.lock().unwrap().push(error.clone());
        }
    }

    fn config(ratio: f64, lower: u64, timeout: u64, retries: RetryPolicy) -> TokenManagerConfig {
        TokenManagerConfig::new(
            ratio,
            DurationMillis(lower),
            DurationMillis(timeout),
            retries,
        )
    }

    fn manager(
        provider: Arc<dyn IdentityProvider>,
        config: TokenManagerConfig,
    ) -> TokenManager<TestClock> {
        TokenManager::with_clock(provider, config, TestClock::new(NOW))
    }

    async fn settle(condition: impl Fn() -> bool) {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn renewal_delay_tracks_the_stricter_policy() {
        let provider: Arc<dyn IdentityProvider> = Arc::new(ScriptedProvider::failing_forever());

        let cases: &[(u64, u64, f64, u64)] = &[
            // duration, lower bound, ratio, expected delay
            (5_000, 2_000, 0.5, 2_500),
            (10_000, 8_000, 0.2, 2_000),
            (10_000, 10_000, 0.2, 0),
            (0, 5_000, 0.2, 0),
            (10_000, 1_000, 0.00001, 0),
            (10_000, 1_000, 0.0001, 1),
        ];

        for &(duration, lower, ratio, expected) in cases {
            let mgr = manager(
                Arc::clone(&provider),
                config(ratio, lower, 1_000, RetryPolicy::default()),
            );
            let delay = mgr.calculate_renewal_delay(NOW + DurationMillis(duration), NOW);
            assert_eq!(
                delay,
                DurationMillis(expected),
                "duration={} lower={} ratio={}",
                duration,
                lower,
                ratio
            );
        }
    }

    #[test]
    fn renewal_delay_is_never_negative() {
        let provider: Arc<dyn IdentityProvider> = Arc::new(ScriptedProvider::failing_forever());
        let mgr = manager(provider, config(0.8, 10_000, 1_000, RetryPolicy::default()));

        // Token that expired long before "now"
        let delay = mgr.calculate_renewal_delay(
            NOW - DurationMillis(60_000),
            NOW - DurationMillis(120_000),
        );
        assert_eq!(delay, DurationMillis(0));
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_start_returns_the_first_token() {
        let provider = Arc::new(ScriptedProvider::new(0, DurationMillis(5_000)));
        let listener = Arc::new(Recorder::default());
        let mgr = manager(
            Arc::clone(&provider) as Arc<dyn IdentityProvider>,
            config(0.7, 200, 2_000, RetryPolicy::default()),
        );

        let token = mgr
            .start(Arc::clone(&listener), true)
            .await
            .expect("initial token should be obtained")
            .expect("blocking start should yield a token");

        assert_eq!(token.value().as_str(), "token-0");
        assert_eq!(listener.renewed_count(), 1);
        assert_eq!(listener.error_count(), 0);
        assert!(mgr.current_token().is_some());

        mgr.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_one_shot() {
        let provider = Arc::new(ScriptedProvider::new(0, DurationMillis(5_000)));
        let mgr = manager(
            provider as Arc<dyn IdentityProvider>,
            config(0.7, 200, 2_000, RetryPolicy::default()),
        );

        mgr.start(Arc::new(Recorder::default()), false)
            .await
            .expect("first start must succeed");
        let second = mgr.start(Arc::new(Recorder::default()), false).await;
        assert!(matches!(second, Err(Error::AlreadyStarted)));

        mgr.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_start_reraises_terminal_failure() {
        let provider = Arc::new(ScriptedProvider::failing_forever());
        let listener = Arc::new(Recorder::default());
        let mgr = manager(
            Arc::clone(&provider) as Arc<dyn IdentityProvider>,
            config(0.7, 200, 2_000, RetryPolicy::new(2, DurationMillis(100))),
        );

        let result = mgr.start(Arc::clone(&listener), true).await;

        let err = result.expect_err("exhausted retries must fail the blocking start");
        assert_eq!(
            err.provider_error().map(|e| e.to_string()),
            Some("test exception from identity provider".to_owned())
        );
        // initial attempt + 2 retries
        assert_eq!(provider.calls(), 3);
        assert_eq!(listener.error_count(), 1);
        assert_eq!(listener.renewed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn background_failure_reaches_the_listener() {
        let provider = Arc::new(ScriptedProvider::failing_forever());
        let listener = Arc::new(Recorder::default());
        let mgr = manager(
            Arc::clone(&provider) as Arc<dyn IdentityProvider>,
            config(0.7, 200, 2_000, RetryPolicy::new(4, DurationMillis(100))),
        );

        let immediate = mgr
            .start(Arc::clone(&listener), false)
            .await
            .expect("non-blocking start returns at once");
        assert!(immediate.is_none());

        settle(|| listener.error_count() == 1).await;

        assert_eq!(provider.calls(), 5);
        assert_eq!(listener.renewed_count(), 0);
        assert!(mgr.current_token().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_absorbed_by_the_retry_budget() {
        let provider = Arc::new(ScriptedProvider::new(2, DurationMillis(5_000)));
        let listener = Arc::new(Recorder::default());
        let mgr = manager(
            Arc::clone(&provider) as Arc<dyn IdentityProvider>,
            config(0.7, 200, 2_000, RetryPolicy::new(5, DurationMillis(100))),
        );

        let token = mgr
            .start(Arc::clone(&listener), true)
            .await
            .expect("renewal should recover within the budget")
            .expect("a token should eventually arrive");

        assert_eq!(token.value().as_str(), "token-2");
        assert_eq!(provider.calls(), 3);
        assert_eq!(listener.renewed_count(), 1);
        assert_eq!(listener.error_count(), 0);

        mgr.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn hung_provider_is_bounded_by_the_request_timeout() {
        let listener = Arc::new(Recorder::default());
        let mgr = manager(
            Arc::new(HungProvider),
            config(0.7, 200, 100, RetryPolicy::new(0, DurationMillis(50))),
        );

        let before = tokio::time::Instant::now();
        let result = mgr.start(Arc::clone(&listener), true).await;
        let elapsed = before.elapsed();

        match result {
            Err(Error::RequestTimeout { provider_error, .. }) => {
                // The hung call never reported anything of its own
                assert!(provider_error.is_none());
            }
            other => panic!("expected a timeout failure, got {:?}", other),
        }
        // Bounded by the timeout, not the hang duration
        assert!(elapsed < Duration::from_secs(2));
        assert_eq!(listener.error_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_cadence_follows_the_refresh_ratio() {
        // 1 s lifetime at ratio 0.5 with no floor: renew every ~500 ms
        let provider = Arc::new(ScriptedProvider::new(0, DurationMillis(1_000)));
        let listener = Arc::new(Recorder::default());
        let mgr = manager(
            Arc::clone(&provider) as Arc<dyn IdentityProvider>,
            config(0.5, 0, 2_000, RetryPolicy::default()),
        );

        mgr.start(Arc::clone(&listener), false)
            .await
            .expect("start must succeed");
        settle(|| listener.renewed_count() >= 3).await;
        mgr.stop();

        let renewed = listener.renewed.lock().unwrap();
        let gap1 = renewed[1].1 - renewed[0].1;
        let gap2 = renewed[2].1 - renewed[1].1;
        for gap in [gap1, gap2] {
            assert!(
                gap >= Duration::from_millis(450) && gap <= Duration::from_millis(550),
                "inter-renewal gap {:?} should be close to 500ms",
                gap
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_a_pending_retry() {
        let provider = Arc::new(ScriptedProvider::failing_forever());
        let listener = Arc::new(Recorder::default());
        let mgr = manager(
            Arc::clone(&provider) as Arc<dyn IdentityProvider>,
            config(0.7, 200, 2_000, RetryPolicy::new(5, DurationMillis(5_000))),
        );

        mgr.start(Arc::clone(&listener), false)
            .await
            .expect("start must succeed");
        settle(|| provider.calls() >= 1).await;
        mgr.stop();

        // Long past the pending retry's deadline
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(provider.calls(), 1);
        assert_eq!(listener.renewed_count(), 0);
        assert_eq!(listener.error_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_releases_a_blocked_waiter() {
        let provider = Arc::new(ScriptedProvider::failing_forever());
        let mgr = manager(
            Arc::clone(&provider) as Arc<dyn IdentityProvider>,
            config(0.7, 200, 2_000, RetryPolicy::new(u32::MAX, DurationMillis(10_000))),
        );

        let waiter = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.start(Arc::new(Recorder::default()), true).await })
        };

        settle(|| provider.calls() >= 1).await;
        mgr.stop();

        let outcome = waiter.await.expect("waiter must not panic");
        assert!(matches!(outcome, Ok(None)));
    }

    /// Plays both roles so the provider can tell whether it was entered
    /// while a listener callback was still running
    #[derive(Default)]
    struct OverlapDetector {
        in_callback: AtomicBool,
        overlapped: AtomicBool,
        renewals: AtomicU32,
    }

    #[async_trait]
    impl IdentityProvider for OverlapDetector {
        async fn request_token(&self) -> Result<Token, ProviderError> {
            if self.in_callback.load(Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            // Zero lifetime, so the next renewal is due immediately
            let now = UnixTime::from(std::time::SystemTime::now());
            Ok(Token::new(TokenValue::from_static("tok"), now, now))
        }
    }

    impl TokenListener for OverlapDetector {
        fn on_token_renewed(&self, _token: &Token) {
            self.in_callback.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.renewals.fetch_add(1, Ordering::SeqCst);
            self.in_callback.store(false, Ordering::SeqCst);
        }

        fn on_error(&self, _error: &Error) {}
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn a_zero_delay_renewal_waits_for_the_listener_to_finish() {
        let detector = Arc::new(OverlapDetector::default());
        let mgr = TokenManager::new(
            Arc::clone(&detector) as Arc<dyn IdentityProvider>,
            config(0.5, 0, 1_000, RetryPolicy::default()),
        );

        mgr.start(Arc::clone(&detector), false)
            .await
            .expect("start must succeed");
        settle(|| detector.renewals.load(Ordering::SeqCst) >= 3).await;
        mgr.stop();

        assert!(
            !detector.overlapped.load(Ordering::SeqCst),
            "a renewal attempt started while the previous callback was still running"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn successive_renewals_replace_the_current_token() {
        let provider = Arc::new(ScriptedProvider::new(0, DurationMillis(1_000)));
        let listener = Arc::new(Recorder::default());
        let mgr = manager(
            Arc::clone(&provider) as Arc<dyn IdentityProvider>,
            config(0.5, 0, 2_000, RetryPolicy::default()),
        );

        assert!(mgr.current_token().is_none());
        mgr.start(Arc::clone(&listener), false)
            .await
            .expect("start must succeed");
        settle(|| listener.renewed_count() >= 2).await;
        mgr.stop();

        let current = mgr.current_token().expect("a token should be current");
        let latest = listener.renewed.lock().unwrap();
        let last_value = latest.last().map(|(t, _)| t.value().to_owned());
        assert_eq!(Some(current.value().to_owned()), last_value);
    }
}
