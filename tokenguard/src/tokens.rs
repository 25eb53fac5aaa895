use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokenguard_clock::{Clock, DurationMillis, System, UnixTime};

use crate::{TokenValue, TokenValueRef};

/// A credential obtained from an identity provider
///
/// Tokens are immutable: the manager holds the most recently obtained one
/// until a successful renewal supersedes it. The delay policy assumes
/// `received_at <= expires_at`; the provider is responsible for producing
/// sensible timestamps.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Token {
    value: TokenValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    expires_at: UnixTime,
    received_at: UnixTime,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    claims: HashMap<String, serde_json::Value>,
}

impl Token {
    /// Constructs a token from its credential string and lifetime bounds
    pub fn new(value: TokenValue, expires_at: UnixTime, received_at: UnixTime) -> Self {
        Self {
            value,
            user: None,
            expires_at,
            received_at,
            claims: HashMap::new(),
        }
    }

    /// Attaches the subject the token was issued for
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Attaches a claim set for later lookup via [`claim`][Self::claim]
    pub fn with_claims(mut self, claims: HashMap<String, serde_json::Value>) -> Self {
        self.claims = claims;
        self
    }

    /// The opaque credential string
    #[inline]
    pub fn value(&self) -> &TokenValueRef {
        &self.value
    }

    /// The subject the token was issued for, if known
    #[inline]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// The absolute time the token expires
    #[inline]
    pub fn expires_at(&self) -> UnixTime {
        self.expires_at
    }

    /// The absolute time the token was obtained
    #[inline]
    pub fn received_at(&self) -> UnixTime {
        self.received_at
    }

    /// The token's total valid lifetime
    #[inline]
    pub fn lifetime(&self) -> DurationMillis {
        self.expires_at - self.received_at
    }

    /// Looks up a claim by key
    pub fn claim(&self, key: &str) -> Option<&serde_json::Value> {
        self.claims.get(key)
    }

    /// Whether the token has expired according to the system clock
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_with_clock(&System)
    }

    /// Whether the token has expired according to the provided clock
    #[inline]
    pub fn is_expired_with_clock<C: Clock>(&self, clock: &C) -> bool {
        self.is_expired_at(clock.now())
    }

    /// Whether the token would be expired as of the provided time
    #[inline]
    pub fn is_expired_at(&self, time: UnixTime) -> bool {
        time > self.expires_at
    }

    /// Remaining validity according to the system clock
    #[inline]
    pub fn ttl(&self) -> DurationMillis {
        self.ttl_with_clock(&System)
    }

    /// Remaining validity according to the provided clock
    #[inline]
    pub fn ttl_with_clock<C: Clock>(&self, clock: &C) -> DurationMillis {
        self.ttl_at(clock.now())
    }

    /// Remaining validity as of the provided time
    #[inline]
    pub fn ttl_at(&self, time: UnixTime) -> DurationMillis {
        self.expires_at - time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokenguard_clock::TestClock;

    fn sample() -> Token {
        Token::new(
            TokenValue::from_static("tok"),
            UnixTime(10_000),
            UnixTime(4_000),
        )
    }

    #[test]
    fn expiry_tracks_the_clock() {
        let token = sample();
        let mut clock = TestClock::new(UnixTime(9_999));
        assert!(!token.is_expired_with_clock(&clock));
        clock.inc(2);
        assert!(token.is_expired_with_clock(&clock));
    }

    #[test]
    fn ttl_saturates_past_expiry() {
        let token = sample();
        assert_eq!(token.ttl_at(UnixTime(7_000)), DurationMillis(3_000));
        assert_eq!(token.ttl_at(UnixTime(12_000)), DurationMillis(0));
    }

    #[test]
    fn lifetime_spans_receipt_to_expiry() {
        assert_eq!(sample().lifetime(), DurationMillis(6_000));
    }

    #[test]
    fn claims_are_retrievable_by_key() {
        let mut claims = HashMap::new();
        claims.insert("oid".to_owned(), serde_json::json!("user1"));
        let token = sample().with_user("user1").with_claims(claims);

        assert_eq!(token.user(), Some("user1"));
        assert_eq!(token.claim("oid"), Some(&serde_json::json!("user1")));
        assert_eq!(token.claim("missing"), None);
    }
}
