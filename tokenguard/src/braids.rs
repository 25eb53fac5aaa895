use aliri_braid::braid;
use std::fmt;

macro_rules! redacted {
    ($ty:ty: $hidden:literal, $reveal:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    reveal_prefix(&self.0, $reveal, f)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    reveal_prefix(&self.0, $reveal, f)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

/// Writes at most the first `max_len` characters of `unprotected`,
/// appending an ellipsis when anything was held back.
fn reveal_prefix(unprotected: &str, max_len: usize, f: &mut fmt::Formatter) -> fmt::Result {
    match unprotected.char_indices().nth(max_len) {
        Some((idx, _)) => {
            f.write_str(&unprotected[..idx])?;
            f.write_str("…")
        }
        None => f.write_str(unprotected),
    }
}

/// An opaque credential string as issued by an identity provider
#[braid(serde, debug = "owned", display = "owned")]
pub struct TokenValue;

redacted!(TokenValueRef: "TOKEN", 8);

/// A client ID
#[braid(serde)]
pub struct ClientId;

/// A client secret
#[braid(serde, debug = "owned", display = "owned")]
pub struct ClientSecret;

redacted!(ClientSecretRef: "CLIENT SECRET", 4);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_value_is_redacted_by_default() {
        let value = TokenValue::from_static("super-secret-credential");
        assert_eq!(format!("{}", value), "***TOKEN***");
        assert_eq!(format!("{:?}", value), "***TOKEN***");
    }

    #[test]
    fn alternate_debug_reveals_a_prefix_only() {
        let value = TokenValue::from_static("super-secret-credential");
        assert_eq!(format!("{:#?}", value), "\"super-se…\"");
    }

    #[test]
    fn short_values_are_not_truncated_in_alternate_mode() {
        let secret = ClientSecret::from_static("abc");
        assert_eq!(format!("{:#}", secret), "abc");
    }
}
