//! Secret masking: API keys, webhook URLs, and tokens are never echoed back
//! (spec §4.7).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

const MASK: &str = "***";

/// Wraps a secret value so that `Debug`/`Display`/`Serialize` always emit a
/// fixed mask, while `reveal()` exposes the real value to code that actually
/// needs to use it (e.g. an outbound HTTP client).
#[derive(Clone, PartialEq, Eq)]
pub struct Masked(String);

impl Masked {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn reveal(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Masked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{MASK}")
    }
}

impl fmt::Display for Masked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{MASK}")
    }
}

impl Serialize for Masked {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(MASK)
    }
}

impl<'de> Deserialize<'de> for Masked {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Masked(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_and_display_never_leak_the_secret() {
        let masked = Masked::new("super-secret-token");
        assert_eq!(format!("{masked:?}"), "***");
        assert_eq!(format!("{masked}"), "***");
    }

    #[test]
    fn serialize_never_leaks_the_secret() {
        let masked = Masked::new("super-secret-token");
        let json = serde_json::to_string(&masked).unwrap();
        assert_eq!(json, "\"***\"");
    }

    #[test]
    fn reveal_returns_the_real_value() {
        let masked = Masked::new("super-secret-token");
        assert_eq!(masked.reveal(), "super-secret-token");
    }

    #[test]
    fn deserialize_keeps_the_real_value_for_internal_use() {
        let masked: Masked = serde_json::from_str("\"abc-123\"").unwrap();
        assert_eq!(masked.reveal(), "abc-123");
    }
}
