use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Token that ties exactly one reply to the request that produced it.
///
/// A fresh UUID v4 is minted for every request attempt, so two calls on the
/// same client never share a token. The token travels in the envelope's
/// `correlation_id` metadata and is opaque to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Generate a new unique correlation ID.
    pub fn generate() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    /// Borrow the correlation ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Cheap shared copy for envelope metadata.
    pub fn to_arc(&self) -> Arc<str> {
        Arc::clone(&self.0)
    }

    /// True if `other` (as read from a received envelope) names this token.
    pub fn matches(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_generate_unique() {
        // ---
        let id1 = CorrelationId::generate();
        let id2 = CorrelationId::generate();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_format() {
        // ---
        let id = CorrelationId::generate();
        let s = id.to_string();
        assert_eq!(s.len(), 36); // Standard UUID format
        assert!(Uuid::parse_str(&s).is_ok());
    }

    #[test]
    fn test_matches_only_exact_token() {
        // ---
        let id = CorrelationId::from("abc-123");
        assert!(id.matches("abc-123"));
        assert!(!id.matches("abc-1234"));
        assert!(!id.matches(""));
    }
}
