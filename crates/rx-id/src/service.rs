//! Internal implementation of identifier services.
//!
//! This module contains the implementation details for entity identifiers and
//! the sequential prescription numbers used throughout the rx system.

use crate::{IdError, IdResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::{fmt, str::FromStr};

/// Re-exported for convenience.
pub use ::uuid::Uuid;

/// The canonical entity identifier (32 lowercase hex characters, no hyphens).
///
/// This wrapper type guarantees that once constructed, the contained UUID is
/// in canonical format. It provides type safety for identifier operations and
/// a total ordering used by the inventory lock protocol.
///
/// # When to use this type
/// Use this wrapper whenever you are:
/// - Accepting an identifier string from *outside* the core (CLI input, API
///   request, etc), or
/// - Generating a new identifier for a medication, prescription, item,
///   inventory record, or dispense transaction.
///
/// Once you have an `EntityId`, you can safely assume the internal UUID is
/// valid and in canonical form.
///
/// # Construction
/// - [`EntityId::new`] generates a fresh canonical identifier.
/// - [`EntityId::parse`] validates an externally supplied identifier.
///
/// # Errors
/// [`EntityId::parse`] returns [`IdError::InvalidInput`] if the input is not
/// already canonical.
///
/// # Display format
/// When displayed or converted to string, `EntityId` always produces the
/// canonical 32-character lowercase hex format without hyphens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(Uuid);

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityId {
    /// Generates a new identifier in canonical form.
    ///
    /// This is suitable for allocating a fresh identifier during entity
    /// creation. The generated UUID is cryptographically secure and follows
    /// RFC 4122 version 4.
    ///
    /// # Returns
    ///
    /// Returns a newly generated canonical identifier wrapped in `EntityId`.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Validates and parses an identifier string that must already be in
    /// canonical form.
    ///
    /// This does **not** normalise other common UUID forms (for example,
    /// hyphenated or uppercase). Callers must provide the canonical
    /// representation. This strict validation ensures consistency and
    /// prevents issues with different UUID representations.
    ///
    /// # Arguments
    ///
    /// * `input` - Identifier string to validate and wrap. Must be exactly 32
    ///   lowercase hex characters.
    ///
    /// # Returns
    ///
    /// Returns a validated [`EntityId`] on success.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::InvalidInput`] if `input` is not in canonical form.
    pub fn parse(input: &str) -> IdResult<Self> {
        if Self::is_canonical(input) {
            // SAFETY: is_canonical guarantees valid hex, so parse_str will succeed
            let uuid = Uuid::parse_str(input).expect("is_canonical guarantees valid UUID");
            return Ok(Self(uuid));
        }
        Err(IdError::InvalidInput(format!(
            "identifier must be 32 lowercase hex characters without hyphens, got: '{}'",
            input
        )))
    }

    /// Returns the identifier as a `uuid::Uuid`.
    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// Returns true if `input` is in canonical identifier form.
    ///
    /// This is a purely syntactic check that validates:
    /// - Exactly 32 bytes long
    /// - Contains only lowercase hex characters (`0-9` and `a-f`)
    ///
    /// This method is fast and can be used for pre-validation before calling
    /// [`parse`](EntityId::parse).
    pub fn is_canonical(input: &str) -> bool {
        input.len() == 32
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }
}

impl fmt::Display for EntityId {
    /// Formats the identifier in canonical form (32 lowercase hex characters,
    /// no hyphens).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Display in canonical (simple) form
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for EntityId {
    type Err = IdError;

    /// Parses a string into an `EntityId`, requiring canonical form.
    ///
    /// This is equivalent to calling [`EntityId::parse`].
    ///
    /// # Errors
    ///
    /// Returns [`IdError::InvalidInput`] if the string is not in canonical
    /// form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityId::parse(s)
    }
}

impl serde::Serialize for EntityId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for EntityId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        EntityId::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A human-readable sequential prescription number.
///
/// Format: `RX-` followed by a zero-padded six-digit sequence value.
///
/// Example: `RX-000123`
///
/// This identifier is:
/// - Unique per deployment (allocated from [`RxNumberSequence`])
/// - Human-readable, suitable for printing on labels and reading over the
///   phone
/// - Monotonic in allocation order
///
/// Numbers above 999999 widen past six digits rather than wrapping.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RxNumber(u64);

impl RxNumber {
    /// Returns the numeric sequence value of this prescription number.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl FromStr for RxNumber {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("RX-").ok_or_else(|| {
            IdError::InvalidInput(format!("prescription number must start with 'RX-': '{}'", s))
        })?;

        if digits.len() < 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdError::InvalidInput(format!(
                "prescription number must carry at least six digits: '{}'",
                s
            )));
        }

        let value = digits.parse::<u64>().map_err(|e| {
            IdError::InvalidInput(format!("invalid prescription number '{}': {}", s, e))
        })?;

        Ok(Self(value))
    }
}

impl fmt::Display for RxNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RX-{:06}", self.0)
    }
}

impl serde::Serialize for RxNumber {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for RxNumber {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        RxNumber::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Allocator for sequential prescription numbers.
///
/// Allocation is atomic: concurrent prescription creations each receive a
/// distinct, strictly increasing number without any external locking.
#[derive(Debug)]
pub struct RxNumberSequence {
    next: AtomicU64,
}

impl RxNumberSequence {
    /// Creates a sequence that will allocate numbers starting at `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Allocates the next prescription number.
    pub fn allocate(&self) -> RxNumber {
        RxNumber(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for RxNumberSequence {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_generates_canonical_id() {
        let id = EntityId::new();
        let canonical = id.to_string();

        // Verify the generated identifier is in canonical form
        assert_eq!(canonical.len(), 32);
        assert!(EntityId::is_canonical(&canonical));
    }

    #[test]
    fn test_parse_valid_canonical_id() {
        let canonical = "550e8400e29b41d4a716446655440000";
        let result = EntityId::parse(canonical);

        assert!(result.is_ok());
        assert_eq!(result.unwrap().to_string(), canonical);
    }

    #[test]
    fn test_parse_rejects_hyphenated_id() {
        let hyphenated = "550e8400-e29b-41d4-a716-446655440000";
        let result = EntityId::parse(hyphenated);

        assert!(result.is_err());
        match result {
            Err(IdError::InvalidInput(msg)) => {
                assert!(msg.contains("32 lowercase hex characters"));
            }
            _ => panic!("Expected InvalidInput error"),
        }
    }

    #[test]
    fn test_parse_rejects_uppercase_id() {
        let uppercase = "550E8400E29B41D4A716446655440000";
        let result = EntityId::parse(uppercase);

        assert!(result.is_err());
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!(EntityId::parse("550e8400e29b41d4a71644665544000").is_err());
        assert!(EntityId::parse("550e8400e29b41d4a7164466554400000").is_err());
        assert!(EntityId::parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_invalid_characters() {
        let invalid = "550e8400e29b41d4a716446655440zzz";
        let result = EntityId::parse(invalid);

        assert!(result.is_err());
    }

    #[test]
    fn test_is_canonical_valid() {
        assert!(EntityId::is_canonical("550e8400e29b41d4a716446655440000"));
        assert!(EntityId::is_canonical("00000000000000000000000000000000"));
        assert!(EntityId::is_canonical("ffffffffffffffffffffffffffffffff"));
    }

    #[test]
    fn test_is_canonical_invalid() {
        // Uppercase
        assert!(!EntityId::is_canonical("550E8400E29B41D4A716446655440000"));

        // Hyphenated
        assert!(!EntityId::is_canonical(
            "550e8400-e29b-41d4-a716-446655440000"
        ));

        // Too short
        assert!(!EntityId::is_canonical("550e8400e29b41d4a71644665544000"));

        // Invalid characters
        assert!(!EntityId::is_canonical("550e8400e29b41d4a716446655440zzz"));

        // Empty string
        assert!(!EntityId::is_canonical(""));
    }

    #[test]
    fn test_ordering_matches_canonical_text_ordering() {
        let low = EntityId::parse("00112233445566778899aabbccddeeff").unwrap();
        let high = EntityId::parse("aabbccddeeff00112233445566778899").unwrap();

        assert!(low < high);

        let mut ids = vec![high, low];
        ids.sort();
        assert_eq!(ids, vec![low, high]);
    }

    #[test]
    fn test_round_trip_new_to_string_to_parse() {
        let original = EntityId::new();
        let as_string = original.to_string();
        let parsed = EntityId::parse(&as_string).unwrap();

        assert_eq!(original, parsed);
    }

    #[test]
    fn test_serde_round_trip() {
        let original = EntityId::parse("550e8400e29b41d4a716446655440000").unwrap();
        let json = serde_json::to_string(&original).unwrap();

        assert_eq!(json, "\"550e8400e29b41d4a716446655440000\"");

        let parsed: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_serde_rejects_non_canonical() {
        let result: Result<EntityId, _> =
            serde_json::from_str("\"550e8400-e29b-41d4-a716-446655440000\"");

        assert!(result.is_err());
    }

    // RxNumber tests

    #[test]
    fn test_rx_number_display_format() {
        let seq = RxNumberSequence::starting_at(123);
        let number = seq.allocate();

        assert_eq!(number.to_string(), "RX-000123");
    }

    #[test]
    fn test_rx_number_widens_past_six_digits() {
        let seq = RxNumberSequence::starting_at(1_234_567);
        let number = seq.allocate();

        assert_eq!(number.to_string(), "RX-1234567");
    }

    #[test]
    fn test_rx_number_parse_valid() {
        let number = RxNumber::from_str("RX-000123").unwrap();

        assert_eq!(number.value(), 123);
        assert_eq!(number.to_string(), "RX-000123");
    }

    #[test]
    fn test_rx_number_parse_missing_prefix() {
        let result = RxNumber::from_str("000123");

        assert!(result.is_err());
        match result {
            Err(IdError::InvalidInput(msg)) => {
                assert!(msg.contains("must start with 'RX-'"));
            }
            _ => panic!("Expected InvalidInput error"),
        }
    }

    #[test]
    fn test_rx_number_parse_too_few_digits() {
        let result = RxNumber::from_str("RX-123");

        assert!(result.is_err());
    }

    #[test]
    fn test_rx_number_parse_non_digits() {
        let result = RxNumber::from_str("RX-00012a");

        assert!(result.is_err());
    }

    #[test]
    fn test_sequence_allocates_strictly_increasing() {
        let seq = RxNumberSequence::default();

        let first = seq.allocate();
        let second = seq.allocate();
        let third = seq.allocate();

        assert_eq!(first.value(), 1);
        assert_eq!(second.value(), 2);
        assert_eq!(third.value(), 3);
    }

    #[test]
    fn test_sequence_concurrent_allocations_are_distinct() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let seq = Arc::new(RxNumberSequence::default());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let seq = Arc::clone(&seq);
            handles.push(std::thread::spawn(move || {
                (0..50).map(|_| seq.allocate().value()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for value in handle.join().unwrap() {
                assert!(seen.insert(value), "duplicate number {value}");
            }
        }

        assert_eq!(seen.len(), 400);
    }
}
