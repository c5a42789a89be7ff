//! Typed identifier definitions.

use crate::{define_id, define_name, IdError};

// =============================================================================
// Cluster Manager Identifiers
// =============================================================================

define_name!(
    /// Container identifier assigned by the cluster manager.
    ///
    /// The cluster manager may reuse numeric components across application
    /// attempts, so the full string is the identity.
    ContainerId
);

define_name!(
    /// Logical worker-instance name bound to a container at grant time.
    InstanceName
);

impl InstanceName {
    /// Builds the `{prefix}_{seq}` name used by sequential naming.
    pub fn sequential(prefix: &str, seq: u64) -> Result<Self, IdError> {
        Self::parse(&format!("{prefix}_{seq}"))
    }
}

// =============================================================================
// Controller-local Identifiers
// =============================================================================

/// Identifier of an outstanding container request.
///
/// Allocated by the controller from a strictly increasing counter, so the
/// natural ordering is submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// The prefix used in the string form.
    pub const PREFIX: &'static str = "req";

    /// Creates a request id from a sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the sequence number.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns the id following this one.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Parses `req-{seq}`.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        let Some((prefix, seq)) = s.split_once('-') else {
            return Err(IdError::MissingSeparator('-'));
        };

        if prefix != Self::PREFIX {
            return Err(IdError::InvalidPrefix {
                expected: Self::PREFIX,
                actual: prefix.to_string(),
            });
        }

        seq.parse::<u64>()
            .map(Self)
            .map_err(|e| IdError::InvalidSequence(e.to_string()))
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", Self::PREFIX, self.0)
    }
}

impl std::str::FromStr for RequestId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for RequestId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for RequestId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Events
// =============================================================================

define_id!(EventId, "evt");

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_id_is_opaque() {
        let id: ContainerId = "container_1700000000000_0001_01_000002".parse().unwrap();
        assert_eq!(id.as_str(), "container_1700000000000_0001_01_000002");
        assert_eq!(id.to_string(), "container_1700000000000_0001_01_000002");
    }

    #[test]
    fn test_container_id_ordering_is_string_ordering() {
        let a: ContainerId = "container_02_000010".parse().unwrap();
        let b: ContainerId = "container_01_000099".parse().unwrap();
        assert!(b < a);
    }

    #[test]
    fn test_container_id_empty() {
        let result: Result<ContainerId, _> = "".parse();
        assert!(matches!(result.unwrap_err(), IdError::Empty));
    }

    #[test]
    fn test_instance_name_rejects_whitespace() {
        let result: Result<InstanceName, _> = "Task Runner".parse();
        assert!(matches!(
            result.unwrap_err(),
            IdError::InvalidCharacter { character: ' ', .. }
        ));
    }

    #[test]
    fn test_instance_name_sequential() {
        let name = InstanceName::sequential("YarnTaskRunner", 3).unwrap();
        assert_eq!(name.as_str(), "YarnTaskRunner_3");
    }

    #[test]
    fn test_instance_name_borrow_lookup() {
        let mut names = std::collections::HashSet::new();
        names.insert(InstanceName::parse("YarnTaskRunner_1").unwrap());
        assert!(names.contains("YarnTaskRunner_1"));
        assert!(!names.contains("YarnTaskRunner_2"));
    }

    #[test]
    fn test_request_id_roundtrip() {
        let id = RequestId::new(17);
        assert_eq!(id.to_string(), "req-17");
        let parsed: RequestId = "req-17".parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.next().value(), 18);
    }

    #[test]
    fn test_request_id_invalid() {
        assert!(matches!(
            RequestId::parse("req17").unwrap_err(),
            IdError::MissingSeparator('-')
        ));
        assert!(RequestId::parse("job-1").unwrap_err().is_prefix_error());
        assert!(matches!(
            RequestId::parse("req-x").unwrap_err(),
            IdError::InvalidSequence(_)
        ));
    }

    #[test]
    fn test_event_id_prefix() {
        let id = EventId::new();
        assert!(id.to_string().starts_with("evt_"));
        let parsed: EventId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_names_json_roundtrip() {
        let name = InstanceName::parse("YarnTaskRunner_5").unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"YarnTaskRunner_5\"");
        let parsed: InstanceName = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, name);

        let bad: Result<ContainerId, _> = serde_json::from_str("\"\"");
        assert!(bad.is_err());
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn container_id_order_matches_str_order(a in "[a-z0-9_]{1,24}", b in "[a-z0-9_]{1,24}") {
                let ia = ContainerId::parse(&a).unwrap();
                let ib = ContainerId::parse(&b).unwrap();
                prop_assert_eq!(ia.cmp(&ib), a.cmp(&b));
            }
        }
    }
}
