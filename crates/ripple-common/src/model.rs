//! Cluster member identity

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of a cluster member.
///
/// The identity is the key of vector clock entries and the primary input of the
/// concurrent-write tie-break, so its ordering must be identical on every member.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random identity (UUID v4)
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MemberId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A cluster member as seen by the local node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub address: String,
    /// Lite members take part in the cluster but hold no data
    #[serde(default)]
    pub lite: bool,
}

impl Member {
    pub fn new(id: impl Into<MemberId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            lite: false,
        }
    }

    pub fn lite(mut self, lite: bool) -> Self {
        self.lite = lite;
        self
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lite {
            write!(f, "Member[{}]:{} lite", self.address, self.id)
        } else {
            write!(f, "Member[{}]:{}", self.address, self.id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_id_ordering() {
        let a = MemberId::from("member-a");
        let b = MemberId::from("member-b");
        assert!(a < b);
        assert_eq!(a, MemberId::new("member-a"));
    }

    #[test]
    fn test_member_id_serde_is_transparent() {
        let id = MemberId::from("m1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"m1\"");
        let back: MemberId = serde_json::from_str("\"m1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_random_member_ids_differ() {
        assert_ne!(MemberId::random(), MemberId::random());
    }

    #[test]
    fn test_member_display() {
        let member = Member::new("m1", "127.0.0.1:5701");
        assert_eq!(member.to_string(), "Member[127.0.0.1:5701]:m1");
        assert_eq!(
            member.lite(true).to_string(),
            "Member[127.0.0.1:5701]:m1 lite"
        );
    }
}
