use serde::{Deserialize, Serialize};
use uuid::Uuid;

// User identity = opaque UUID handed out by the account service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse_str(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unordered key for the conversation between two users.
///
/// The participants are normalized so that `low <= high`; building the key
/// from `(a, b)` or `(b, a)` yields the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    low: UserId,
    high: UserId,
}

impl PairKey {
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn low(&self) -> UserId {
        self.low
    }

    pub fn high(&self) -> UserId {
        self.high
    }

    /// The other participant, or `None` if `user` is not part of the pair.
    pub fn counterpart(&self, user: &UserId) -> Option<UserId> {
        if self.low == *user {
            Some(self.high)
        } else if self.high == *user {
            Some(self.low)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_key_is_unordered() {
        let a = UserId::new();
        let b = UserId::new();
        assert_eq!(PairKey::new(a, b), PairKey::new(b, a));
        assert!(PairKey::new(a, b).low() <= PairKey::new(a, b).high());
    }

    #[test]
    fn test_pair_key_counterpart() {
        let a = UserId::new();
        let b = UserId::new();
        let pair = PairKey::new(b, a);

        assert_eq!(pair.counterpart(&a), Some(b));
        assert_eq!(pair.counterpart(&b), Some(a));
        assert_eq!(pair.counterpart(&UserId::new()), None);
    }

    #[test]
    fn test_user_id_serializes_as_plain_string() {
        let id = UserId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
