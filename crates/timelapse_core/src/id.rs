//! Identifiers for recorded sessions and the entities inside them.
//!
//! Sessions are identified by UUIDs. Everything recorded within a session
//! (tabs, frames, commands, DOM nodes, change records, resources) uses the
//! integer ids assigned by the live recorder, so they stay stable across
//! replays and sort deterministically.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session identifier - identifies one recorded browser session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random SessionId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from UUID bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Parse from the hyphenated UUID form
    ///
    /// # Errors
    ///
    /// Returns error if the string is not a UUID
    pub fn parse(s: &str) -> crate::CoreResult<Self> {
        let raw = s.strip_prefix("session_").unwrap_or(s);
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|e| crate::CoreError::InvalidId {
                reason: e.to_string(),
            })
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session_{}", self.0)
    }
}

macro_rules! recorded_id {
    ($(#[$meta:meta])* $name:ident($inner:ty), $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name($inner);

        impl $name {
            /// Create from the raw recorder value
            #[must_use]
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Get the raw value
            #[must_use]
            pub const fn get(&self) -> $inner {
                self.0
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

recorded_id!(
    /// Tab identifier within a session
    TabId(u32),
    "tab_"
);

recorded_id!(
    /// Frame identifier within a session
    FrameId(u32),
    "frame_"
);

recorded_id!(
    /// Identifier of the user command that was running when something was recorded
    CommandId(u32),
    "cmd_"
);

recorded_id!(
    /// DOM node identifier assigned by the in-page recorder, unique per frame
    NodeId(u32),
    "node_"
);

recorded_id!(
    /// Captured network exchange identifier, unique per session
    ResourceId(u64),
    "res_"
);

recorded_id!(
    /// Position of a change record in the session-wide change log
    GlobalId(u64),
    "g"
);

impl GlobalId {
    /// Sentinel for "not yet assigned by the change log"
    pub const UNASSIGNED: Self = Self(0);

    /// Whether the change log still has to assign this id
    #[must_use]
    pub const fn is_unassigned(&self) -> bool {
        self.0 == 0
    }

    /// The id following this one
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_creation() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn test_session_id_parse_roundtrip() {
        let id = SessionId::new();
        let parsed = SessionId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(SessionId::parse("nope").is_err());
    }

    #[test]
    fn test_recorded_id_display() {
        assert_eq!(TabId::new(1).to_string(), "tab_1");
        assert_eq!(FrameId::new(7).to_string(), "frame_7");
        assert_eq!(ResourceId::new(9).to_string(), "res_9");
    }

    #[test]
    fn test_global_id_unassigned() {
        assert!(GlobalId::UNASSIGNED.is_unassigned());
        assert!(!GlobalId::new(1).is_unassigned());
        assert_eq!(GlobalId::new(4).next(), GlobalId::new(5));
    }

    #[test]
    fn test_id_ord() {
        assert!(GlobalId::new(1) < GlobalId::new(2));
        assert!(NodeId::new(3) > NodeId::new(2));
    }
}
