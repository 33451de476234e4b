// Strong Types - Newtype identifiers for every entity the sync core touches
// Keeps user ids, post ids and room ids from being swapped at call sites

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Authenticated user identifier issued by the identity provider
    UserId
);
string_id!(
    /// Feed post identifier
    PostId
);
string_id!(
    /// Chat message identifier, unique within the store
    MessageId
);
string_id!(
    /// Notification document identifier
    NotificationId
);
string_id!(
    /// Episode chat room identifier, derived from (anime, episode)
    RoomId
);

/// AniList media identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnimeId(pub i64);

impl AnimeId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for AnimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AnimeId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl RoomId {
    /// Deterministic room id for an episode. Every client computes the same
    /// value so concurrent creators converge on one document.
    pub fn for_episode(anime_id: AnimeId, episode: u32) -> Self {
        Self(format!("{}_ep{}", anime_id.value(), episode))
    }
}
