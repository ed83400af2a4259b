//! Type-safe identifiers for ledger entities.
//!
//! UUID-backed newtypes prevent a user id from being confused with a
//! streamer or transaction id at compile time. Lot identifiers are `i64`
//! because lot rows are bigserial and the stable lock order is ascending id.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Creates a new random identifier (UUID v4).
            #[must_use]
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Wraps an existing [`uuid::Uuid`].
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner [`uuid::Uuid`].
            #[must_use]
            pub const fn as_uuid(self) -> uuid::Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<uuid::Uuid> for $name {
            fn from(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for uuid::Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id! {
    /// Identifier of a platform user account.
    UserId
}

uuid_id! {
    /// Identifier of a streamer channel. Distinct from the [`UserId`] of
    /// the user who owns the channel.
    StreamerId
}

uuid_id! {
    /// Identifier of one committed ledger transaction.
    TxId
}

uuid_id! {
    /// Identifier of a chest opening (join window).
    OpeningId
}

/// Row identifier of a user-owned lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LotId(pub i64);

impl fmt::Display for LotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row identifier of a chest-owned lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChestLotId(pub i64);

impl fmt::Display for ChestLotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_generates_unique_ids() {
        assert_ne!(UserId::new(), UserId::new());
        assert_ne!(TxId::new(), TxId::new());
    }

    #[test]
    fn as_uuid_maps_over_options() {
        let id = UserId::new();
        assert_eq!(Some(id).map(UserId::as_uuid), Some(id.as_uuid()));
        assert_eq!(None::<TxId>.map(TxId::as_uuid), None);
    }

    #[test]
    fn serde_is_transparent() {
        let id = OpeningId::new();
        let json = serde_json::to_string(&id).ok();
        assert_eq!(json, serde_json::to_string(&id.as_uuid()).ok());
    }

    #[test]
    fn lot_ids_order_by_row_id() {
        assert!(LotId(1) < LotId(2));
        assert!(ChestLotId(7) > ChestLotId(3));
    }
}
