use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

/// Display prefix of temporary row ids. Store-assigned ids are plain integers,
/// so a prefixed token can never be mistaken for one.
pub const TEMP_ID_PREFIX: &str = "tmp_";

macro_rules! int_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(i64);

        impl $name {
            pub fn new(raw: i64) -> Self {
                Self(raw)
            }

            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

int_id!(EntityId);
int_id!(DefinitionId);
int_id!(ValueId);

/// Locally generated identity of a row the store has not assigned an id to yet.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TempId(Uuid);

impl TempId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TempId({})", &self.0.simple().to_string()[..8])
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TEMP_ID_PREFIX}{}", self.0.simple())
    }
}

impl FromStr for TempId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s
            .strip_prefix(TEMP_ID_PREFIX)
            .ok_or_else(|| CoreError::InvalidData(format!("not a temporary id: {s}")))?;
        Uuid::parse_str(token)
            .map(Self)
            .map_err(|e| CoreError::InvalidData(format!("bad temporary id {s}: {e}")))
    }
}

/// Identity of a grid row: either the store's entity id or a temporary token.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RowId {
    Persisted(EntityId),
    Pending(TempId),
}

impl RowId {
    pub fn pending() -> Self {
        Self::Pending(TempId::new())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn entity_id(&self) -> Option<EntityId> {
        match self {
            Self::Persisted(id) => Some(*id),
            Self::Pending(_) => None,
        }
    }

    pub fn temp_id(&self) -> Option<TempId> {
        match self {
            Self::Pending(id) => Some(*id),
            Self::Persisted(_) => None,
        }
    }
}

impl From<EntityId> for RowId {
    fn from(id: EntityId) -> Self {
        Self::Persisted(id)
    }
}

impl From<TempId> for RowId {
    fn from(id: TempId) -> Self {
        Self::Pending(id)
    }
}

impl fmt::Debug for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persisted(id) => write!(f, "Row({})", id.get()),
            Self::Pending(id) => write!(f, "Row({id})"),
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persisted(id) => write!(f, "{id}"),
            Self::Pending(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for RowId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with(TEMP_ID_PREFIX) {
            return s.parse::<TempId>().map(Self::Pending);
        }
        s.parse::<i64>()
            .map(|raw| Self::Persisted(EntityId::new(raw)))
            .map_err(|e| CoreError::InvalidData(format!("bad row id {s}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_ids_are_prefixed_and_parse_back() {
        let temp = TempId::new();
        let text = temp.to_string();
        assert!(text.starts_with(TEMP_ID_PREFIX));
        assert_eq!(text.parse::<TempId>().unwrap(), temp);
    }

    #[test]
    fn row_id_text_never_collides_across_regimes() {
        let persisted = RowId::Persisted(EntityId::new(42));
        let pending = RowId::pending();
        assert_eq!("42".parse::<RowId>().unwrap(), persisted);
        assert_eq!(pending.to_string().parse::<RowId>().unwrap(), pending);
        assert_ne!(persisted.to_string(), pending.to_string());
        assert!("tmp_nonsense".parse::<RowId>().is_err());
    }
}
