use serde_json::{Map, Value};
use thiserror::Error;

/// Weapon name recorded when no weapon in the snapshot is marked active.
pub const UNKNOWN_WEAPON: &str = "unknown";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("payload is not valid JSON: {0}")]
    NotJson(#[from] serde_json::Error),
    #[error("payload is JSON but not an object")]
    NotAnObject,
}

/// One instant of reported game state, exactly as the feed sent it.
///
/// The payload is kept as an untyped document. Every accessor walks it
/// defensively: a missing or wrongly-typed field reads as absent, never as
/// an error, so one odd field can't reject an otherwise usable snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    root: Map<String, Value>,
}

impl Snapshot {
    pub fn from_slice(payload: &[u8]) -> Result<Self, SnapshotError> {
        let value: Value = serde_json::from_slice(payload)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, SnapshotError> {
        match value {
            Value::Object(root) => Ok(Snapshot { root }),
            _ => Err(SnapshotError::NotAnObject),
        }
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.root.clone())
    }

    fn get(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.root.get(*first)?;
        for key in rest {
            current = current.as_object()?.get(*key)?;
        }
        Some(current)
    }

    fn get_str(&self, path: &[&str]) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    fn get_u64(&self, path: &[&str]) -> Option<u64> {
        self.get(path).and_then(Value::as_u64)
    }

    pub fn round_phase(&self) -> Option<&str> {
        self.get_str(&["round", "phase"])
    }

    pub fn map_phase(&self) -> Option<&str> {
        self.get_str(&["map", "phase"])
    }

    pub fn map_name(&self) -> Option<&str> {
        self.get_str(&["map", "name"])
    }

    /// Round number from `round.round`, then `map.round`.
    pub fn round_number(&self) -> Option<u32> {
        self.get_u64(&["round", "round"])
            .or_else(|| self.get_u64(&["map", "round"]))
            .and_then(|round| u32::try_from(round).ok())
    }

    pub fn player_steamid(&self) -> Option<&str> {
        self.get_str(&["player", "steamid"])
    }

    pub fn player_name(&self) -> Option<&str> {
        self.get_str(&["player", "name"])
    }

    pub fn player_kills(&self) -> Option<u64> {
        self.get_u64(&["player", "match_stats", "kills"])
    }

    pub fn player_headshot_kills(&self) -> Option<u64> {
        self.get_u64(&["player", "match_stats", "headshot_kills"])
    }

    pub fn player_assists(&self) -> Option<u64> {
        self.get_u64(&["player", "match_stats", "assists"])
    }

    pub fn player_deaths(&self) -> Option<u64> {
        self.get_u64(&["player", "match_stats", "deaths"])
    }

    pub fn player_health(&self) -> Option<u32> {
        self.get_u64(&["player", "state", "health"])
            .and_then(|health| u32::try_from(health).ok())
    }

    /// Name of the first weapon whose state is exactly "active".
    pub fn active_weapon(&self) -> Option<&str> {
        let weapons = self.get(&["player", "weapons"])?.as_object()?;
        weapons
            .values()
            .filter_map(Value::as_object)
            .find(|weapon| weapon.get("state").and_then(Value::as_str) == Some("active"))
            .and_then(|weapon| weapon.get("name").and_then(Value::as_str))
    }

    /// Token from the `auth` block the game client attaches to each payload.
    pub fn auth_token(&self) -> Option<&str> {
        self.get_str(&["auth", "token"])
    }
}
