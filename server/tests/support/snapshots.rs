use common::Snapshot;
use serde_json::{Value, json};

/// Builds game-state payloads shaped like the real feed.
#[derive(Debug, Clone, Default)]
pub struct GsiBuilder {
    map_phase: Option<String>,
    round_phase: Option<String>,
    round: Option<u32>,
    kills: Option<u64>,
    headshots: Option<u64>,
    health: Option<u32>,
    weapon: Option<String>,
    token: Option<String>,
}

impl GsiBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_phase(mut self, phase: &str) -> Self {
        self.map_phase = Some(phase.to_string());
        self
    }

    pub fn round_phase(mut self, phase: &str) -> Self {
        self.round_phase = Some(phase.to_string());
        self
    }

    pub fn round(mut self, round: u32) -> Self {
        self.round = Some(round);
        self
    }

    pub fn kills(mut self, kills: u64, headshots: u64) -> Self {
        self.kills = Some(kills);
        self.headshots = Some(headshots);
        self
    }

    pub fn health(mut self, health: u32) -> Self {
        self.health = Some(health);
        self
    }

    pub fn weapon(mut self, name: &str) -> Self {
        self.weapon = Some(name.to_string());
        self
    }

    pub fn token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn json(&self) -> Value {
        let mut root = json!({
            "provider": { "name": "Counter-Strike 2", "appid": 730 },
        });

        if self.map_phase.is_some() || self.round.is_some() {
            root["map"] = json!({ "name": "de_mirage", "mode": "competitive" });
            if let Some(phase) = &self.map_phase {
                root["map"]["phase"] = json!(phase);
            }
            if let Some(round) = self.round {
                root["map"]["round"] = json!(round);
            }
        }
        if let Some(phase) = &self.round_phase {
            root["round"] = json!({ "phase": phase });
        }

        if self.kills.is_some() || self.health.is_some() || self.weapon.is_some() {
            let mut player = json!({ "steamid": "76561198000000000", "name": "tester" });
            if let Some(kills) = self.kills {
                player["match_stats"] = json!({
                    "kills": kills,
                    "headshot_kills": self.headshots.unwrap_or(0),
                    "assists": 0,
                    "deaths": 0,
                });
            }
            if let Some(health) = self.health {
                player["state"] = json!({ "health": health });
            }
            if let Some(weapon) = &self.weapon {
                player["weapons"] = json!({
                    "weapon_0": { "name": "weapon_knife", "state": "holstered" },
                    "weapon_1": { "name": weapon, "state": "active" },
                });
            }
            root["player"] = player;
        }

        if let Some(token) = &self.token {
            root["auth"] = json!({ "token": token });
        }
        root
    }

    pub fn build(&self) -> Snapshot {
        Snapshot::from_value(self.json()).unwrap()
    }
}

/// Snapshot during an in-progress match on `round` with the player on `kills`.
pub fn live(round: u32, kills: u64) -> GsiBuilder {
    GsiBuilder::new().map_phase("live").round_phase("live").round(round).kills(kills, 0)
}
