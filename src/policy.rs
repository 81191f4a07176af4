//! Per-game analysis policy
//!
//! The consistency margin, timer granularity and the transition special
//! cases are empirically tuned per game variant, so they live in a
//! data-driven table rather than in the state machine. Policies can be
//! loaded from TOML or taken from the built-in definitions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SplitterError};

fn default_granularity() -> i64 {
    1000
}

fn default_margin_factor() -> f64 {
    0.35
}

fn default_margin_base() -> i64 {
    50
}

/// Tuning constants for one game variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GamePolicy {
    /// Identifier matching `AnalysisSettings::game_id`, e.g. "sonic-1".
    pub game_id: String,

    /// Smallest step of the on-screen timer: 10 for centisecond timers,
    /// 1000 for whole-second timers.
    #[serde(default = "default_granularity")]
    pub timer_granularity_ms: i64,

    /// Compensation added to the reading carried across a white (special
    /// stage / time travel) transition. Some variants' timers regress
    /// slightly there; -330 for Sonic CD, 0 elsewhere.
    #[serde(default)]
    pub white_transition_offset_ms: i64,

    /// Segment indices that always split on a black-screen transition.
    /// Covers stages that end without a score screen; not general policy.
    #[serde(default)]
    pub split_on_black_segments: Vec<usize>,

    /// Consistency margin is `margin_factor * (elapsed + margin_base_ms)`.
    #[serde(default = "default_margin_factor")]
    pub margin_factor: f64,

    #[serde(default = "default_margin_base")]
    pub margin_base_ms: i64,
}

impl GamePolicy {
    /// Allowed recognition error for readings `elapsed_ms` of capture time apart.
    pub fn margin(&self, elapsed_ms: i64) -> i64 {
        (self.margin_factor * (elapsed_ms + self.margin_base_ms) as f64) as i64
    }

    /// Built-in definitions for the supported game variants.
    pub fn builtin() -> Vec<GamePolicy> {
        vec![
            GamePolicy {
                game_id: "sonic-1".to_string(),
                timer_granularity_ms: 1000,
                white_transition_offset_ms: 0,
                // Scrap Brain 2 ends in a plain fade-out, no score screen.
                split_on_black_segments: vec![17],
                margin_factor: default_margin_factor(),
                margin_base_ms: default_margin_base(),
            },
            GamePolicy {
                game_id: "sonic-2".to_string(),
                timer_granularity_ms: 1000,
                white_transition_offset_ms: 0,
                // Sky Chase ends without a score screen.
                split_on_black_segments: vec![16],
                margin_factor: default_margin_factor(),
                margin_base_ms: default_margin_base(),
            },
            GamePolicy {
                game_id: "sonic-cd".to_string(),
                timer_granularity_ms: 10,
                white_transition_offset_ms: -330,
                split_on_black_segments: Vec::new(),
                margin_factor: default_margin_factor(),
                margin_base_ms: default_margin_base(),
            },
        ]
    }
}

/// TOML schema: a list of `[[games]]` tables.
#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    games: Vec<GamePolicy>,
}

/// Lookup table of game policies.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: HashMap<String, GamePolicy>,
}

impl PolicyTable {
    /// Table containing only the built-in definitions.
    pub fn with_builtin() -> Self {
        let mut policies = HashMap::new();
        for policy in GamePolicy::builtin() {
            policies.insert(policy.game_id.clone(), policy);
        }
        Self { policies }
    }

    /// Parse additional definitions from TOML; they override built-ins with
    /// the same `game_id`.
    pub fn load_toml(&mut self, source: &str) -> Result<()> {
        let file: PolicyFile = toml::from_str(source)?;
        for policy in file.games {
            if policy.timer_granularity_ms <= 0 {
                return Err(SplitterError::InvalidPolicy(format!(
                    "{}: timer granularity must be positive",
                    policy.game_id
                )));
            }
            log::debug!("loaded policy for {}", policy.game_id);
            self.policies.insert(policy.game_id.clone(), policy);
        }
        Ok(())
    }

    pub fn get(&self, game_id: &str) -> Result<&GamePolicy> {
        self.policies
            .get(game_id)
            .ok_or_else(|| SplitterError::UnknownGame(game_id.to_string()))
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::with_builtin()
    }
}
