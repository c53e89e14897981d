//! Tape storage defaults.

use crate::tape::{MatchRule, TapeMode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TapeConfig {
    /// Directory holding tape files
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Mode of a session that does not name one
    #[serde(default)]
    pub default_mode: TapeMode,
    /// Match rule given to newly created tapes
    #[serde(default)]
    pub match_rule: MatchRule,
}

fn default_root() -> PathBuf {
    PathBuf::from("tapes")
}

impl Default for TapeConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            default_mode: TapeMode::default(),
            match_rule: MatchRule::default(),
        }
    }
}
