//! Tape mode definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Policy controlling whether a tape permits playback, recording, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TapeMode {
    /// Playback only. A miss fails the request.
    ReadOnly,
    /// Always forward and record, never replay.
    WriteOnly,
    /// Replay on match, otherwise forward and record
    #[default]
    ReadWrite,
    /// Replay interactions strictly in recorded order. A miss fails the request.
    ReadSequential,
    /// Always forward and append, ignoring existing matches
    WriteSequential,
}

impl TapeMode {
    pub fn is_readable(&self) -> bool {
        matches!(
            self,
            TapeMode::ReadOnly | TapeMode::ReadWrite | TapeMode::ReadSequential
        )
    }

    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            TapeMode::WriteOnly | TapeMode::ReadWrite | TapeMode::WriteSequential
        )
    }

    pub fn is_sequential(&self) -> bool {
        matches!(self, TapeMode::ReadSequential | TapeMode::WriteSequential)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TapeMode::ReadOnly => "read_only",
            TapeMode::WriteOnly => "write_only",
            TapeMode::ReadWrite => "read_write",
            TapeMode::ReadSequential => "read_sequential",
            TapeMode::WriteSequential => "write_sequential",
        }
    }
}

impl fmt::Display for TapeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TapeMode {
    type Err = String;

    /// Accepts snake case, kebab case or the upper-case constant style.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "read_only" => Ok(TapeMode::ReadOnly),
            "write_only" => Ok(TapeMode::WriteOnly),
            "read_write" => Ok(TapeMode::ReadWrite),
            "read_sequential" => Ok(TapeMode::ReadSequential),
            "write_sequential" => Ok(TapeMode::WriteSequential),
            other => Err(format!("Unknown tape mode: {other}")),
        }
    }
}
