//! Tapes: recorded HTTP interactions and the rules for replaying them.
//!
//! A tape is an ordered, append-only list of request/response pairs with a
//! [`TapeMode`] deciding whether live requests are answered from the tape,
//! forwarded and recorded, or refused.
//!
//! # Module Structure
//!
//! - `mode` - Tape mode enum
//! - `types` - Recorded requests, responses and headers
//! - `match_rule` - Request comparators
//! - `memory` - In-memory tape and playback decisions
//! - `format` - On-disk YAML layout
//! - `filename` - Tape name normalization
//! - `store` - File-backed persistence

mod filename;
mod format;
mod match_rule;
mod memory;
mod mode;
mod store;
mod types;

pub use filename::sanitize;
pub use format::TapeFile;
pub use match_rule::MatchRule;
pub use memory::{Decision, Tape};
pub use mode::TapeMode;
pub use store::TapeStore;
pub use types::{version_label, Headers, Interaction, RecordedRequest, RecordedResponse};
