//! Tapedeck records HTTP(S) interactions through an intercepting proxy and
//! replays them from named tapes.
//!
//! A [`Recorder`] runs the proxy and inserts one tape at a time. Every request
//! routed through the proxy is replayed from the tape, forwarded and recorded,
//! or refused, as decided by the tape's [`TapeMode`] and [`MatchRule`].

pub mod certificate;
pub mod config;
pub mod error;
pub mod metrics;
pub mod overrides;
pub mod proxy;
pub mod session;
pub mod tape;

pub use certificate::CertificateAuthority;
pub use config::Config;
pub use error::{ProxyError, SessionError, TapeError};
pub use session::{ActiveTape, Recorder, TapeOptions};
pub use tape::{Interaction, MatchRule, Tape, TapeMode, TapeStore};
