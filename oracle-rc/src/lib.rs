// oracle-rc library
// Reference-counted handles whose lifecycle is gated by an external decision engine

//! Every copy, assignment and final release of a [`Handle`] is put to an
//! oracle as a `true`/`false` question, together with the object's past
//! answers. The oracle is advisory: memory safety holds whatever it answers,
//! and anything other than a clear `true` is read as "no".

pub mod config;
pub mod control_block;
pub mod error;
pub mod handle;
pub mod interaction_log;
pub mod oracle;

pub use crate::config::{CopyDenialPolicy, EngineConfig, EngineKind, OracleConfig};
pub use crate::control_block::{BlockStatus, Phase, ReleaseOutcome};
pub use crate::error::{ConfigError, HandleError, Hazard, OracleError, PreconditionViolation};
pub use crate::handle::{BlockMonitor, Handle};
pub use crate::interaction_log::{EventKind, InteractionLog, Record};
pub use crate::oracle::{Decision, OracleClient};
