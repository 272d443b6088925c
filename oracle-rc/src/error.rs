//! Error taxonomy for oracle-gated handles.
//!
//! Oracle-layer errors are recoverable and always degrade to the safest
//! ownership decision. Precondition violations are programmer errors and are
//! raised loudly by the handle instead of being tolerated.

use std::time::Duration;
use thiserror::Error;

/// Failures of the decision engine behind an `OracleClient`.
///
/// `Clone` so a cached initialization failure can be handed to every later caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleError {
    #[error("decision engine failed to initialize: {0}")]
    InitializationFailed(String),
    #[error("decision engine failed to generate a reply: {0}")]
    GenerationFailed(String),
    #[error("decision engine exceeded its {0:?} deadline")]
    Timeout(Duration),
}

/// Misuse of a handle. Not recoverable; `Deref` panics with this message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PreconditionViolation {
    #[error("use after free: control block for '{type_tag}' is {phase}")]
    UseAfterFree {
        type_tag: &'static str,
        phase: crate::control_block::Phase,
    },
    #[error("dereference of an empty (moved-from) handle")]
    Empty,
}

/// Conditions that are not errors but leave the ownership graph in a risky shape.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum Hazard {
    /// A copy went ahead without incrementing the count; the block may be
    /// destroyed while this handle still points at it.
    #[error("unretained share of '{type_tag}': copy denied by oracle but shared anyway")]
    UnretainedShare { type_tag: &'static str },
}

/// Errors returned by fallible copy and assignment.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandleError {
    #[error("oracle denied {event} of '{type_tag}'")]
    CopyDenied {
        type_tag: &'static str,
        event: crate::interaction_log::EventKind,
        /// Set when the denial came from a failed query rather than a `false` reply.
        cause: Option<OracleError>,
    },
    #[error(transparent)]
    NotLive(#[from] PreconditionViolation),
}

/// Errors raised while loading an `OracleConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
