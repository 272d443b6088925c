//! Shared ownership record for one managed resource.
//!
//! A block moves through `Live -> PendingRelease -> Destroyed | Leaked`. The
//! count, the history and the block's own reference to the resource all sit
//! behind one mutex; every oracle consultation happens while that mutex is
//! held, so the decrement to zero and the release question form a single
//! critical section. The phase is mirrored into an atomic so dereferencing a
//! handle never takes the lock.
//!
//! Whatever the oracle answers, the resource is finalized at most once: the
//! block drops its `Arc<T>` on `Destroyed` and forgets it on `Leaked`, and
//! each handle holds its own clone, so the finalizer cannot run while any
//! handle still exists.

use crate::config::CopyDenialPolicy;
use crate::error::PreconditionViolation;
use crate::interaction_log::{EventKind, InteractionLog, Record};
use crate::oracle::{Decision, OracleClient};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Live,
    /// Count reached zero; the release question is being asked.
    PendingRelease,
    /// Terminal: the oracle allowed deletion.
    Destroyed,
    /// Terminal: the oracle kept the resource; it is never finalized.
    Leaked,
}

impl Phase {
    fn from_u8(raw: u8) -> Phase {
        match raw {
            0 => Phase::Live,
            1 => Phase::PendingRelease,
            2 => Phase::Destroyed,
            _ => Phase::Leaked,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Phase::Live => 0,
            Phase::PendingRelease => 1,
            Phase::Destroyed => 2,
            Phase::Leaked => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Destroyed | Phase::Leaked)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Live => "live",
            Phase::PendingRelease => "pending release",
            Phase::Destroyed => "destroyed",
            Phase::Leaked => "leaked",
        })
    }
}

/// What a handle release did to its block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Other retained handles remain; no oracle query was made.
    Retained { remaining: usize },
    /// The oracle allowed deletion at zero.
    Destroyed,
    /// The oracle kept the resource at zero. `cause` is set when the verdict
    /// came from a failed query instead of a `false` reply.
    Leaked {
        cause: Option<crate::error::OracleError>,
    },
    /// The handle was an uncounted share; the block was not touched.
    Unretained,
    /// The handle was empty.
    Empty,
}

/// Result of an oracle-gated copy or assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Acquisition {
    Retained,
    Unretained(Decision),
    Denied(Decision),
}

/// Point-in-time view of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockStatus {
    pub type_tag: &'static str,
    pub phase: Phase,
    pub ref_count: usize,
    pub history_len: usize,
    pub unretained_shares: usize,
}

struct BlockState<T> {
    resource: Option<Arc<T>>,
    ref_count: usize,
    history: InteractionLog,
    unretained_shares: usize,
}

pub struct ControlBlock<T> {
    type_tag: &'static str,
    oracle: Arc<OracleClient>,
    phase: AtomicU8,
    state: Mutex<BlockState<T>>,
}

impl<T> ControlBlock<T> {
    /// A live block with one retained owner and an empty history.
    pub(crate) fn new(resource: Arc<T>, type_tag: &'static str, oracle: Arc<OracleClient>) -> Self {
        Self {
            type_tag,
            oracle,
            phase: AtomicU8::new(Phase::Live.as_u8()),
            state: Mutex::new(BlockState {
                resource: Some(resource),
                ref_count: 1,
                history: InteractionLog::new(),
                unretained_shares: 0,
            }),
        }
    }

    pub fn type_tag(&self) -> &'static str {
        self.type_tag
    }

    pub fn oracle(&self) -> &Arc<OracleClient> {
        &self.oracle
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn ref_count(&self) -> usize {
        self.lock().ref_count
    }

    pub fn history(&self) -> Vec<Record> {
        self.lock().history.records().to_vec()
    }

    pub fn status(&self) -> BlockStatus {
        let state = self.lock();
        BlockStatus {
            type_tag: self.type_tag,
            phase: self.phase(),
            ref_count: state.ref_count,
            history_len: state.history.len(),
            unretained_shares: state.unretained_shares,
        }
    }

    /// Fails unless the block is live.
    pub(crate) fn check_live(&self) -> Result<(), PreconditionViolation> {
        match self.phase() {
            Phase::Live => Ok(()),
            phase => Err(PreconditionViolation::UseAfterFree {
                type_tag: self.type_tag,
                phase,
            }),
        }
    }

    /// Ask the oracle about a copy or assignment and retain on `true`.
    pub(crate) fn acquire(&self, event: EventKind) -> Result<Acquisition, PreconditionViolation> {
        let mut state = self.lock();
        self.check_live()?;

        let decision = self.oracle.decide(self.type_tag, &state.history, event);
        state.history.append(event, decision.verdict);

        if decision.verdict {
            state.ref_count += 1;
            log::debug!(
                "[ControlBlock] {} of '{}' allowed, ref_count={}",
                event,
                self.type_tag,
                state.ref_count
            );
            return Ok(Acquisition::Retained);
        }

        match self.oracle.config().copy_denial {
            CopyDenialPolicy::Reject => Ok(Acquisition::Denied(decision)),
            CopyDenialPolicy::ShareUnretained => {
                state.unretained_shares += 1;
                Ok(Acquisition::Unretained(decision))
            }
        }
    }

    /// Drop one retained reference; at zero the oracle decides the resource's fate.
    pub(crate) fn release(&self) -> ReleaseOutcome {
        let mut state = self.lock();

        if self.phase() != Phase::Live || state.ref_count == 0 {
            log::error!(
                "[ControlBlock] release of '{}' in phase {} with ref_count={}",
                self.type_tag,
                self.phase(),
                state.ref_count
            );
            return match self.phase() {
                Phase::Destroyed => ReleaseOutcome::Destroyed,
                _ => ReleaseOutcome::Leaked { cause: None },
            };
        }

        state.ref_count -= 1;
        if state.ref_count > 0 {
            return ReleaseOutcome::Retained {
                remaining: state.ref_count,
            };
        }

        self.set_phase(Phase::PendingRelease);
        let decision = self
            .oracle
            .decide(self.type_tag, &state.history, EventKind::Release);
        state.history.append(EventKind::Release, decision.verdict);

        let resource = state.resource.take();
        if decision.verdict {
            self.set_phase(Phase::Destroyed);
            drop(state);
            // finalizer runs here unless a handle still holds its clone
            drop(resource);
            log::debug!("[ControlBlock] '{}' destroyed", self.type_tag);
            ReleaseOutcome::Destroyed
        } else {
            self.set_phase(Phase::Leaked);
            drop(state);
            if let Some(resource) = resource {
                std::mem::forget(resource);
            }
            match &decision.error {
                Some(e) => log::warn!(
                    "[ControlBlock] '{}' leaked, oracle unavailable: {}",
                    self.type_tag,
                    e
                ),
                None => log::info!("[ControlBlock] '{}' leaked, oracle kept it", self.type_tag),
            }
            ReleaseOutcome::Leaked {
                cause: decision.error,
            }
        }
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.store(phase.as_u8(), Ordering::Release);
    }

    fn lock(&self) -> MutexGuard<'_, BlockState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> fmt::Debug for ControlBlock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlBlock")
            .field("type_tag", &self.type_tag)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
