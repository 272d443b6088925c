//! `Handle<T>`: a shared-ownership pointer whose copies and releases ask the oracle.
//!
//! ```no_run
//! use oracle_rc::Handle;
//!
//! let first = Handle::new(String::from("Hello"));
//! match first.try_clone() {
//!     Ok(second) => assert_eq!(second.ref_count(), 2),
//!     Err(denied) => eprintln!("{}", denied),
//! }
//! // dropping the last retained handle asks whether to delete the string
//! ```
//!
//! Copying is fallible because the oracle may refuse it; see
//! [`CopyDenialPolicy`](crate::config::CopyDenialPolicy) for what a refusal
//! does. Moves are plain Rust moves (or [`Handle::take`]) and never reach
//! the oracle.

use crate::control_block::{Acquisition, BlockStatus, ControlBlock, Phase, ReleaseOutcome};
use crate::error::{HandleError, Hazard, OracleError, PreconditionViolation};
use crate::interaction_log::{EventKind, Record};
use crate::oracle::{self, OracleClient};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

struct Shared<T> {
    block: Arc<ControlBlock<T>>,
    resource: Arc<T>,
    /// Whether this handle is counted in the block's `ref_count`.
    retained: bool,
}

impl<T> Shared<T> {
    fn release(self) -> ReleaseOutcome {
        if !self.retained {
            log::debug!(
                "[Handle] dropping unretained share of '{}'",
                self.block.type_tag()
            );
            return ReleaseOutcome::Unretained;
        }
        self.block.release()
        // our own `resource` clone goes last, after the block has decided
    }
}

pub struct Handle<T> {
    shared: Option<Shared<T>>,
}

impl<T> Handle<T> {
    /// Wrap `value` in a fresh block gated by the process-wide oracle.
    pub fn new(value: T) -> Self {
        Self::with_oracle(value, oracle::global())
    }

    pub fn with_oracle(value: T, oracle: Arc<OracleClient>) -> Self {
        Self::with_type_tag(value, std::any::type_name::<T>(), oracle)
    }

    /// Like `with_oracle`, naming the type in prompts with `type_tag`.
    pub fn with_type_tag(value: T, type_tag: &'static str, oracle: Arc<OracleClient>) -> Self {
        let resource = Arc::new(value);
        let block = Arc::new(ControlBlock::new(resource.clone(), type_tag, oracle));
        Self {
            shared: Some(Shared {
                block,
                resource,
                retained: true,
            }),
        }
    }

    /// A handle that owns nothing, as left behind by [`Handle::take`].
    pub fn empty() -> Self {
        Self { shared: None }
    }

    pub fn is_empty(&self) -> bool {
        self.shared.is_none()
    }

    /// Copy this handle, subject to the oracle's `copy` verdict.
    pub fn try_clone(&self) -> Result<Self, HandleError> {
        self.share(EventKind::Copy)
    }

    /// Point this handle at `source`'s block, subject to the oracle's
    /// `assign` verdict on that block. The previous block is released only
    /// once the new reference is secured; on error `self` is unchanged.
    pub fn assign_from(&mut self, source: &Self) -> Result<(), HandleError> {
        if self.same_block(source) {
            return Ok(());
        }
        let replacement = source.share(EventKind::Assign)?;
        drop(std::mem::replace(self, replacement));
        Ok(())
    }

    /// Move the reference out, leaving this handle empty.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Release now and report what happened; dropping does the same silently.
    pub fn release(mut self) -> ReleaseOutcome {
        match self.shared.take() {
            Some(shared) => shared.release(),
            None => ReleaseOutcome::Empty,
        }
    }

    pub fn try_get(&self) -> Result<&T, PreconditionViolation> {
        let shared = self.shared.as_ref().ok_or(PreconditionViolation::Empty)?;
        shared.block.check_live()?;
        Ok(&shared.resource)
    }

    pub fn ref_count(&self) -> usize {
        self.shared.as_ref().map_or(0, |s| s.block.ref_count())
    }

    pub fn phase(&self) -> Option<Phase> {
        self.shared.as_ref().map(|s| s.block.phase())
    }

    pub fn history(&self) -> Vec<Record> {
        self.shared
            .as_ref()
            .map(|s| s.block.history())
            .unwrap_or_default()
    }

    pub fn status(&self) -> Option<BlockStatus> {
        self.shared.as_ref().map(|s| s.block.status())
    }

    pub fn type_tag(&self) -> Option<&'static str> {
        self.shared.as_ref().map(|s| s.block.type_tag())
    }

    /// False for empty handles and for uncounted shares.
    pub fn is_retained(&self) -> bool {
        self.shared.as_ref().is_some_and(|s| s.retained)
    }

    pub fn hazard(&self) -> Option<Hazard> {
        match &self.shared {
            Some(s) if !s.retained => Some(Hazard::UnretainedShare {
                type_tag: s.block.type_tag(),
            }),
            _ => None,
        }
    }

    /// True when both handles point at the same block (or are both empty).
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.same_block(other)
    }

    /// An observer of this handle's block that does not count as an owner.
    pub fn monitor(&self) -> Option<BlockMonitor<T>> {
        self.shared.as_ref().map(|s| BlockMonitor {
            block: s.block.clone(),
        })
    }

    /// Free-form question to the oracle gating this handle. Not recorded in
    /// the block's history.
    pub fn ask(&self, question: &str) -> Result<String, OracleError> {
        match &self.shared {
            Some(s) => s.block.oracle().ask(question),
            None => oracle::global().ask(question),
        }
    }

    fn same_block(&self, other: &Self) -> bool {
        match (&self.shared, &other.shared) {
            (Some(a), Some(b)) => Arc::ptr_eq(&a.block, &b.block),
            (None, None) => true,
            _ => false,
        }
    }

    fn share(&self, event: EventKind) -> Result<Self, HandleError> {
        let Some(shared) = &self.shared else {
            return Ok(Self::empty());
        };
        let type_tag = shared.block.type_tag();

        let retained = match shared.block.acquire(event)? {
            Acquisition::Retained => true,
            Acquisition::Unretained(decision) => {
                let hazard = Hazard::UnretainedShare { type_tag };
                match decision.error {
                    Some(e) => log::warn!("[Handle] {} ({} failed: {})", hazard, event, e),
                    None => log::warn!("[Handle] {}", hazard),
                }
                false
            }
            Acquisition::Denied(decision) => {
                log::info!("[Handle] {} of '{}' denied by oracle", event, type_tag);
                return Err(HandleError::CopyDenied {
                    type_tag,
                    event,
                    cause: decision.error,
                });
            }
        };

        Ok(Self {
            shared: Some(Shared {
                block: shared.block.clone(),
                resource: shared.resource.clone(),
                retained,
            }),
        })
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Drop for Handle<T> {
    fn drop(&mut self) {
        let Some(shared) = self.shared.take() else {
            return;
        };
        let type_tag = shared.block.type_tag();
        match shared.release() {
            ReleaseOutcome::Leaked { cause: Some(e) } => {
                log::warn!("[Handle] '{}' leaked on drop: {}", type_tag, e)
            }
            outcome => log::trace!("[Handle] drop of '{}': {:?}", type_tag, outcome),
        }
    }
}

impl<T> Deref for Handle<T> {
    type Target = T;

    /// Panics on an empty handle or a block that is no longer live.
    fn deref(&self) -> &T {
        match self.try_get() {
            Ok(value) => value,
            Err(violation) => panic!("{}", violation),
        }
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.shared {
            None => f.write_str("Handle(empty)"),
            Some(s) => f
                .debug_struct("Handle")
                .field("type_tag", &s.block.type_tag())
                .field("phase", &s.block.phase())
                .field("retained", &s.retained)
                .finish(),
        }
    }
}

/// Read-only view of a control block that survives the handles it came from.
pub struct BlockMonitor<T> {
    block: Arc<ControlBlock<T>>,
}

impl<T> BlockMonitor<T> {
    pub fn phase(&self) -> Phase {
        self.block.phase()
    }

    pub fn ref_count(&self) -> usize {
        self.block.ref_count()
    }

    pub fn history(&self) -> Vec<Record> {
        self.block.history()
    }

    pub fn status(&self) -> BlockStatus {
        self.block.status()
    }
}

impl<T> Clone for BlockMonitor<T> {
    fn clone(&self) -> Self {
        Self {
            block: self.block.clone(),
        }
    }
}

impl<T> fmt::Debug for BlockMonitor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BlockMonitor").field(&self.block).finish()
    }
}
