#![allow(dead_code)]

use oracle_rc::oracle::engine::ScriptedEngine;
use oracle_rc::{CopyDenialPolicy, OracleClient, OracleConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Payload whose finalizer bumps a shared counter.
#[derive(Debug)]
pub struct Tracked {
    pub label: &'static str,
    drops: Arc<AtomicUsize>,
}

impl Tracked {
    pub fn new(label: &'static str) -> (Self, Arc<AtomicUsize>) {
        let drops = Arc::new(AtomicUsize::new(0));
        (
            Self {
                label,
                drops: drops.clone(),
            },
            drops,
        )
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn finalized(drops: &AtomicUsize) -> usize {
    drops.load(Ordering::SeqCst)
}

pub fn oracle_with(engine: &ScriptedEngine) -> Arc<OracleClient> {
    oracle_with_policy(engine, CopyDenialPolicy::Reject)
}

pub fn oracle_with_policy(engine: &ScriptedEngine, policy: CopyDenialPolicy) -> Arc<OracleClient> {
    let config = OracleConfig {
        copy_denial: policy,
        ..OracleConfig::default()
    };
    Arc::new(OracleClient::with_engine(config, engine.clone()))
}
