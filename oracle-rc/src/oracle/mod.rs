//! The oracle: a single serialized channel to a stateful decision engine.
//!
//! An `OracleClient` owns exactly one engine. The engine is built lazily on the
//! first query (or explicit `ensure_ready`), exactly once even under concurrent
//! callers, and every query afterwards runs under one mutex because engines
//! keep per-call decode state and are not reentrant.
//!
//! Handles created with `Handle::new` share the process-wide client returned by
//! [`global`]. Tests replace or drop it with [`install_global`] / [`reset_global`].

pub mod engine;
#[cfg(feature = "llama")]
pub mod llama;

use crate::config::OracleConfig;
use crate::error::OracleError;
use crate::interaction_log::{self, EventKind, InteractionLog};
use engine::{factory_from_config, DecisionEngine, EngineFactory};
use once_cell::sync::{Lazy, OnceCell};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Outcome of one gated lifecycle question.
///
/// `verdict` is already fail-closed: an engine error yields `false`, and the
/// error is kept alongside so callers can surface it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub verdict: bool,
    pub error: Option<OracleError>,
}

impl Decision {
    fn from_reply(reply: Result<String, OracleError>) -> Self {
        match reply {
            Ok(text) => Self {
                verdict: interaction_log::parse_verdict(&text),
                error: None,
            },
            Err(error) => Self {
                verdict: false,
                error: Some(error),
            },
        }
    }
}

type EngineSlot = Result<Mutex<Box<dyn DecisionEngine>>, OracleError>;

pub struct OracleClient {
    config: OracleConfig,
    factory: EngineFactory,
    engine: OnceCell<EngineSlot>,
    queries_served: AtomicU64,
}

impl OracleClient {
    /// Client for the engine named in `config`. Nothing is loaded until first use.
    pub fn new(config: OracleConfig) -> Self {
        let factory = factory_from_config(&config.engine);
        Self::with_engine_factory(config, factory)
    }

    pub fn with_engine_factory(config: OracleConfig, factory: EngineFactory) -> Self {
        Self {
            config,
            factory,
            engine: OnceCell::new(),
            queries_served: AtomicU64::new(0),
        }
    }

    /// Client around an already-built engine.
    pub fn with_engine(config: OracleConfig, engine: impl DecisionEngine + 'static) -> Self {
        let slot = Mutex::new(Some(Box::new(engine) as Box<dyn DecisionEngine>));
        let factory: EngineFactory = Box::new(move || {
            slot.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .ok_or_else(|| {
                    OracleError::InitializationFailed("engine already consumed".to_string())
                })
        });
        Self::with_engine_factory(config, factory)
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    /// Initialize the engine if that has not happened yet. A failed
    /// initialization is remembered and returned to every later caller.
    pub fn ensure_ready(&self) -> Result<(), OracleError> {
        self.engine_slot().map(|_| ())
    }

    fn engine_slot(&self) -> Result<&Mutex<Box<dyn DecisionEngine>>, OracleError> {
        let slot = self.engine.get_or_init(|| {
            let started = Instant::now();
            match (self.factory)() {
                Ok(engine) => {
                    log::info!(
                        "[Oracle] engine '{}' ready in {:?}",
                        engine.name(),
                        started.elapsed()
                    );
                    Ok(Mutex::new(engine))
                }
                Err(e) => {
                    log::error!("[Oracle] engine initialization failed: {}", e);
                    Err(e)
                }
            }
        });
        slot.as_ref().map_err(Clone::clone)
    }

    /// Run one prompt through the engine and return the concatenated reply.
    ///
    /// Queries are mutually exclusive. Generation stops at end-of-sequence or
    /// after `max_reply_tokens` pieces; with a configured deadline the query
    /// fails with `Timeout` once a piece arrives past it.
    pub fn query(&self, prompt: &str, max_reply_tokens: usize) -> Result<String, OracleError> {
        let slot = self.engine_slot()?;
        let mut engine = slot.lock().map_err(|_| {
            OracleError::GenerationFailed("engine lock poisoned by a panicked query".to_string())
        })?;

        let started = Instant::now();
        let result = generate_reply(
            &mut **engine,
            prompt,
            max_reply_tokens,
            started,
            self.config.query_timeout(),
        );
        drop(engine);

        self.queries_served.fetch_add(1, Ordering::SeqCst);
        match &result {
            Ok(reply) => log::debug!(
                "[Oracle] {} prompt bytes -> {:?} in {:?}",
                prompt.len(),
                reply,
                started.elapsed()
            ),
            Err(e) => log::warn!("[Oracle] query failed after {:?}: {}", started.elapsed(), e),
        }
        result
    }

    /// Ask whether `event` may proceed for an object with the given history.
    pub fn decide(&self, type_tag: &str, history: &InteractionLog, event: EventKind) -> Decision {
        let preamble = interaction_log::system_preamble(type_tag);
        let prompt = interaction_log::render(&preamble, history, event);
        let decision = Decision::from_reply(self.query(&prompt, self.config.max_reply_tokens));
        log::debug!(
            "[Oracle] {}() on '{}' after {} records -> {}",
            event,
            type_tag,
            history.len(),
            decision.verdict
        );
        decision
    }

    /// Free-form question, outside of any lifecycle history.
    pub fn ask(&self, question: &str) -> Result<String, OracleError> {
        self.query(question, self.config.max_reply_tokens)
    }

    /// Engine invocations completed so far, failed ones included.
    pub fn queries_served(&self) -> u64 {
        self.queries_served.load(Ordering::SeqCst)
    }
}

fn generate_reply(
    engine: &mut dyn DecisionEngine,
    prompt: &str,
    max_reply_tokens: usize,
    started: Instant,
    timeout: Option<Duration>,
) -> Result<String, OracleError> {
    let mut reply = String::new();
    for piece in engine.generate(prompt, max_reply_tokens)?.take(max_reply_tokens) {
        reply.push_str(&piece?);
        if let Some(limit) = timeout {
            if started.elapsed() > limit {
                return Err(OracleError::Timeout(limit));
            }
        }
    }
    Ok(reply)
}

impl std::fmt::Debug for OracleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let engine = match self.engine.get() {
            None => "not initialized",
            Some(Ok(_)) => "ready",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("OracleClient")
            .field("engine", &engine)
            .field("queries_served", &self.queries_served())
            .finish()
    }
}

static GLOBAL_ORACLE: Lazy<RwLock<Option<Arc<OracleClient>>>> = Lazy::new(|| RwLock::new(None));

/// The process-wide client, created from `OracleConfig::load()` on first use.
///
/// An invalid configuration falls back to the defaults with a warning.
pub fn global() -> Arc<OracleClient> {
    if let Some(client) = GLOBAL_ORACLE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
    {
        return client.clone();
    }

    let mut slot = GLOBAL_ORACLE.write().unwrap_or_else(PoisonError::into_inner);
    slot.get_or_insert_with(|| {
        let config = OracleConfig::load().unwrap_or_else(|e| {
            log::warn!("[Oracle] invalid configuration ({}), using defaults", e);
            OracleConfig::default()
        });
        Arc::new(OracleClient::new(config))
    })
    .clone()
}

/// Replace the process-wide client, returning the previous one.
///
/// Handles keep the client they were created with.
pub fn install_global(client: Arc<OracleClient>) -> Option<Arc<OracleClient>> {
    GLOBAL_ORACLE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(client)
}

/// Drop the process-wide client; the next `global()` call builds a fresh one.
pub fn reset_global() -> Option<Arc<OracleClient>> {
    GLOBAL_ORACLE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
}
