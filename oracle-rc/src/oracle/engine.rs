//! Decision engines: the opaque text-in/text-out collaborator behind an `OracleClient`.

use crate::config::{EngineConfig, EngineKind};
use crate::error::OracleError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Stream of reply pieces (tokens rendered to text). Ends at end-of-sequence.
pub type ReplyStream<'a> = Box<dyn Iterator<Item = Result<String, OracleError>> + 'a>;

/// A stateful, non-reentrant text generator.
///
/// Implementations are only ever driven by one caller at a time; `OracleClient`
/// holds them behind its engine mutex.
pub trait DecisionEngine: Send {
    fn name(&self) -> &str;

    /// Consume the prompt and start producing reply pieces. At most
    /// `max_tokens` pieces are read from the returned stream.
    fn generate<'a>(&'a mut self, prompt: &str, max_tokens: usize)
        -> Result<ReplyStream<'a>, OracleError>;
}

/// Builds the engine once, on first use.
pub type EngineFactory =
    Box<dyn Fn() -> Result<Box<dyn DecisionEngine>, OracleError> + Send + Sync>;

/// Factory for the engine named by `config`.
pub fn factory_from_config(config: &EngineConfig) -> EngineFactory {
    let config = config.clone();
    Box::new(move || build_engine(&config))
}

fn build_engine(config: &EngineConfig) -> Result<Box<dyn DecisionEngine>, OracleError> {
    match config.kind {
        EngineKind::Stub => Ok(Box::new(StubEngine::new(config.stub_reply.clone()))),
        #[cfg(feature = "llama")]
        EngineKind::Llama => Ok(Box::new(super::llama::LlamaEngine::load(config)?)),
        #[cfg(not(feature = "llama"))]
        EngineKind::Llama => Err(OracleError::InitializationFailed(
            "llama engine requested but oracle-rc was built without the `llama` feature"
                .to_string(),
        )),
    }
}

/// Deterministic engine that answers every prompt with the same reply.
#[derive(Debug, Clone)]
pub struct StubEngine {
    reply: String,
}

impl StubEngine {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

impl DecisionEngine for StubEngine {
    fn name(&self) -> &str {
        "stub"
    }

    fn generate<'a>(
        &'a mut self,
        _prompt: &str,
        _max_tokens: usize,
    ) -> Result<ReplyStream<'a>, OracleError> {
        Ok(Box::new(
            split_pieces(&self.reply)
                .into_iter()
                .map(Ok::<String, OracleError>),
        ))
    }
}

/// Splits text into word-sized pieces, keeping the separators attached.
fn split_pieces(text: &str) -> Vec<String> {
    text.split_inclusive(char::is_whitespace)
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<Result<String, OracleError>>,
    fallback: String,
    prompts: Vec<String>,
    piece_delay: Option<Duration>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Engine driven by a queue of canned replies; records every prompt it sees.
///
/// Clones share state, so a test can keep one clone for inspection after
/// moving another into an `OracleClient`. When the queue is empty the
/// fallback reply is used.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEngine {
    script: Arc<Mutex<Script>>,
}

impl ScriptedEngine {
    /// Empty queue, fallback reply `false`.
    pub fn new() -> Self {
        Self::always("false")
    }

    pub fn always(reply: impl Into<String>) -> Self {
        let engine = Self::default();
        engine.script().fallback = reply.into();
        engine
    }

    pub fn push_reply(&self, reply: impl Into<String>) -> &Self {
        self.script().replies.push_back(Ok(reply.into()));
        self
    }

    pub fn push_error(&self, error: OracleError) -> &Self {
        self.script().replies.push_back(Err(error));
        self
    }

    /// Sleep between reply pieces, to exercise deadlines and contention.
    pub fn with_piece_delay(self, delay: Duration) -> Self {
        self.script().piece_delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.script().prompts.clone()
    }

    pub fn calls(&self) -> usize {
        self.script().prompts.len()
    }

    /// Highest number of overlapping `generate` calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.script().max_in_flight
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DecisionEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate<'a>(
        &'a mut self,
        prompt: &str,
        _max_tokens: usize,
    ) -> Result<ReplyStream<'a>, OracleError> {
        let (reply, delay) = {
            let mut script = self.script();
            script.in_flight += 1;
            script.max_in_flight = script.max_in_flight.max(script.in_flight);
            script.prompts.push(prompt.to_string());
            let reply = match script.replies.pop_front() {
                Some(reply) => reply,
                None => Ok(script.fallback.clone()),
            };
            (reply, script.piece_delay)
        };

        let pieces = match reply {
            Ok(text) => split_pieces(&text),
            Err(e) => {
                self.script().in_flight -= 1;
                return Err(e);
            }
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.script().in_flight -= 1;

        Ok(Box::new(pieces.into_iter().map(move |piece| {
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
            Ok(piece)
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn collect(stream: ReplyStream<'_>) -> String {
        stream.map(|p| p.unwrap()).collect()
    }

    #[test]
    fn test_stub_engine_repeats_reply() {
        let mut engine = StubEngine::new("true\n");
        assert_eq!(collect(engine.generate("a", 20).unwrap()), "true\n");
        assert_eq!(collect(engine.generate("b", 20).unwrap()), "true\n");
    }

    #[test]
    fn test_split_pieces_is_lossless() {
        let text = "  maybe\r\ntrue  later ";
        assert_eq!(split_pieces(text).concat(), text);
        assert!(split_pieces("").is_empty());
    }

    #[test]
    fn test_scripted_engine_queue_then_fallback() {
        let engine = ScriptedEngine::always("false");
        engine.push_reply("true");
        engine.push_error(OracleError::GenerationFailed("decode".to_string()));

        let mut driver = engine.clone();
        assert_eq!(collect(driver.generate("p1", 20).unwrap()), "true");
        assert!(driver.generate("p2", 20).is_err());
        assert_eq!(collect(driver.generate("p3", 20).unwrap()), "false");

        assert_eq!(engine.prompts(), vec!["p1", "p2", "p3"]);
        assert_eq!(engine.calls(), 3);
    }

    #[test]
    fn test_factory_without_llama_feature_fails_init() {
        let config = EngineConfig {
            kind: EngineKind::Llama,
            ..EngineConfig::default()
        };
        let result = factory_from_config(&config)();
        if cfg!(feature = "llama") {
            // the default model path does not exist in the test environment
            assert!(result.is_err());
        } else {
            assert!(matches!(
                result,
                Err(OracleError::InitializationFailed(_))
            ));
        }
    }
}
