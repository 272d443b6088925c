//! Local GGUF model engine using llama-cpp.
//!
//! The model is loaded once, when the owning `OracleClient` initializes its
//! engine. Every query gets a fresh session so no decode state leaks between
//! prompts. Sampling is greedy, so the same prompt gets the same verdict.
//!
//! Decoding runs on a llama.cpp worker thread that reports failures only by
//! closing its channel. A reply stream that ends before its first piece is
//! therefore reported as `GenerationFailed`.

use super::engine::{DecisionEngine, ReplyStream};
use crate::config::EngineConfig;
use crate::error::OracleError;
use llama_cpp::standard_sampler::StandardSampler;
use llama_cpp::{LlamaModel, LlamaParams, SessionParams};
use std::path::Path;

pub struct LlamaEngine {
    model_path: String,
    context_size: u32,
    model: LlamaModel,
}

impl LlamaEngine {
    pub fn load(config: &EngineConfig) -> Result<Self, OracleError> {
        if !Path::new(&config.model_path).exists() {
            return Err(OracleError::InitializationFailed(format!(
                "Model file not found: {}",
                config.model_path
            )));
        }

        log::info!(
            "[LlamaEngine] loading model from '{}' ({} gpu layers)",
            config.model_path,
            config.gpu_layers
        );
        let params = LlamaParams {
            n_gpu_layers: config.gpu_layers,
            ..LlamaParams::default()
        };
        let model = LlamaModel::load_from_file(&config.model_path, params)
            .map_err(|e| OracleError::InitializationFailed(e.to_string()))?;

        Ok(Self {
            model_path: config.model_path.clone(),
            context_size: config.context_size,
            model,
        })
    }
}

impl DecisionEngine for LlamaEngine {
    fn name(&self) -> &str {
        "llama"
    }

    fn generate<'a>(
        &'a mut self,
        prompt: &str,
        max_tokens: usize,
    ) -> Result<ReplyStream<'a>, OracleError> {
        let session_params = SessionParams {
            n_ctx: self.context_size,
            n_batch: self.context_size,
            ..SessionParams::default()
        };
        let mut session = self
            .model
            .create_session(session_params)
            .map_err(|e| OracleError::GenerationFailed(format!("session: {}", e)))?;

        session
            .advance_context(prompt)
            .map_err(|e| OracleError::GenerationFailed(format!("prompt decode: {}", e)))?;

        let completions = session
            .start_completing_with(StandardSampler::new_greedy(), max_tokens)
            .map_err(|e| OracleError::GenerationFailed(format!("sampling: {}", e)))?;

        let mut pieces = completions.into_strings().peekable();
        if pieces.peek().is_none() {
            return Err(OracleError::GenerationFailed(
                "model produced no reply".to_string(),
            ));
        }
        Ok(Box::new(pieces.map(Ok::<String, OracleError>)))
    }
}

impl std::fmt::Debug for LlamaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlamaEngine")
            .field("model_path", &self.model_path)
            .field("context_size", &self.context_size)
            .finish()
    }
}
