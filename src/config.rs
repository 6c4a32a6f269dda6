//! Pipeline tuning knobs and the command-line surface that sets them.

use clap::{Args, Parser};
use std::path::PathBuf;
use std::time::Duration;

use crate::embedder::OllamaEmbedder;
use crate::error::Result;
use crate::providers::OllamaChat;

/// Tunable knobs that bound pipeline behavior.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    sig_k: usize,
    kb_k: usize,
    temperature: f32,
    max_tokens: usize,
    stage_delay: Duration,
}

impl PipelineSettings {
    /// Constructs a new set of pipeline settings.
    pub fn new(
        sig_k: usize,
        kb_k: usize,
        temperature: f32,
        max_tokens: usize,
        stage_delay: Duration,
    ) -> Self {
        Self {
            sig_k: sig_k.max(1),
            kb_k: kb_k.max(1),
            temperature,
            max_tokens: max_tokens.max(1),
            stage_delay,
        }
    }

    /// Number of sig examples retrieved per translation.
    pub fn sig_k(&self) -> usize {
        self.sig_k
    }

    /// Number of knowledge-base facts retrieved per validation.
    pub fn kb_k(&self) -> usize {
        self.kb_k
    }

    /// Sampling temperature for model calls.
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Token cap for each model answer.
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Pause between stages so a live audience can follow along.
    pub fn stage_delay(&self) -> Duration {
        self.stage_delay
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            sig_k: 3,
            kb_k: 3,
            temperature: 0.1,
            max_tokens: 256,
            stage_delay: Duration::ZERO,
        }
    }
}

/// Connection settings for the local model runtime, shared by every binary.
#[derive(Args, Debug, Clone)]
pub struct RuntimeArgs {
    /// Base URL of the local Ollama-compatible runtime
    #[arg(long, env = "MEDWIZ_OLLAMA_URL", default_value = "http://127.0.0.1:11434")]
    pub ollama_url: String,

    /// Embedding model identifier
    #[arg(long, env = "MEDWIZ_EMBED_MODEL", default_value = "llama3.2")]
    pub embed_model: String,

    /// Max seconds to wait for each embedding request
    #[arg(long, env = "MEDWIZ_EMBED_TIMEOUT_SECS", default_value_t = 30)]
    pub embed_timeout_secs: u64,

    /// Attempts per embedding request (1 disables retries)
    #[arg(long, env = "MEDWIZ_EMBED_MAX_RETRIES", default_value_t = 1)]
    pub embed_max_retries: usize,

    /// Max texts per embedding request
    #[arg(long, env = "MEDWIZ_EMBED_BATCH", default_value_t = 16)]
    pub embed_batch_size: usize,
}

impl RuntimeArgs {
    /// Builds the embedding client these arguments describe.
    pub fn build_embedder(&self) -> Result<OllamaEmbedder> {
        OllamaEmbedder::new(
            &self.ollama_url,
            self.embed_model.clone(),
            Duration::from_secs(self.embed_timeout_secs.max(1)),
            self.embed_max_retries,
            self.embed_batch_size,
        )
    }
}

/// Stage pause used by the demo binary unless overridden.
pub const DEMO_STAGE_DELAY_MS: u64 = 2_000;

/// Command-line interface of the pipeline driver.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "medwiz-pipeline",
    about = "Translate and validate prescription sigs with a local model"
)]
pub struct Cli {
    /// JSONL file of prescriptions to process
    #[arg(long, env = "MEDWIZ_INPUT", default_value = "data/input_sigs.jsonl")]
    pub input: PathBuf,

    /// Pre-built sig example index
    #[arg(long, env = "MEDWIZ_SIG_INDEX", default_value = "indexes/sig_examples.jsonl")]
    pub sig_index: PathBuf,

    /// Pre-built knowledge-base index
    #[arg(long, env = "MEDWIZ_KB_INDEX", default_value = "indexes/knowledge_base.jsonl")]
    pub kb_index: PathBuf,

    /// Results snapshot read by the display process
    #[arg(long, env = "MEDWIZ_OUTPUT", default_value = "data/results.jsonl")]
    pub output: PathBuf,

    /// Chat model identifier
    #[arg(long, env = "MEDWIZ_CHAT_MODEL", default_value = "llama3.2")]
    pub chat_model: String,

    /// Max seconds to wait for each model answer
    #[arg(long, env = "MEDWIZ_CHAT_TIMEOUT_SECS", default_value_t = 120)]
    pub chat_timeout_secs: u64,

    /// Sig examples retrieved per translation
    #[arg(long, env = "MEDWIZ_SIG_K", default_value_t = 3)]
    pub sig_k: usize,

    /// Knowledge-base facts retrieved per validation
    #[arg(long, env = "MEDWIZ_KB_K", default_value_t = 3)]
    pub kb_k: usize,

    /// Sampling temperature
    #[arg(long, env = "MEDWIZ_TEMPERATURE", default_value_t = 0.1)]
    pub temperature: f32,

    /// Max tokens generated per answer
    #[arg(long, env = "MEDWIZ_MAX_TOKENS", default_value_t = 256)]
    pub max_tokens: usize,

    /// Milliseconds to pause between stages so a live audience can follow (0 disables)
    #[arg(long, env = "MEDWIZ_STAGE_DELAY_MS", default_value_t = DEMO_STAGE_DELAY_MS)]
    pub stage_delay_ms: u64,

    /// Keep watching the input file and process prescriptions appended to it
    #[arg(long, env = "MEDWIZ_FOLLOW_INPUT")]
    pub follow_input: bool,

    /// Seconds between checks of the input file in follow mode
    #[arg(long, env = "MEDWIZ_POLL_SECS", default_value_t = 2)]
    pub poll_secs: u64,

    /// Connection settings for the local model runtime
    #[command(flatten)]
    pub runtime: RuntimeArgs,
}

impl Cli {
    /// Converts the parsed CLI into `PipelineSettings`.
    pub fn build_settings(&self) -> PipelineSettings {
        PipelineSettings::new(
            self.sig_k,
            self.kb_k,
            self.temperature,
            self.max_tokens,
            Duration::from_millis(self.stage_delay_ms),
        )
    }

    /// Interval between input file checks in follow mode.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs.max(1))
    }

    /// Builds the chat client for the configured model.
    pub fn build_chat(&self) -> Result<OllamaChat> {
        OllamaChat::new(
            &self.runtime.ollama_url,
            self.chat_model.clone(),
            Duration::from_secs(self.chat_timeout_secs.max(1)),
        )
    }
}
