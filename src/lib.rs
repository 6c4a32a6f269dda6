#![warn(missing_docs)]
//! Core library for the medwiz prescription sig pipeline.

pub mod classifier;
pub mod config;
pub mod embedder;
pub mod error;
pub mod index;
pub mod knowledge;
pub mod logging;
pub mod parser;
pub mod pipeline;
pub mod prompt;
pub mod providers;
pub mod record;
pub mod sig;

pub use classifier::classify;
pub use config::{Cli, PipelineSettings, RuntimeArgs};
pub use embedder::{Embedder, OllamaEmbedder};
pub use error::{PipelineError, Result};
pub use index::{IndexEntry, Scored, SimilarityIndex};
pub use knowledge::{DoseRange, KnowledgeFact};
pub use pipeline::{
    append_input, load_inputs, Pipeline, PipelineObserver, RecordSink, ResultsTable, RunSummary,
    Silent, SnapshotWriter,
};
pub use prompt::{PromptComposer, PromptMode, PromptTask};
pub use providers::{LlmProvider, OllamaChat, ProviderRequest};
pub use record::{ModelVerdict, Outcome, PipelineRecord, SigInput, Stage, ValidationVerdict};
pub use sig::{DoseUnit, SigExample, StructuredSig, Translation};
