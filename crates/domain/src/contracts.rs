//! Capability traits the core consumes from external collaborators:
//! provider adapters, the append-only persistence pair, stage scorers, and
//! the streaming sink handed in by callers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::envelope::Envelope;
use crate::plan::StageKind;
use crate::request::ChatTurn;
use common::errors::ProviderError;

/// Input to one provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterCall {
    pub prompt: String,
    pub system: Option<String>,
    pub history: Vec<ChatTurn>,
    pub model: String,
    pub max_tokens: Option<u32>,
}

impl AdapterCall {
    pub fn new(prompt: &str, model: &str) -> Self {
        Self {
            prompt: prompt.to_string(),
            system: None,
            history: Vec::new(),
            model: model.to_string(),
            max_tokens: None,
        }
    }

    pub fn with_system(mut self, system: &str) -> Self {
        self.system = Some(system.to_string());
        self
    }

    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Result of one provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterReply {
    pub content: String,
    pub usage: TokenUsage,
    pub latency_ms: u64,
}

/// HTTP provider clients live outside the core; this is the capability the
/// execution engine consumes. Implementations must abort promptly when the
/// calling task is cancelled (every await inside is a cancellation point).
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn generate(&self, call: AdapterCall) -> Result<AdapterReply, ProviderError>;

    /// Streaming variant; chunks are delivered in provider order on
    /// `chunks` and the full reply is returned at the end. The default
    /// implementation degrades to a single chunk.
    async fn stream(
        &self,
        call: AdapterCall,
        chunks: mpsc::Sender<String>,
    ) -> Result<AdapterReply, ProviderError> {
        let reply = self.generate(call).await?;
        let _ = chunks.send(reply.content.clone()).await;
        Ok(reply)
    }
}

/// Append-only record log. Offsets are record indices, stable for the
/// lifetime of the log; compaction truncates a prefix without renumbering.
#[async_trait]
pub trait AppendLog: Send + Sync {
    /// Append one record, returning its offset.
    async fn append(&self, line: &str) -> anyhow::Result<u64>;

    /// Read all records at `offset` and later.
    async fn read_from(&self, offset: u64) -> anyhow::Result<Vec<(u64, String)>>;

    /// Drop every record with offset ≤ `offset` (after a snapshot subsumed
    /// them). Later offsets are preserved.
    async fn truncate_through(&self, offset: u64) -> anyhow::Result<()>;
}

/// Periodic durability for derived state.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &serde_json::Value) -> anyhow::Result<()>;
    async fn load(&self) -> anyhow::Result<Option<serde_json::Value>>;
}

/// Pluggable stage quality scorer for validation loops. Returns `[0, 1]`.
/// Concrete implementations must document their own scoring contract.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, stage: StageKind, prompt: &str, output: &str) -> f64;
}

/// Summary emitted after each completed stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: String,
    pub provider: String,
    pub latency_ms: u64,
    pub score: Option<f64>,
}

/// Streaming callback set handed in by the caller. For non-streaming
/// callers a buffering implementation collects chunks and only the final
/// envelope matters.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Whether the caller wants incremental chunks. When false the engine
    /// may skip provider streaming entirely.
    fn wants_stream(&self) -> bool {
        false
    }

    async fn on_chunk(&self, text: &str);

    async fn on_stage_complete(&self, summary: StageSummary);

    async fn on_done(&self, envelope: &Envelope);
}
