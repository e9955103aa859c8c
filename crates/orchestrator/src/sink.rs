//! Sink implementations for callers that do not stream.

use async_trait::async_trait;
use std::sync::Mutex;

use domain::contracts::{Sink, StageSummary};
use domain::envelope::Envelope;

/// Buffers chunks into a string and keeps the final envelope; the core's
/// own implementation for non-streaming callers.
#[derive(Default)]
pub struct BufferingSink {
    buffer: Mutex<String>,
    stages: Mutex<Vec<StageSummary>>,
    done: Mutex<Option<Envelope>>,
}

impl BufferingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffered(&self) -> String {
        self.buffer.lock().expect("buffer lock poisoned").clone()
    }

    pub fn stages(&self) -> Vec<StageSummary> {
        self.stages.lock().expect("stages lock poisoned").clone()
    }

    pub fn envelope(&self) -> Option<Envelope> {
        self.done.lock().expect("done lock poisoned").clone()
    }
}

#[async_trait]
impl Sink for BufferingSink {
    async fn on_chunk(&self, text: &str) {
        self.buffer.lock().expect("buffer lock poisoned").push_str(text);
    }

    async fn on_stage_complete(&self, summary: StageSummary) {
        self.stages.lock().expect("stages lock poisoned").push(summary);
    }

    async fn on_done(&self, envelope: &Envelope) {
        *self.done.lock().expect("done lock poisoned") = Some(envelope.clone());
    }
}

/// Buffering sink that additionally asks providers to stream, for callers
/// that want chunk callbacks and the aggregate.
#[derive(Default)]
pub struct StreamingSink {
    inner: BufferingSink,
}

impl StreamingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffered(&self) -> String {
        self.inner.buffered()
    }

    pub fn stages(&self) -> Vec<StageSummary> {
        self.inner.stages()
    }

    pub fn envelope(&self) -> Option<Envelope> {
        self.inner.envelope()
    }
}

#[async_trait]
impl Sink for StreamingSink {
    fn wants_stream(&self) -> bool {
        true
    }

    async fn on_chunk(&self, text: &str) {
        self.inner.on_chunk(text).await;
    }

    async fn on_stage_complete(&self, summary: StageSummary) {
        self.inner.on_stage_complete(summary).await;
    }

    async fn on_done(&self, envelope: &Envelope) {
        self.inner.on_done(envelope).await;
    }
}
