//! Scripted adapters and registry fixtures shared by unit and integration
//! tests across the workspace.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use common::errors::ProviderError;
use domain::contracts::{AdapterCall, AdapterReply, ProviderAdapter, TokenUsage};
use domain::provider::{Capability, CostModel, ProviderId};

use crate::registry::ProviderDescriptor;

/// One scripted step of an adapter's behavior.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    Reply {
        content: String,
        delay: Duration,
        output_tokens: u32,
    },
    Fail {
        error: ProviderError,
        delay: Duration,
    },
}

impl ScriptedStep {
    pub fn reply(content: &str) -> Self {
        Self::Reply {
            content: content.to_string(),
            delay: Duration::ZERO,
            output_tokens: content.len() as u32 / 4,
        }
    }

    pub fn reply_after(content: &str, delay: Duration) -> Self {
        Self::Reply {
            content: content.to_string(),
            delay,
            output_tokens: content.len() as u32 / 4,
        }
    }

    pub fn fail(error: ProviderError) -> Self {
        Self::Fail {
            error,
            delay: Duration::ZERO,
        }
    }
}

/// Adapter that plays back a script, then repeats a default reply.
pub struct ScriptedAdapter {
    script: Mutex<VecDeque<ScriptedStep>>,
    default_content: String,
    default_delay: Duration,
    calls: AtomicU32,
}

impl ScriptedAdapter {
    pub fn replying(content: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_content: content.to_string(),
            default_delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub fn replying_after(content: &str, delay: Duration) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_content: content.to_string(),
            default_delay: delay,
            calls: AtomicU32::new(0),
        }
    }

    pub fn scripted(steps: Vec<ScriptedStep>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            default_content: "scripted default".to_string(),
            default_delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    /// How many times `generate`/`stream` ran.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> ScriptedStep {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .expect("script lock poisoned")
            .pop_front()
            .unwrap_or_else(|| ScriptedStep::Reply {
                content: self.default_content.clone(),
                delay: self.default_delay,
                output_tokens: self.default_content.len() as u32 / 4,
            })
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    async fn generate(&self, call: AdapterCall) -> Result<AdapterReply, ProviderError> {
        match self.next_step() {
            ScriptedStep::Reply {
                content,
                delay,
                output_tokens,
            } => {
                tokio::time::sleep(delay).await;
                Ok(AdapterReply {
                    content,
                    usage: TokenUsage {
                        input_tokens: call.prompt.len() as u32 / 4,
                        output_tokens,
                    },
                    latency_ms: delay.as_millis() as u64,
                })
            }
            ScriptedStep::Fail { error, delay } => {
                tokio::time::sleep(delay).await;
                Err(error)
            }
        }
    }

    async fn stream(
        &self,
        call: AdapterCall,
        chunks: mpsc::Sender<String>,
    ) -> Result<AdapterReply, ProviderError> {
        match self.next_step() {
            ScriptedStep::Reply {
                content,
                delay,
                output_tokens,
            } => {
                // Emit word-sized chunks with the delay spread across them
                // so cancellation tests can interrupt mid-stream.
                let words: Vec<&str> = content.split_inclusive(' ').collect();
                let pause = if words.is_empty() {
                    delay
                } else {
                    delay / words.len() as u32
                };
                for word in &words {
                    tokio::time::sleep(pause).await;
                    if chunks.send((*word).to_string()).await.is_err() {
                        break;
                    }
                }
                Ok(AdapterReply {
                    content,
                    usage: TokenUsage {
                        input_tokens: call.prompt.len() as u32 / 4,
                        output_tokens,
                    },
                    latency_ms: delay.as_millis() as u64,
                })
            }
            ScriptedStep::Fail { error, delay } => {
                tokio::time::sleep(delay).await;
                Err(error)
            }
        }
    }
}

/// Descriptor fixture with a blended per-1k cost of `cost_per_1k`.
pub fn descriptor(id: &str, capabilities: &[Capability], cost_per_1k: f64) -> ProviderDescriptor {
    ProviderDescriptor {
        id: ProviderId::new(id),
        display_name: id.to_uppercase(),
        default_model: format!("{id}-default"),
        capabilities: capabilities.iter().copied().collect::<BTreeSet<_>>(),
        cost_model: CostModel::new(cost_per_1k, cost_per_1k),
        priority: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::errors::ProviderErrorKind;

    #[tokio::test]
    async fn scripted_steps_play_in_order_then_default() {
        let adapter = ScriptedAdapter::scripted(vec![
            ScriptedStep::fail(ProviderError::network("reset")),
            ScriptedStep::reply("second"),
        ]);

        let call = AdapterCall::new("hi", "m");
        let first = adapter.generate(call.clone()).await;
        assert_eq!(
            first.expect_err("scripted failure").kind,
            ProviderErrorKind::Network
        );
        let second = adapter.generate(call.clone()).await.expect("reply");
        assert_eq!(second.content, "second");
        let third = adapter.generate(call).await.expect("default");
        assert_eq!(third.content, "scripted default");
        assert_eq!(adapter.call_count(), 3);
    }

    #[tokio::test]
    async fn stream_preserves_chunk_order() {
        let adapter = ScriptedAdapter::replying("alpha beta gamma");
        let (tx, mut rx) = mpsc::channel(16);
        adapter
            .stream(AdapterCall::new("hi", "m"), tx)
            .await
            .expect("stream");

        let mut collected = String::new();
        while let Some(chunk) = rx.recv().await {
            collected.push_str(&chunk);
        }
        assert_eq!(collected, "alpha beta gamma");
    }
}
