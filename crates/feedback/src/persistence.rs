//! Durable form of the ledger: a JSONL append log plus periodic JSON
//! snapshots tagged with the last log offset they subsume.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use common::errors::OutcomeErrorKind;
use domain::contracts::{AppendLog, SnapshotStore};
use domain::features::FeatureBucket;
use domain::outcome::Outcome;
use domain::provider::ProviderId;
use uuid::Uuid;

/// One line of the JSONL feedback log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub v: u32,
    pub ts: u64,
    pub plan_id: Uuid,
    pub provider: String,
    #[serde(default)]
    pub attempt: u32,
    pub features: Vec<String>,
    pub success: bool,
    pub rating: f64,
    pub latency_ms: u64,
    pub cost_usd: f64,
    pub quality_score: f64,
    pub error_kind: Option<String>,
}

impl From<&Outcome> for LedgerRecord {
    fn from(outcome: &Outcome) -> Self {
        Self {
            v: 1,
            ts: outcome.ts_ms,
            plan_id: outcome.plan_id,
            provider: outcome.provider.to_string(),
            attempt: outcome.attempt,
            features: vec![
                outcome.bucket.domain.as_str().to_string(),
                outcome.bucket.complexity.as_str().to_string(),
            ],
            success: outcome.success,
            rating: outcome.rating,
            latency_ms: outcome.latency_ms,
            cost_usd: outcome.cost_usd,
            quality_score: outcome.quality_score,
            error_kind: outcome.error_kind.map(|k| k.as_str().to_string()),
        }
    }
}

impl LedgerRecord {
    /// Rebuild the in-memory outcome. Records with unknown feature strings
    /// fail; the replay path skips them with a warning.
    pub fn to_outcome(&self) -> Result<Outcome, String> {
        if self.features.len() != 2 {
            return Err(format!("expected two feature entries, got {}", self.features.len()));
        }
        let bucket: FeatureBucket = format!("{}/{}", self.features[0], self.features[1]).parse()?;
        let error_kind = match self.error_kind.as_deref() {
            None => None,
            Some("network") => Some(OutcomeErrorKind::Network),
            Some("rateLimited") => Some(OutcomeErrorKind::RateLimited),
            Some("auth") => Some(OutcomeErrorKind::Auth),
            Some("server") => Some(OutcomeErrorKind::Server),
            Some("bad_input") => Some(OutcomeErrorKind::BadInput),
            Some("cancelled") => Some(OutcomeErrorKind::Cancelled),
            Some(other) => return Err(format!("unknown error kind `{other}`")),
        };
        Ok(Outcome {
            plan_id: self.plan_id,
            provider: ProviderId::new(&self.provider),
            bucket,
            attempt: self.attempt,
            success: self.success,
            rating: self.rating,
            latency_ms: self.latency_ms,
            cost_usd: self.cost_usd,
            quality_score: self.quality_score,
            error_kind,
            ts_ms: self.ts,
        })
    }
}

struct LogState {
    /// Offset of the first line currently in the file.
    base_offset: u64,
    lines: u64,
}

/// JSONL file-backed append log. A sidecar `<path>.base` records the offset
/// of the first retained line so offsets survive compaction and restarts.
pub struct JsonlLog {
    path: PathBuf,
    base_path: PathBuf,
    state: Mutex<LogState>,
}

impl JsonlLog {
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let base_path = path.with_extension("jsonl.base");
        let base_offset = match fs::read_to_string(&base_path).await {
            Ok(text) => text.trim().parse::<u64>().unwrap_or(0),
            Err(_) => 0,
        };
        let lines = match fs::read_to_string(&path).await {
            Ok(text) => text.lines().filter(|l| !l.trim().is_empty()).count() as u64,
            Err(_) => 0,
        };
        Ok(Self {
            path,
            base_path,
            state: Mutex::new(LogState { base_offset, lines }),
        })
    }

    async fn persist_base(&self, base_offset: u64) -> anyhow::Result<()> {
        fs::write(&self.base_path, base_offset.to_string()).await?;
        Ok(())
    }
}

#[async_trait]
impl AppendLog for JsonlLog {
    async fn append(&self, line: &str) -> anyhow::Result<u64> {
        let mut state = self.state.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        let offset = state.base_offset + state.lines;
        state.lines += 1;
        Ok(offset)
    }

    async fn read_from(&self, offset: u64) -> anyhow::Result<Vec<(u64, String)>> {
        let state = self.state.lock().await;
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        Ok(text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .enumerate()
            .map(|(i, line)| (state.base_offset + i as u64, line.to_string()))
            .filter(|(o, _)| *o >= offset)
            .collect())
    }

    async fn truncate_through(&self, offset: u64) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if offset < state.base_offset {
            return Ok(());
        }
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let keep: Vec<&str> = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .enumerate()
            .filter(|(i, _)| state.base_offset + *i as u64 > offset)
            .map(|(_, line)| line)
            .collect();

        let mut body = keep.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        fs::write(&self.path, body).await?;
        state.lines = keep.len() as u64;
        state.base_offset = offset + 1;
        drop(state);
        self.persist_base(offset + 1).await?;
        debug!(through = offset, "compacted feedback log");
        Ok(())
    }
}

/// Snapshot file that atomically replaces its predecessor.
pub struct FileSnapshots {
    path: PathBuf,
}

impl FileSnapshots {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshots {
    async fn save(&self, snapshot: &serde_json::Value) -> anyhow::Result<()> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn load(&self) -> anyhow::Result<Option<serde_json::Value>> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-memory doubles used by tests and benchmarks.
pub mod memory {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    pub struct MemoryLog {
        state: StdMutex<(u64, Vec<(u64, String)>)>,
    }

    #[async_trait]
    impl AppendLog for MemoryLog {
        async fn append(&self, line: &str) -> anyhow::Result<u64> {
            let mut state = self.state.lock().expect("log lock poisoned");
            let offset = state.0;
            state.0 += 1;
            state.1.push((offset, line.to_string()));
            Ok(offset)
        }

        async fn read_from(&self, offset: u64) -> anyhow::Result<Vec<(u64, String)>> {
            let state = self.state.lock().expect("log lock poisoned");
            Ok(state.1.iter().filter(|(o, _)| *o >= offset).cloned().collect())
        }

        async fn truncate_through(&self, offset: u64) -> anyhow::Result<()> {
            let mut state = self.state.lock().expect("log lock poisoned");
            state.1.retain(|(o, _)| *o > offset);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct MemorySnapshots {
        value: StdMutex<Option<serde_json::Value>>,
    }

    #[async_trait]
    impl SnapshotStore for MemorySnapshots {
        async fn save(&self, snapshot: &serde_json::Value) -> anyhow::Result<()> {
            *self.value.lock().expect("snapshot lock poisoned") = Some(snapshot.clone());
            Ok(())
        }

        async fn load(&self) -> anyhow::Result<Option<serde_json::Value>> {
            Ok(self.value.lock().expect("snapshot lock poisoned").clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::features::{Complexity, TaskDomain};

    #[test]
    fn record_schema_uses_camel_case_fields() {
        let outcome = Outcome::success(
            Uuid::new_v4(),
            ProviderId::new("p1"),
            FeatureBucket::new(TaskDomain::Code, Complexity::Complex),
            200,
            0.003,
            0.9,
            1_234,
        );
        let record = LedgerRecord::from(&outcome);
        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["v"], 1);
        assert_eq!(json["planId"], serde_json::json!(outcome.plan_id));
        assert!(json["latencyMs"].is_number());
        assert!(json["costUsd"].is_number());
        assert_eq!(json["features"], serde_json::json!(["code", "complex"]));
        assert_eq!(json["errorKind"], serde_json::Value::Null);
    }

    #[test]
    fn record_roundtrips_to_outcome() {
        let outcome = Outcome::failure(
            Uuid::new_v4(),
            ProviderId::new("p2"),
            FeatureBucket::new(TaskDomain::General, Complexity::Simple),
            50,
            OutcomeErrorKind::RateLimited,
            99,
        );
        let record = LedgerRecord::from(&outcome);
        let restored = record.to_outcome().expect("roundtrip");
        assert_eq!(restored.provider, outcome.provider);
        assert_eq!(restored.bucket, outcome.bucket);
        assert_eq!(restored.error_kind, outcome.error_kind);
    }

    #[tokio::test]
    async fn jsonl_log_offsets_survive_compaction() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = JsonlLog::open(dir.path().join("feedback.jsonl")).await.expect("open");

        for i in 0..5 {
            let offset = log.append(&format!("{{\"i\":{i}}}")).await.expect("append");
            assert_eq!(offset, i);
        }

        log.truncate_through(2).await.expect("truncate");
        let rest = log.read_from(0).await.expect("read");
        let offsets: Vec<u64> = rest.iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets, vec![3, 4]);

        // New appends continue the numbering.
        let next = log.append("{\"i\":5}").await.expect("append");
        assert_eq!(next, 5);
    }

    #[tokio::test]
    async fn jsonl_log_reopens_with_stable_offsets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("feedback.jsonl");
        {
            let log = JsonlLog::open(&path).await.expect("open");
            log.append("{\"i\":0}").await.expect("append");
            log.append("{\"i\":1}").await.expect("append");
            log.truncate_through(0).await.expect("truncate");
        }
        let log = JsonlLog::open(&path).await.expect("reopen");
        let next = log.append("{\"i\":2}").await.expect("append");
        assert_eq!(next, 2);
    }

    #[tokio::test]
    async fn snapshot_store_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileSnapshots::new(dir.path().join("rollup.json"));
        assert!(store.load().await.expect("load").is_none());

        let value = serde_json::json!({"offset": 7, "profiles": []});
        store.save(&value).await.expect("save");
        assert_eq!(store.load().await.expect("load"), Some(value));
    }
}
