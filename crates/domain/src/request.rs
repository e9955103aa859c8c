//! Incoming request model. Immutable after creation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Quick,
    Technical,
    Creative,
    Structured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    General,
    Code,
    Creative,
    Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
        }
    }
}

/// Explicit caller choice of provider (and optionally model). Routing does
/// not second-guess it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderOverride {
    pub provider: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetTier {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub prompt: String,
    pub mode: Mode,
    pub task_type: TaskType,
    pub history: Vec<ChatTurn>,
    pub provider_override: Option<ProviderOverride>,
    pub budget_tier: BudgetTier,
    pub quality_threshold: f64,
    pub session_id: Option<String>,
}

impl Request {
    pub fn new(prompt: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.to_string(),
            mode: Mode::Quick,
            task_type: TaskType::General,
            history: Vec::new(),
            provider_override: None,
            budget_tier: BudgetTier::Medium,
            quality_threshold: 0.7,
            session_id: None,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_override(mut self, provider: &str, model: Option<&str>) -> Self {
        self.provider_override = Some(ProviderOverride {
            provider: provider.to_string(),
            model: model.map(str::to_string),
        });
        self
    }

    pub fn with_budget_tier(mut self, tier: BudgetTier) -> Self {
        self.budget_tier = tier;
        self
    }

    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }
}
