//! Execution plans produced by the routing policy.
//!
//! A plan is immutable once constructed: fields are private and only
//! readable through accessors. The constructors enforce the shape
//! invariants (ensembles need at least two providers, validation loops at
//! least two stages), so the execution engine never sees a malformed plan.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::features::FeatureBucket;
use crate::provider::ProviderId;
use common::errors::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Generate,
    Review,
    Test,
    Optimize,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Review => "review",
            Self::Test => "test",
            Self::Optimize => "optimize",
        }
    }
}

/// Provider assignment for one validation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageAssignment {
    pub stage: StageKind,
    pub provider: ProviderId,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Single,
    Ensemble,
    ValidationLoop,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Ensemble => "ensemble",
            Self::ValidationLoop => "validation_loop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanShape {
    Single {
        provider: ProviderId,
        model: String,
    },
    Ensemble {
        providers: Vec<(ProviderId, String)>,
        synthesize: bool,
        min_responses: usize,
        timeout_ms: u64,
    },
    ValidationLoop {
        stages: Vec<StageAssignment>,
        min_confidence: f64,
        max_retries: u32,
        skip_optimize: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    id: Uuid,
    request_id: Uuid,
    shape: PlanShape,
    shadow_challenger: Option<(ProviderId, String)>,
    recording_sample_rate: f64,
    reasoning: String,
    confidence: f64,
    epsilon: f64,
    explored: bool,
    task_class: FeatureBucket,
}

/// Routing metadata shared by every plan shape.
#[derive(Debug, Clone)]
pub struct PlanMeta {
    pub request_id: Uuid,
    pub task_class: FeatureBucket,
    pub reasoning: String,
    pub confidence: f64,
    pub epsilon: f64,
    pub explored: bool,
}

impl Plan {
    pub fn single(provider: ProviderId, model: String, meta: PlanMeta) -> Self {
        Self::from_shape(PlanShape::Single { provider, model }, meta)
    }

    pub fn ensemble(
        providers: Vec<(ProviderId, String)>,
        synthesize: bool,
        min_responses: usize,
        timeout_ms: u64,
        meta: PlanMeta,
    ) -> Result<Self, CoreError> {
        if providers.len() < 2 {
            return Err(CoreError::PlanInvalid(
                "ensemble requires at least two providers".into(),
            ));
        }
        if min_responses == 0 || min_responses > providers.len() {
            return Err(CoreError::PlanInvalid(format!(
                "min_responses {} outside 1..={}",
                min_responses,
                providers.len()
            )));
        }
        Ok(Self::from_shape(
            PlanShape::Ensemble {
                providers,
                synthesize,
                min_responses,
                timeout_ms,
            },
            meta,
        ))
    }

    pub fn validation_loop(
        stages: Vec<StageAssignment>,
        min_confidence: f64,
        max_retries: u32,
        skip_optimize: bool,
        meta: PlanMeta,
    ) -> Result<Self, CoreError> {
        if stages.len() < 2 {
            return Err(CoreError::PlanInvalid(
                "validation loop requires at least two stages".into(),
            ));
        }
        if stages[0].stage != StageKind::Generate {
            return Err(CoreError::PlanInvalid(
                "validation loop must start with a generate stage".into(),
            ));
        }
        Ok(Self::from_shape(
            PlanShape::ValidationLoop {
                stages,
                min_confidence,
                max_retries,
                skip_optimize,
            },
            meta,
        ))
    }

    fn from_shape(shape: PlanShape, meta: PlanMeta) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id: meta.request_id,
            shape,
            shadow_challenger: None,
            recording_sample_rate: 1.0,
            reasoning: meta.reasoning,
            confidence: meta.confidence,
            epsilon: meta.epsilon,
            explored: meta.explored,
            task_class: meta.task_class,
        }
    }

    /// Attach a shadow challenger at construction time. Consumes and
    /// returns the plan so published plans stay immutable.
    pub fn with_shadow(mut self, provider: ProviderId, model: String) -> Self {
        self.shadow_challenger = Some((provider, model));
        self
    }

    pub fn with_recording_sample_rate(mut self, rate: f64) -> Self {
        self.recording_sample_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn shape(&self) -> &PlanShape {
        &self.shape
    }

    pub fn shadow_challenger(&self) -> Option<&(ProviderId, String)> {
        self.shadow_challenger.as_ref()
    }

    pub fn recording_sample_rate(&self) -> f64 {
        self.recording_sample_rate
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn explored(&self) -> bool {
        self.explored
    }

    pub fn task_class(&self) -> FeatureBucket {
        self.task_class
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        match self.shape {
            PlanShape::Single { .. } => ExecutionMode::Single,
            PlanShape::Ensemble { .. } => ExecutionMode::Ensemble,
            PlanShape::ValidationLoop { .. } => ExecutionMode::ValidationLoop,
        }
    }

    /// Provider used as the primary trace entry, if statically known.
    pub fn primary_provider(&self) -> Option<(&ProviderId, &str)> {
        match &self.shape {
            PlanShape::Single { provider, model } => Some((provider, model)),
            PlanShape::ValidationLoop { stages, .. } => stages
                .first()
                .map(|stage| (&stage.provider, stage.model.as_str())),
            PlanShape::Ensemble { .. } => None,
        }
    }
}
