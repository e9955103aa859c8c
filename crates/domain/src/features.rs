//! Request features and the coarse bucket used as the key for per-provider
//! statistics. Derivation from a request is a pure function owned by the
//! router; the types live here because the ledger and scheduler key on them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskDomain {
    Code,
    Analysis,
    Creative,
    General,
}

impl TaskDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Analysis => "analysis",
            Self::Creative => "creative",
            Self::General => "general",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
    Critical,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthBucket {
    Short,
    Medium,
    Long,
}

/// Full feature set extracted from one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    pub domain: TaskDomain,
    pub complexity: Complexity,
    pub length: LengthBucket,
    pub keywords: BTreeSet<String>,
}

impl Features {
    /// Coarse discretization used as the per-provider statistics key.
    pub fn bucket(&self) -> FeatureBucket {
        FeatureBucket {
            domain: self.domain,
            complexity: self.complexity,
        }
    }
}

/// `(domain, complexity)` pair with a canonical `"code/complex"` string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureBucket {
    pub domain: TaskDomain,
    pub complexity: Complexity,
}

impl FeatureBucket {
    pub fn new(domain: TaskDomain, complexity: Complexity) -> Self {
        Self { domain, complexity }
    }
}

impl fmt::Display for FeatureBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain.as_str(), self.complexity.as_str())
    }
}

impl FromStr for FeatureBucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (domain, complexity) = s
            .split_once('/')
            .ok_or_else(|| format!("malformed feature bucket `{s}`"))?;
        let domain = match domain {
            "code" => TaskDomain::Code,
            "analysis" => TaskDomain::Analysis,
            "creative" => TaskDomain::Creative,
            "general" => TaskDomain::General,
            other => return Err(format!("unknown domain `{other}`")),
        };
        let complexity = match complexity {
            "simple" => Complexity::Simple,
            "moderate" => Complexity::Moderate,
            "complex" => Complexity::Complex,
            "critical" => Complexity::Critical,
            other => return Err(format!("unknown complexity `{other}`")),
        };
        Ok(Self { domain, complexity })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_roundtrips_through_string_form() {
        let bucket = FeatureBucket::new(TaskDomain::Code, Complexity::Complex);
        assert_eq!(bucket.to_string(), "code/complex");
        assert_eq!("code/complex".parse::<FeatureBucket>().unwrap(), bucket);
    }

    #[test]
    fn malformed_bucket_is_rejected() {
        assert!("nonsense".parse::<FeatureBucket>().is_err());
        assert!("code/extreme".parse::<FeatureBucket>().is_err());
    }
}
