//! Feature extraction: a pure, deterministic function from a request to
//! its routing features. No I/O, no randomness.

use std::collections::BTreeSet;

use domain::features::{Complexity, Features, LengthBucket, TaskDomain};
use domain::request::{Mode, Request, TaskType};

const CODE_KEYWORDS: &[&str] = &[
    "code", "function", "bug", "refactor", "compile", "debug", "implement", "api", "regex",
    "test",
];
const ANALYSIS_KEYWORDS: &[&str] = &[
    "analyze", "analysis", "compare", "evaluate", "data", "metrics", "report", "tradeoff",
];
const CREATIVE_KEYWORDS: &[&str] = &[
    "story", "poem", "brainstorm", "imagine", "creative", "slogan", "design",
];
const COMPLEXITY_KEYWORDS: &[&str] = &[
    "architecture",
    "distributed",
    "concurrent",
    "security",
    "production",
    "critical",
    "migration",
    "scalable",
];

const SHORT_LIMIT: usize = 280;
const MEDIUM_LIMIT: usize = 1_200;

/// Derive routing features from a request.
pub fn extract(request: &Request) -> Features {
    let lowered = request.prompt.to_lowercase();
    let mut keywords = BTreeSet::new();
    for table in [
        CODE_KEYWORDS,
        ANALYSIS_KEYWORDS,
        CREATIVE_KEYWORDS,
        COMPLEXITY_KEYWORDS,
    ] {
        for keyword in table {
            if lowered.contains(keyword) {
                keywords.insert((*keyword).to_string());
            }
        }
    }

    let domain = domain_of(request, &keywords);
    let length = length_bucket(&request.prompt);
    let complexity = complexity_of(request, length, &keywords);

    Features {
        domain,
        complexity,
        length,
        keywords,
    }
}

fn domain_of(request: &Request, keywords: &BTreeSet<String>) -> TaskDomain {
    match request.task_type {
        TaskType::Code | TaskType::Test => return TaskDomain::Code,
        TaskType::Creative => return TaskDomain::Creative,
        TaskType::General => {}
    }

    let hits = |table: &[&str]| table.iter().filter(|k| keywords.contains(**k)).count();
    let code = hits(CODE_KEYWORDS);
    let analysis = hits(ANALYSIS_KEYWORDS);
    let creative = hits(CREATIVE_KEYWORDS);

    if code > analysis && code > creative {
        TaskDomain::Code
    } else if analysis > 0 && analysis >= creative {
        TaskDomain::Analysis
    } else if creative > 0 {
        TaskDomain::Creative
    } else {
        TaskDomain::General
    }
}

fn length_bucket(prompt: &str) -> LengthBucket {
    match prompt.chars().count() {
        n if n < SHORT_LIMIT => LengthBucket::Short,
        n if n < MEDIUM_LIMIT => LengthBucket::Medium,
        _ => LengthBucket::Long,
    }
}

fn complexity_of(request: &Request, length: LengthBucket, keywords: &BTreeSet<String>) -> Complexity {
    let mut score = match request.mode {
        Mode::Quick => 0usize,
        Mode::Technical | Mode::Creative | Mode::Structured => 1,
    };
    if length == LengthBucket::Long {
        score += 1;
    }
    let complexity_hits = COMPLEXITY_KEYWORDS
        .iter()
        .filter(|k| keywords.contains(**k))
        .count();
    score += complexity_hits.min(2);
    if request.quality_threshold >= 0.9 {
        score += 1;
    }

    match score {
        0 => Complexity::Simple,
        1 => Complexity::Moderate,
        2 => Complexity::Complex,
        _ => Complexity::Critical,
    }
}
