//! Intent analysis
//!
//! Pure functions that classify free-text intent. Nothing here touches the
//! registry; the planner feeds the results into worker matching.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::plan::PlanScope;

/// Label returned when no rule matches
pub const GENERIC_TASK_TYPE: &str = "generic";

/// Task-type rules, evaluated top to bottom. First match wins.
///
/// Alternations are unanchored, so `generate|create|write|implement\s+code`
/// matches a bare "create" as well as "implement code".
static TASK_TYPE_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        // Code
        (r"generate|create|write|implement\s+code", "code.generate"),
        (r"review|check|analyze\s+code", "code.review"),
        (r"refactor|improve|optimize\s+code", "code.refactor"),
        // Data
        (r"analyze|examine|investigate\s+data", "data.analyze"),
        (r"transform|convert|process\s+data", "data.transform"),
        (r"extract|parse", "data.extract"),
        // Text
        (r"summarize|summary|tldr", "text.summarize"),
        (r"translate|translation", "text.translate"),
        // Documents
        (r"ocr|extract\s+text|scan", "document.ocr"),
        (r"invoice|receipt|bill", "document.invoice"),
        (r"pdf|document", "document.process"),
        // Research
        (r"search|find|lookup|research", "search"),
        // Images
        (r"generate\s+image|create\s+image|draw", "image.generate"),
        (r"analyze\s+image|image\s+analysis", "image.analyze"),
        (r"enhance|improve\s+quality", "image.enhance"),
    ]
    .into_iter()
    .map(|(pattern, label)| (Regex::new(pattern).unwrap(), label))
    .collect()
});

static SUBTASK_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i),\s*| and ").unwrap());

const COMPLEX_WORDS: &[&str] = &[
    "multiple",
    "several",
    "all",
    "entire",
    "complete",
    "analyze",
    "research",
    "comprehensive",
    "full",
    "pipeline",
    "workflow",
    "sequence",
];

const SIMPLE_WORDS: &[&str] = &["single", "one", "simple", "quick", "just", "only", "basic"];

const CAMPAIGN_WORDS: &[&str] = &["campaign", "project", "initiative"];

const FAN_OUT_WORDS: &[&str] = &["all", "multiple", "several", "every"];

/// Default timeout for a subtask's queued execution
pub const SUBTASK_TIMEOUT_SECS: u32 = 300;

const VERIFY_TIMEOUT_SECS: u32 = 120;

/// Complexity class driving the plan shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Complex => "complex",
        }
    }

    /// Starting confidence for plans of this class
    pub fn base_confidence(&self) -> f64 {
        match self {
            Self::Simple => 0.9,
            Self::Medium => 0.8,
            Self::Complex => 0.7,
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify the intent by the first matching rule.
///
/// Total: unmatched input yields [`GENERIC_TASK_TYPE`].
pub fn detect_task_type(intent: &str) -> &'static str {
    let lower = intent.to_lowercase();
    TASK_TYPE_RULES
        .iter()
        .find(|(pattern, _)| pattern.is_match(&lower))
        .map(|(_, label)| *label)
        .unwrap_or(GENERIC_TASK_TYPE)
}

/// Lexical complexity estimate.
///
/// `context_entries` is the number of context items supplied with the
/// request; more than three adds to the complex score.
pub fn estimate_complexity(intent: &str, context_entries: usize) -> Complexity {
    let lower = intent.to_lowercase();
    let words: HashSet<&str> = lower.split_whitespace().collect();

    let mut complex_score = COMPLEX_WORDS.iter().filter(|w| words.contains(*w)).count();
    let simple_score = SIMPLE_WORDS.iter().filter(|w| words.contains(*w)).count();

    if lower.contains(" and ") || intent.contains(',') {
        complex_score += 2;
    }
    if context_entries > 3 {
        complex_score += 1;
    }

    if complex_score > simple_score + 1 {
        Complexity::Complex
    } else if simple_score > complex_score {
        Complexity::Simple
    } else {
        Complexity::Medium
    }
}

pub fn detect_scope(intent: &str, complexity: Complexity) -> PlanScope {
    let lower = intent.to_lowercase();
    if CAMPAIGN_WORDS.iter().any(|w| lower.contains(w)) {
        PlanScope::Campaign
    } else if complexity == Complexity::Complex || lower.contains("workflow") {
        PlanScope::Workflow
    } else {
        PlanScope::SingleTask
    }
}

/// Result of analyzing one intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentAnalysis {
    pub task_type: &'static str,
    pub complexity: Complexity,
    pub scope: PlanScope,
}

impl IntentAnalysis {
    pub fn analyze(intent: &str, context_entries: usize) -> Self {
        let task_type = detect_task_type(intent);
        let complexity = estimate_complexity(intent, context_entries);
        let scope = detect_scope(intent, complexity);
        Self {
            task_type,
            complexity,
            scope,
        }
    }
}

/// One unit of a decomposed complex intent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subtask {
    /// Text matched against the registry
    pub description: String,
    pub task_type: &'static str,
    /// Parameters for the subtask's execution step
    pub params: Map<String, Value>,
    pub timeout_seconds: u32,
}

impl Subtask {
    fn new(
        description: String,
        task_type: &'static str,
        params: Value,
        timeout_seconds: u32,
    ) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            description,
            task_type,
            params,
            timeout_seconds,
        }
    }
}

/// Split a complex intent into subtasks.
///
/// 1. Explicit conjunctions (" and " or commas) split the text; each
///    fragment is classified on its own.
/// 2. Fan-out words (all, multiple, several, every) give a fixed
///    gather / analyze / generate pipeline.
/// 3. Otherwise the primary task is followed by a verification pass.
pub fn split_into_subtasks(intent: &str, task_type: &'static str) -> Vec<Subtask> {
    let lower = intent.to_lowercase();

    if lower.contains(" and ") || intent.contains(',') {
        let subtasks: Vec<Subtask> = SUBTASK_SEPARATOR
            .split(intent)
            .enumerate()
            .filter_map(|(i, part)| {
                let part = part.trim();
                (!part.is_empty()).then(|| {
                    Subtask::new(
                        part.to_string(),
                        detect_task_type(part),
                        json!({ "subtask": part, "part_number": i + 1 }),
                        SUBTASK_TIMEOUT_SECS,
                    )
                })
            })
            .collect();

        if !subtasks.is_empty() {
            return subtasks;
        }
        return default_subtasks(intent, task_type);
    }

    if FAN_OUT_WORDS.iter().any(|w| lower.contains(w)) {
        let gather_type = if lower.contains("search") { "search" } else { task_type };
        return vec![
            Subtask::new(
                format!("Gather data for: {intent}"),
                gather_type,
                json!({ "phase": "gather", "intent": intent }),
                SUBTASK_TIMEOUT_SECS,
            ),
            Subtask::new(
                "Analyze gathered data".to_string(),
                "data.analyze",
                json!({ "phase": "analyze", "intent": intent }),
                SUBTASK_TIMEOUT_SECS,
            ),
            Subtask::new(
                "Generate final output".to_string(),
                task_type,
                json!({ "phase": "generate", "intent": intent }),
                SUBTASK_TIMEOUT_SECS,
            ),
        ];
    }

    default_subtasks(intent, task_type)
}

fn default_subtasks(intent: &str, task_type: &'static str) -> Vec<Subtask> {
    vec![
        Subtask::new(
            format!("Primary task: {intent}"),
            task_type,
            json!({ "intent": intent }),
            SUBTASK_TIMEOUT_SECS,
        ),
        Subtask::new(
            "Verify and validate results".to_string(),
            GENERIC_TASK_TYPE,
            json!({ "phase": "verify", "intent": intent }),
            VERIFY_TIMEOUT_SECS,
        ),
    ]
}

/// First `max_chars` characters of `text`
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
