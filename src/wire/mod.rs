use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ========================================
/// Backend wire protocol
/// ========================================

/// One refinement unit as the backend stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementRecord {
    #[serde(rename = "response_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub input: String,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Stepper order. Never re-sorted client side.
    #[serde(default)]
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    #[serde(rename = "category_id")]
    pub id: String,
    #[serde(rename = "category")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default)]
    pub preview: String,
    #[serde(default)]
    pub patterns: Vec<Pattern>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    #[serde(rename = "pattern_id")]
    pub id: String,
    #[serde(rename = "pattern")]
    pub name: String,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub applied: bool,
    /// Resolved from the local name table, never sent by the backend.
    #[serde(skip)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatePayload<'a> {
    pub input: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternSelection {
    pub pattern_id: String,
    pub applied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyPayload {
    pub patterns: Vec<PatternSelection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergePayload {
    pub previews: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdatePayload<'a> {
    pub output: &'a str,
}

/// Verdict of the prompt validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub feedback: String,
}

impl ValidationResult {
    pub fn empty() -> Self {
        Self {
            valid: false,
            reason: "empty".into(),
            feedback: "Prompt cannot be empty.".into(),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            valid: false,
            reason: "error".into(),
            feedback: "Validation failed. Try again.".into(),
        }
    }

    /// State before anything has been typed or checked.
    pub fn pending() -> Self {
        Self {
            valid: false,
            reason: "pending".into(),
            feedback: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }
}
