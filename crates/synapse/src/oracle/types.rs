//! Oracle types for structured extraction
//!
//! Defines the fixed extraction shape every oracle must produce, the
//! directive selecting what to extract, and oracle-specific errors.

use serde::{Deserialize, Serialize};

/// Longest label accepted from an oracle
pub const MAX_LABEL_LEN: usize = 64;

/// Most tasks, actions or entities accepted from an oracle
pub const MAX_ITEMS: usize = 16;

/// What the caller wants extracted from a text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    /// Goal, tasks, actions and entities used for replay
    Associations,
    /// A one-line abstract of the content plus its goal
    Gist,
}

impl Directive {
    pub fn as_str(&self) -> &'static str {
        match self {
            Directive::Associations => "associations",
            Directive::Gist => "gist",
        }
    }
}

/// A verb/target pair describing something done in the content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionTag {
    pub verb: String,
    #[serde(default)]
    pub target: Option<String>,
}

impl ActionTag {
    pub fn new(verb: impl Into<String>, target: Option<&str>) -> Self {
        Self {
            verb: verb.into(),
            target: target.map(str::to_string),
        }
    }
}

/// Validated result of an extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredExtraction {
    /// Goal label, lowercase
    pub goal: String,
    pub tasks: Vec<String>,
    pub actions: Vec<ActionTag>,
    pub entities: Vec<String>,
    /// Present for `Directive::Gist`
    #[serde(default)]
    pub summary: Option<String>,
}

impl StructuredExtraction {
    /// Check the shape an oracle returned.
    ///
    /// Anything that fails here is converted to `OracleError::InvalidResponse`
    /// so partial data never flows downstream.
    pub fn validate(&self, directive: Directive) -> Result<(), OracleError> {
        let goal = self.goal.trim();
        if goal.is_empty() || goal.len() > MAX_LABEL_LEN {
            return Err(OracleError::InvalidResponse(format!(
                "goal label must be 1..={MAX_LABEL_LEN} characters"
            )));
        }
        if self.tasks.len() > MAX_ITEMS
            || self.actions.len() > MAX_ITEMS
            || self.entities.len() > MAX_ITEMS
        {
            return Err(OracleError::InvalidResponse(format!(
                "at most {MAX_ITEMS} tasks, actions and entities are accepted"
            )));
        }
        if self.tasks.iter().any(|t| t.trim().is_empty())
            || self.entities.iter().any(|e| e.trim().is_empty())
            || self.actions.iter().any(|a| a.verb.trim().is_empty())
        {
            return Err(OracleError::InvalidResponse(
                "empty task, entity or action verb".to_string(),
            ));
        }
        if directive == Directive::Gist
            && self
                .summary
                .as_deref()
                .map(|s| s.trim().is_empty())
                .unwrap_or(true)
        {
            return Err(OracleError::InvalidResponse(
                "gist directive requires a summary".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of distinct associations this extraction carries
    pub fn association_count(&self) -> usize {
        self.tasks.len() + self.actions.len() + self.entities.len()
    }
}

/// Oracle-specific errors
///
/// Callers treat every variant identically: fall back to rules.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    #[error("Oracle timed out")]
    Timeout,
    #[error("Oracle unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid oracle response: {0}")]
    InvalidResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extraction() -> StructuredExtraction {
        StructuredExtraction {
            goal: "planning".to_string(),
            tasks: vec!["book venue".to_string()],
            actions: vec![ActionTag::new("schedule", Some("meeting"))],
            entities: vec!["Alice".to_string()],
            summary: None,
        }
    }

    #[test]
    fn test_valid_extraction() {
        assert!(extraction().validate(Directive::Associations).is_ok());
        assert_eq!(extraction().association_count(), 3);
    }

    #[test]
    fn test_empty_goal_is_invalid() {
        let mut e = extraction();
        e.goal = "   ".to_string();
        assert!(matches!(
            e.validate(Directive::Associations),
            Err(OracleError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_gist_requires_summary() {
        let mut e = extraction();
        assert!(e.validate(Directive::Gist).is_err());
        e.summary = Some("Planning the offsite with Alice".to_string());
        assert!(e.validate(Directive::Gist).is_ok());
    }

    #[test]
    fn test_too_many_items_is_invalid() {
        let mut e = extraction();
        e.entities = (0..=MAX_ITEMS).map(|i| format!("e{i}")).collect();
        assert!(e.validate(Directive::Associations).is_err());
    }

    #[test]
    fn test_oracle_error_display() {
        assert_eq!(OracleError::Timeout.to_string(), "Oracle timed out");
        assert_eq!(
            OracleError::Unavailable("503".into()).to_string(),
            "Oracle unavailable: 503"
        );
    }
}
