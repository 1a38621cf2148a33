//! Deterministic rule book
//!
//! The fallback used whenever the oracle times out, is unavailable, or
//! returns something invalid. Every lookup is keyed on a goal label and
//! always produces a non-empty result.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::oracle::provider::EnrichmentOracle;
use crate::oracle::types::{ActionTag, Directive, OracleError, StructuredExtraction};

/// Goal used when nothing more specific matches
pub const GENERAL_GOAL: &str = "general";

/// Prefix marking an explicit goal tag, e.g. `goal:planning`
pub const GOAL_TAG_PREFIX: &str = "goal:";

/// Most entities the rule book pulls from a text
const MAX_RULE_ENTITIES: usize = 5;

struct GoalRule {
    goal: &'static str,
    keywords: &'static [&'static str],
    category: &'static str,
    tasks: &'static [&'static str],
    actions: &'static [(&'static str, Option<&'static str>)],
}

const GOAL_RULES: &[GoalRule] = &[
    GoalRule {
        goal: "learning",
        keywords: &["learn", "study", "read", "tutorial", "course", "understand", "research"],
        category: "knowledge",
        tasks: &["review material", "summarize notes"],
        actions: &[("study", Some("material"))],
    },
    GoalRule {
        goal: "planning",
        keywords: &["plan", "schedule", "roadmap", "meeting", "deadline", "todo", "organize"],
        category: "planning",
        tasks: &["set milestones", "allocate time"],
        actions: &[("schedule", Some("work"))],
    },
    GoalRule {
        goal: "building",
        keywords: &["build", "implement", "code", "deploy", "fix", "bug", "refactor", "compile"],
        category: "technical",
        tasks: &["implement change", "verify result"],
        actions: &[("build", Some("artifact")), ("test", Some("artifact"))],
    },
    GoalRule {
        goal: "communication",
        keywords: &["email", "call", "message", "discuss", "reply", "chat", "talk"],
        category: "social",
        tasks: &["follow up"],
        actions: &[("contact", Some("person"))],
    },
    GoalRule {
        goal: "health",
        keywords: &["exercise", "sleep", "doctor", "workout", "diet", "run", "meditate"],
        category: "personal",
        tasks: &["track routine"],
        actions: &[("practice", Some("routine"))],
    },
    GoalRule {
        goal: "finance",
        keywords: &["budget", "invoice", "pay", "expense", "cost", "price", "salary"],
        category: "finance",
        tasks: &["record transaction"],
        actions: &[("pay", Some("invoice"))],
    },
];

static GENERAL_RULE: GoalRule = GoalRule {
    goal: GENERAL_GOAL,
    keywords: &[],
    category: "general",
    tasks: &["review"],
    actions: &[("note", None)],
};

/// Deterministic goal/category/extraction tables
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBook;

impl RuleBook {
    pub fn new() -> Self {
        Self
    }

    fn rule_for(goal: &str) -> &'static GoalRule {
        GOAL_RULES
            .iter()
            .find(|r| r.goal == goal)
            .unwrap_or(&GENERAL_RULE)
    }

    /// Classify the goal a record serves.
    ///
    /// Order: explicit `goal:` tag, a tag naming a known goal, the goal with
    /// the most keyword hits in the content (table order breaks ties), and
    /// finally [`GENERAL_GOAL`].
    pub fn classify_goal(&self, content: &str, tags: &BTreeSet<String>) -> String {
        if let Some(goal) = tags
            .iter()
            .find_map(|t| t.strip_prefix(GOAL_TAG_PREFIX))
            .map(str::trim)
            .filter(|g| !g.is_empty())
        {
            return goal.to_lowercase();
        }

        if let Some(rule) = GOAL_RULES.iter().find(|r| tags.contains(r.goal)) {
            return rule.goal.to_string();
        }

        let words: Vec<String> = tokenize(content);
        let mut best: Option<(&GoalRule, usize)> = None;
        for rule in GOAL_RULES {
            let hits = words
                .iter()
                .filter(|w| rule.keywords.iter().any(|k| w.starts_with(k)))
                .count();
            if hits > 0 && best.map(|(_, h)| hits > h).unwrap_or(true) {
                best = Some((rule, hits));
            }
        }

        best.map(|(r, _)| r.goal.to_string())
            .unwrap_or_else(|| GENERAL_GOAL.to_string())
    }

    /// Semantic category for a goal label; unknown goals map to `general`.
    pub fn category_for(&self, goal: &str) -> String {
        Self::rule_for(goal).category.to_string()
    }

    /// Rule-based extraction keyed on `goal`. Never empty.
    pub fn extract(&self, text: &str, goal: &str, directive: Directive) -> StructuredExtraction {
        let rule = Self::rule_for(goal);
        let goal = if goal.trim().is_empty() {
            GENERAL_GOAL.to_string()
        } else {
            goal.trim().to_lowercase()
        };

        let summary = match directive {
            Directive::Gist => Some(self.gist(text, &goal, usize::MAX)),
            Directive::Associations => None,
        };

        StructuredExtraction {
            goal,
            tasks: rule.tasks.iter().map(|t| t.to_string()).collect(),
            actions: rule
                .actions
                .iter()
                .map(|(verb, target)| ActionTag::new(*verb, *target))
                .collect(),
            entities: extract_entities(text),
            summary,
        }
    }

    /// Rule-based gist: the goal label followed by the leading words.
    pub fn gist(&self, text: &str, goal: &str, max_words: usize) -> String {
        let words: Vec<&str> = text.split_whitespace().take(max_words.max(1)).collect();
        if words.is_empty() {
            format!("{goal}: (empty)")
        } else {
            format!("{goal}: {}", words.join(" "))
        }
    }
}

/// The rule book exposed as an oracle that never fails
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBookOracle {
    rules: RuleBook,
}

impl RuleBookOracle {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EnrichmentOracle for RuleBookOracle {
    async fn extract(
        &self,
        text: &str,
        directive: Directive,
    ) -> Result<StructuredExtraction, OracleError> {
        let goal = self.rules.classify_goal(text, &BTreeSet::new());
        Ok(self.rules.extract(text, &goal, directive))
    }

    fn name(&self) -> &'static str {
        "rules"
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Capitalized words that do not start a sentence, in order of appearance.
fn extract_entities(text: &str) -> Vec<String> {
    let mut entities: Vec<String> = Vec::new();
    let mut sentence_start = true;
    for raw in text.split_whitespace() {
        let word: String = raw.chars().filter(|c| c.is_alphanumeric()).collect();
        let starts_upper = word.chars().next().map(char::is_uppercase).unwrap_or(false);
        if starts_upper && !sentence_start && !entities.contains(&word) {
            entities.push(word);
            if entities.len() == MAX_RULE_ENTITIES {
                break;
            }
        }
        sentence_start = raw.ends_with(['.', '!', '?']);
    }
    entities
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_goal_tag_wins() {
        let rules = RuleBook::new();
        let goal = rules.classify_goal("fix the build", &tags(&["goal:Release"]));
        assert_eq!(goal, "release");
    }

    #[test]
    fn test_known_goal_tag() {
        let rules = RuleBook::new();
        assert_eq!(rules.classify_goal("anything", &tags(&["finance"])), "finance");
    }

    #[test]
    fn test_keyword_classification() {
        let rules = RuleBook::new();
        assert_eq!(
            rules.classify_goal("Need to fix the bug and deploy", &tags(&[])),
            "building"
        );
        assert_eq!(
            rules.classify_goal("Schedule the roadmap meeting", &tags(&[])),
            "planning"
        );
        assert_eq!(rules.classify_goal("Lovely weather", &tags(&[])), GENERAL_GOAL);
    }

    #[test]
    fn test_category_for_unknown_goal() {
        let rules = RuleBook::new();
        assert_eq!(rules.category_for("building"), "technical");
        assert_eq!(rules.category_for("release"), "general");
    }

    #[test]
    fn test_extract_is_never_empty() {
        let rules = RuleBook::new();
        for goal in ["learning", "unknown-goal", ""] {
            let e = rules.extract("", goal, Directive::Associations);
            assert!(!e.goal.is_empty());
            assert!(!e.tasks.is_empty());
            assert!(!e.actions.is_empty());
            assert!(e.validate(Directive::Associations).is_ok());
        }
    }

    #[test]
    fn test_gist_extraction_has_summary() {
        let rules = RuleBook::new();
        let e = rules.extract("Met Alice to plan the launch", "planning", Directive::Gist);
        assert_eq!(e.summary.as_deref(), Some("planning: Met Alice to plan the launch"));
        assert!(e.validate(Directive::Gist).is_ok());
    }

    #[test]
    fn test_gist_truncates() {
        let rules = RuleBook::new();
        assert_eq!(rules.gist("one two three four", "general", 2), "general: one two");
        assert_eq!(rules.gist("", "general", 2), "general: (empty)");
    }

    #[test]
    fn test_extract_entities() {
        let entities = extract_entities("Met Alice and Bob in Paris. Then lunch with Alice.");
        assert_eq!(entities, vec!["Alice", "Bob", "Paris"]);
    }

    #[tokio::test]
    async fn test_rule_book_oracle_never_fails() {
        let oracle = RuleBookOracle::new();
        let result = oracle.extract("study the course", Directive::Associations).await;
        let extraction = result.expect("rule book should not fail");
        assert_eq!(extraction.goal, "learning");
        assert_eq!(oracle.name(), "rules");
    }
}
