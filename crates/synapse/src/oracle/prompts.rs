//! Prompts for the remote enrichment oracle
//!
//! Placeholder: {text} - the memory content to analyze

/// Extraction prompt for `Directive::Associations`
pub const ASSOCIATIONS_PROMPT: &str = r#"Analyze the following memory and extract its structure.

Provide:
1. goal: a short lowercase label for what the author was trying to achieve (e.g. "planning", "learning", "building")
2. tasks: concrete tasks mentioned or implied
3. actions: things done, as verb/target pairs
4. entities: key people, projects, places or technologies

Memory:
{text}

Respond with a JSON object in this exact format:
{
  "goal": "planning",
  "tasks": ["book the venue"],
  "actions": [{"verb": "schedule", "target": "offsite"}],
  "entities": ["Alice", "Berlin"]
}

Only include the JSON object, no other text."#;

/// Extraction prompt for `Directive::Gist`
pub const GIST_PROMPT: &str = r#"Summarize the following memory as a single abstract sentence of at most 16 words, and label its goal.

Memory:
{text}

Respond with a JSON object in this exact format:
{
  "goal": "learning",
  "tasks": [],
  "actions": [],
  "entities": [],
  "summary": "Learned how lifetimes constrain borrowed references"
}

Only include the JSON object, no other text."#;
