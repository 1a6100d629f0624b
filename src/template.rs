//! Instruction template rendering
//!
//! Leaf instructions are plain text with `{key}` placeholders resolved
//! against session state at render time. The recognized placeholder set
//! is extracted once, when the leaf is built, so the keys a leaf reads
//! are statically known.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::config::MissingKeyPolicy;
use crate::error::EngineError;
use crate::session::StateMap;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex"))
}

/// Extract the set of `{key}` placeholders referenced by a template
pub fn placeholder_keys(template: &str) -> BTreeSet<String> {
    placeholder_regex()
        .captures_iter(template)
        .map(|cap| cap[1].to_string())
        .collect()
}

/// Render a state value into placeholder text
///
/// Strings substitute bare (no quotes); other values substitute as JSON.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render a template against session state
///
/// `keys` must be the set previously extracted from `template` via
/// [`placeholder_keys`]. Absent keys resolve per `policy`.
pub fn render(
    template: &str,
    keys: &BTreeSet<String>,
    state: &StateMap,
    policy: MissingKeyPolicy,
    agent: &str,
) -> Result<String, EngineError> {
    let mut rendered = template.to_string();
    for key in keys {
        let replacement = match state.get(key) {
            Some(value) => value_text(value),
            None => match policy {
                MissingKeyPolicy::Empty => String::new(),
                MissingKeyPolicy::Fail => {
                    return Err(EngineError::MissingStateKey {
                        key: key.clone(),
                        agent: agent.to_string(),
                    })
                }
            },
        };
        rendered = rendered.replace(&format!("{{{}}}", key), &replacement);
    }
    Ok(rendered)
}
