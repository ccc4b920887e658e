//! Per-execution token tree.
//!
//! Every audit execution owns one [`TokenStore`]. Policy inputs live under the
//! `parameters` sub-tree, diagnostic and output tokens in the top-level
//! namespace. Paths are dotted (`parameters.module`); intermediate levels are
//! created on write.

use serde_json::{Map, Value};

pub const PARAMETERS: &str = "parameters";
pub const DEPENDENCIES: &str = "dependencies";

/// Top-level tokens the engine writes itself.
pub const RESERVED: &[&str] = &[
    "policy",
    "outcome",
    PARAMETERS,
    DEPENDENCIES,
    "exception",
    "exception_type",
    "exception_trace",
];

/// Whether writing `path` at top level would land in an engine-owned token.
pub fn is_reserved(path: &str) -> bool {
    let head = path.split('.').next().unwrap_or(path);
    RESERVED.contains(&head)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenStore {
    root: Map<String, Value>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        segments.try_fold(self.root.get(first)?, |node, segment| node.get(segment))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Writes `value` at `path`, replacing any scalar that sits where a level is needed.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        let segments: Vec<&str> = path.split('.').collect();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };

        let mut level = &mut self.root;
        for segment in parents {
            let entry = level
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            level = match entry {
                Value::Object(map) => map,
                _ => unreachable!("level was just replaced with an object"),
            };
        }
        level.insert(last.to_string(), value.into());
    }

    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let (parent, last) = match path.rsplit_once('.') {
            Some((parent, last)) => (Some(parent), last),
            None => (None, path),
        };
        match parent {
            None => self.root.remove(last),
            Some(parent) => {
                let mut segments = parent.split('.');
                let first = segments.next()?;
                let mut node = self.root.get_mut(first)?;
                for segment in segments {
                    node = node.get_mut(segment)?;
                }
                node.as_object_mut()?.remove(last)
            }
        }
    }

    pub fn get_parameter(&self, name: &str) -> Option<&Value> {
        self.get(&format!("{PARAMETERS}.{name}"))
    }

    pub fn set_parameter(&mut self, name: &str, value: impl Into<Value>) {
        self.set(&format!("{PARAMETERS}.{name}"), value);
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Full tree as a plain nested value.
    pub fn export(&self) -> Value {
        Value::Object(self.root.clone())
    }
}

/// Renders a token value the way it appears inside interpolated text.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replaces `{dotted.key}` occurrences with values from `contexts`.
///
/// Contexts are walked in order and each level depth-first, so the first
/// context that defines a key wins. Replacement text is not guarded: a value
/// that itself contains `{other.key}` can be expanded again by a later key.
pub fn interpolate(template: &str, contexts: &[&Map<String, Value>]) -> String {
    let mut output = template.to_string();
    for context in contexts {
        replace_level(&mut output, context, "");
    }
    output
}

fn replace_level(output: &mut String, level: &Map<String, Value>, prefix: &str) {
    for (key, value) in level {
        let name = format!("{prefix}{key}");
        if let Value::Object(children) = value {
            replace_level(output, children, &format!("{name}."));
        }
        let token = format!("{{{name}}}");
        if output.contains(&token) {
            *output = output.replace(&token, &stringify(value));
        }
    }
}
