use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Outcome of the pre-invocation gate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Not guarded, or already approved.
    Proceed,
    /// Guarded and unapproved; the run must suspend with this key.
    Suspend { execution_key: String },
}

/// The human-in-the-loop gate.
///
/// A small configured set of tool names (external communications and the
/// like) is *guarded*: before such a tool runs, the gate checks the
/// state's approval keys and suspends the run when no key matches.
#[derive(Debug, Clone, Default)]
pub struct HilGate {
    guarded: HashSet<String>,
}

impl HilGate {
    pub fn new(guarded: HashSet<String>) -> Self {
        Self { guarded }
    }

    /// Pure predicate on the tool name.
    pub fn is_guarded(&self, tool_name: &str) -> bool {
        self.guarded.contains(tool_name)
    }

    /// Decides whether a call may proceed. Approval matches either the
    /// exact key for these arguments or the tool's bare `name:` wildcard
    /// entry. An exact-argument key approves only its own arguments; the
    /// wildcard is a distinct entry, never inferred from exact keys.
    pub fn check(
        &self,
        tool_name: &str,
        args: &Map<String, Value>,
        approved: &HashSet<String>,
    ) -> GateDecision {
        if !self.is_guarded(tool_name) {
            return GateDecision::Proceed;
        }

        let key = execution_key(tool_name, args);
        if approved.contains(&key) {
            return GateDecision::Proceed;
        }

        if approved.contains(&wildcard_key(tool_name)) {
            return GateDecision::Proceed;
        }

        GateDecision::Suspend { execution_key: key }
    }
}

/// The exact-arguments approval key: `tool_name ":" sha256(canonical
/// args)`. Stable across serialization order because the arguments are
/// canonicalized (keys sorted recursively) before hashing.
pub fn execution_key(tool_name: &str, args: &Map<String, Value>) -> String {
    let mut canonical = String::new();
    write_canonical(&Value::Object(args.clone()), &mut canonical);
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{tool_name}:{digest:x}")
}

/// The explicit wildcard entry, `tool_name ":"`, approving any arguments.
pub fn wildcard_key(tool_name: &str) -> String {
    format!("{tool_name}:")
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
