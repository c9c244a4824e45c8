//! Comparison, arithmetic, and textual condition evaluation.
//!
//! One implementation serves both execution paths: grammar rule actions
//! compare already-evaluated values directly, while the block preprocessor
//! evaluates condition *strings* (`while`/`if` headers) through
//! [`Interpreter::evaluate_condition`], which splits on `OR` first and
//! `AND` second so that `and` binds tighter than `or`. Both upper- and
//! lowercase operator spellings are accepted.

use crate::error::ScriptError;
use crate::interpreter::Interpreter;
use crate::value::Value;

/// Compares two values: numerically when both sides parse as numbers,
/// lexicographically on the stringified forms otherwise. The
/// determination is made per evaluation, never cached per variable.
pub fn compare_values(left: &Value, op: &str, right: &Value) -> bool {
    if let (Some(l), Some(r)) = (left.as_number(), right.as_number()) {
        return match op {
            "==" => l == r,
            "!=" => l != r,
            ">" => l > r,
            "<" => l < r,
            ">=" => l >= r,
            "<=" => l <= r,
            _ => false,
        };
    }
    let l = left.as_string();
    let r = right.as_string();
    match op {
        "==" => l == r,
        "!=" => l != r,
        ">" => l > r,
        "<" => l < r,
        ">=" => l >= r,
        "<=" => l <= r,
        _ => false,
    }
}

/// Left-associative arithmetic over coerced floats.
pub fn arithmetic(op: &str, left: f64, right: f64) -> Result<f64, ScriptError> {
    match op {
        "+" => Ok(left + right),
        "-" => Ok(left - right),
        "*" => Ok(left * right),
        "/" => {
            if right == 0.0 {
                Err(ScriptError::semantic("division by zero"))
            } else {
                Ok(left / right)
            }
        }
        other => Err(ScriptError::semantic(format!(
            "unknown operator: {}",
            other
        ))),
    }
}

/// Splits on the earliest occurrence of any delimiter, repeatedly.
fn split_on_any<'a>(s: &'a str, delims: &[&str]) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut rest = s;
    loop {
        let hit = delims
            .iter()
            .filter_map(|d| rest.find(d).map(|i| (i, d.len())))
            .min();
        match hit {
            Some((at, len)) => {
                parts.push(&rest[..at]);
                rest = &rest[at + len..];
            }
            None => {
                parts.push(rest);
                break;
            }
        }
    }
    parts
}

const OR_OPS: &[&str] = &[" OR ", " or "];
const AND_OPS: &[&str] = &[" AND ", " and "];

impl Interpreter {
    /// Evaluates a condition string, honoring `AND`/`OR` combinators.
    /// `OR` is split first (lowest precedence), then `AND`; each remaining
    /// piece is a simple comparison or a bare truthiness check.
    pub(crate) fn evaluate_condition(&self, condition: &str) -> bool {
        let condition = condition.trim();
        let or_parts = split_on_any(condition, OR_OPS);
        if or_parts.len() > 1 {
            return or_parts.iter().any(|p| self.evaluate_condition(p));
        }
        let and_parts = split_on_any(condition, AND_OPS);
        if and_parts.len() > 1 {
            return and_parts.iter().all(|p| self.evaluate_condition(p));
        }
        if let Some(inner) = condition.strip_prefix("not ") {
            return !self.evaluate_condition(inner);
        }
        self.evaluate_simple_condition(condition)
    }

    /// Evaluates `LHS op RHS` or a single term's truthiness. A reference
    /// to an unknown variable makes the condition false rather than
    /// failing the script.
    fn evaluate_simple_condition(&self, condition: &str) -> bool {
        let parts: Vec<&str> = condition.split_whitespace().collect();
        match parts.len() {
            1 => self
                .resolve_condition_term(parts[0])
                .map(|v| v.is_truthy())
                .unwrap_or(false),
            3 => {
                let left = match self.resolve_condition_term(parts[0]) {
                    Some(v) => v,
                    None => return false,
                };
                let right = match self.resolve_condition_term(parts[2]) {
                    Some(v) => v,
                    None => return false,
                };
                compare_values(&left, parts[1], &right)
            }
            _ => false,
        }
    }

    /// Resolves one side of a comparison: a `$variable`, one of the bare
    /// response keywords (`status`, `time`, `response`), or a literal.
    fn resolve_condition_term(&self, term: &str) -> Option<Value> {
        if let Some(name) = term.strip_prefix('$') {
            return self.variables.get(name).cloned();
        }
        match term {
            "status" => Some(Value::Num(self.engine.last_status() as f64)),
            "time" => Some(Value::Num(self.engine.last_elapsed_ms())),
            "response" => Some(Value::Str(self.engine.last_body().to_string())),
            _ => {
                let literal = term.trim_matches('"');
                Some(Value::Str(literal.to_string()))
            }
        }
    }
}
