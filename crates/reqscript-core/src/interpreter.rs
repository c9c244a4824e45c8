//! Interpreter façade: owns the variable store, the execution context, and
//! the HTTP engine, and wires them into the grammar's rule actions.
//!
//! # Entry points
//!
//! - [`Interpreter::parse_script`] - block-aware execution; the canonical
//!   entry point for whole scripts (multi-line `if`/`endif`, loops,
//!   indented header continuations).
//! - [`Interpreter::parse_line`] - single-statement execution through the
//!   grammar only; no multi-line constructs.
//!
//! # Sharing
//!
//! One interpreter is single-threaded by design: the variable store and
//! engine state are unsynchronized. Give each concurrent execution its own
//! instance; nothing here is process-global, so instances coexist freely.
//!
//! # Example
//!
//! ```no_run
//! use reqscript_core::interpreter::Interpreter;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut interp = Interpreter::new();
//!     interp
//!         .parse_script(
//!             r#"
//!             GET "https://api.example.com/health"
//!             if status == 200 then
//!                 print "healthy"
//!             endif
//!             "#,
//!         )
//!         .await
//!         .unwrap();
//!     for line in interp.take_output() {
//!         println!("{}", line);
//!     }
//! }
//! ```

use std::collections::HashMap;

use crate::actions;
use crate::engine::HttpEngine;
use crate::error::ScriptError;
use crate::grammar::{parse_program, script_grammar, Grammar};
use crate::lexer::tokenize;
use crate::value::Value;

/// Transient per-execution flags set by `break`/`continue` and consumed by
/// the innermost enclosing loop. They never persist across top-level
/// calls.
#[derive(Debug, Default, Clone)]
pub(crate) struct ExecContext {
    pub break_flag: bool,
    pub continue_flag: bool,
}

impl ExecContext {
    pub fn clear(&mut self) {
        self.break_flag = false;
        self.continue_flag = false;
    }
}

pub struct Interpreter {
    pub(crate) grammar: Grammar,
    pub(crate) engine: HttpEngine,
    pub(crate) variables: HashMap<String, Value>,
    pub(crate) context: ExecContext,
    pub(crate) output: Vec<String>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Interpreter {
            grammar: script_grammar(),
            engine: HttpEngine::new(),
            variables: HashMap::new(),
            context: ExecContext::default(),
            output: Vec::new(),
        }
    }

    /// Executes a single statement through the grammar.
    ///
    /// Multi-line constructs and the textual fast paths of the block
    /// preprocessor do not apply here; scripts should normally go through
    /// [`Interpreter::parse_script`].
    pub async fn parse_line(&mut self, source: &str) -> Result<Value, ScriptError> {
        self.context.clear();
        self.parse_with_context(source).await
    }

    /// Grammar dispatch that keeps the current execution context, used by
    /// the block preprocessor for lines inside blocks.
    pub(crate) async fn parse_with_context(&mut self, source: &str) -> Result<Value, ScriptError> {
        let tokens = tokenize(source)?;
        let node = parse_program(&self.grammar, &tokens)?;
        actions::eval_program(self, &node).await
    }

    pub fn get_var(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn clear_vars(&mut self) {
        self.variables.clear();
    }

    pub fn vars(&self) -> &HashMap<String, Value> {
        &self.variables
    }

    /// The HTTP engine, for callers that tune timeouts or the base URL
    /// directly.
    pub fn engine(&self) -> &HttpEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut HttpEngine {
        &mut self.engine
    }

    /// Drains the lines produced by `print` statements since the last
    /// call. The runner forwards these to stdout.
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    /// Wipes engine state, variables, and context (the `reset` statement).
    pub(crate) fn reset_state(&mut self) {
        self.engine.reset();
        self.variables.clear();
        self.context.clear();
        self.output.clear();
    }

    /// Replaces every `$name` occurrence with the stringification of the
    /// variable; unknown names expand to the empty string. Single pass:
    /// the result is not re-expanded.
    pub(crate) fn expand_variables(&self, input: &str) -> String {
        let mut result = String::with_capacity(input.len());
        let chars: Vec<char> = input.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            if chars[i] == '$'
                && i + 1 < chars.len()
                && (chars[i + 1].is_ascii_alphabetic() || chars[i + 1] == '_')
            {
                let mut j = i + 1;
                while j < chars.len() && (chars[j].is_ascii_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                let name: String = chars[i + 1..j].iter().collect();
                if let Some(value) = self.variables.get(&name) {
                    result.push_str(&value.as_string());
                }
                // Unknown variables expand to nothing.
                i = j;
            } else {
                result.push(chars[i]);
                i += 1;
            }
        }
        result
    }
}
