//! # reqscript-core
//!
//! Interpreter for reqscript, a small imperative scripting language whose
//! primitives are HTTP requests, response introspection, and lightweight
//! control flow. Scripts issue requests, extract data from responses,
//! bind variables, do arithmetic and comparisons, branch, loop, and
//! assert.
//!
//! ## Architecture
//!
//! Source text flows through three layers:
//!
//! - [`lexer`] - priority-ordered tokenizer for single statements
//! - [`grammar`] - rule-table parser with seeded left recursion,
//!   producing a tree that the rule actions evaluate bottom-up
//! - [`blocks`] - line-oriented preprocessor that recognizes multi-line
//!   constructs (`if`/`endif`, loops, indented `header` continuations)
//!   and drives the grammar for everything else
//!
//! The [`engine`] performs requests and keeps the last-response snapshot
//! that `extract`, assertions, and response conditions read. The
//! [`interpreter`] façade owns the variable store and wires everything
//! together.
//!
//! ## Example
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
//!             base url "https://api.example.com"
//!             POST "/login" json {"user":"demo","pass":"secret"}
//!             assert status 200
//!             extract jsonpath "$.token" as $token
//!             GET "/me" header "Authorization" "Bearer $token"
//!             assert response contains "demo"
//!             "#,
//!         )
//!         .await
//!         .expect("script failed");
//! }
//! ```
//!
//! ## Concurrency
//!
//! A single interpreter executes one statement at a time and is not safe
//! for concurrent use; give each concurrent execution its own instance.

mod actions;

pub mod blocks;
pub mod engine;
pub mod error;
pub mod eval;
pub mod grammar;
pub mod interpreter;
pub mod lexer;
pub mod value;

pub use error::ScriptError;
pub use interpreter::Interpreter;
pub use value::Value;
