//! Block preprocessor: the line-oriented driver above the single-line
//! grammar.
//!
//! Each logical unit of a script is either collapsed to one canonical line
//! and dispatched through the grammar (HTTP requests with indented
//! `header` continuations, plain statements), or recognized as a
//! multi-line construct (`if`/`endif`, `while`/`foreach`/`repeat` with
//! `endloop`) whose condition is evaluated textually and whose body is
//! re-entered recursively.
//!
//! # Loop-control signals
//!
//! `break` and `continue` travel two ways, and both stop at the innermost
//! enclosing loop:
//!
//! - a loop body returns a [`LoopResult`] with `should_break` /
//!   `should_continue` set, which the loop consumes;
//! - statements executed deeper inside a branch set the shared context
//!   flags, which [`Interpreter::parse_script`] converts into an error if
//!   no loop ever consumed them.

use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use crate::error::ScriptError;
use crate::interpreter::Interpreter;
use crate::lexer::{tokenize, METHODS};
use crate::grammar::parse_program;
use crate::value::{parse_json_array, split_bracketed_list, Value};

/// Runaway guard for `while` loops.
pub(crate) const MAX_WHILE_ITERATIONS: usize = 1000;

/// Outputs and control flags accumulated by one pass through a loop body.
#[derive(Debug, Default)]
pub struct LoopResult {
    pub outputs: Vec<Value>,
    pub should_break: bool,
    pub should_continue: bool,
}

fn is_http_method_line(line: &str) -> bool {
    METHODS
        .iter()
        .any(|m| line.strip_prefix(m).is_some_and(|rest| rest.starts_with(' ')))
}

fn is_loop_opener(line: &str) -> bool {
    line.ends_with(" do")
        && (line.starts_with("while ")
            || line.starts_with("repeat ")
            || (line.starts_with("foreach ") && line.contains(" in ")))
}

fn is_if_opener(line: &str) -> bool {
    line.starts_with("if ") && line.ends_with(" then")
}

/// Joins a request line with its four-space-indented `header`
/// continuations into one canonical grammar line. Returns the joined line
/// and the index of the first line not consumed.
fn join_header_continuations(lines: &[String], start: usize) -> (String, usize) {
    let mut parts = vec![lines[start].trim().to_string()];
    let mut next = start + 1;
    while next < lines.len() {
        let raw = &lines[next];
        if raw.starts_with("    ") && raw.trim_start().starts_with("header ") {
            parts.push(raw.trim().to_string());
            next += 1;
        } else {
            break;
        }
    }
    (parts.join(" "), next)
}

/// Extracts a complete `if`/`endif` block starting at `start`, including
/// both delimiter lines. Returns the block and the index of the `endif`.
fn extract_if_block(lines: &[String], start: usize) -> Result<(Vec<String>, usize), ScriptError> {
    let mut block = Vec::new();
    let mut nest = 0usize;
    for (i, raw) in lines.iter().enumerate().skip(start) {
        let trimmed = raw.trim();
        if is_if_opener(trimmed) {
            nest += 1;
        } else if trimmed == "endif" {
            nest -= 1;
        }
        block.push(raw.clone());
        if nest == 0 {
            return Ok((block, i));
        }
    }
    Err(ScriptError::structural("unterminated if block (missing endif)"))
}

/// Extracts a complete loop block starting at `start`, including the
/// opener and the `endloop`. Returns the block and the index of the
/// `endloop`.
fn extract_loop_block(lines: &[String], start: usize) -> Result<(Vec<String>, usize), ScriptError> {
    let mut block = Vec::new();
    let mut nest = 0usize;
    for (i, raw) in lines.iter().enumerate().skip(start) {
        let trimmed = raw.trim();
        if trimmed.ends_with(" do") {
            nest += 1;
        } else if trimmed == "endloop" {
            nest -= 1;
        }
        block.push(raw.clone());
        if nest == 0 {
            return Ok((block, i));
        }
    }
    Err(ScriptError::structural(
        "unterminated loop block (missing endloop)",
    ))
}

/// Collects a loop body between the opener at `start` and its matching
/// `endloop`, preserving raw lines. Returns the body and the index of the
/// `endloop`.
fn collect_loop_body(lines: &[String], start: usize) -> Result<(Vec<String>, usize), ScriptError> {
    let mut body = Vec::new();
    let mut nest = 1usize;
    let mut i = start + 1;
    while i < lines.len() {
        let trimmed = lines[i].trim();
        if trimmed == "endloop" {
            nest -= 1;
            if nest == 0 {
                return Ok((body, i));
            }
        } else if trimmed.ends_with(" do") {
            nest += 1;
        }
        body.push(lines[i].clone());
        i += 1;
    }
    Err(ScriptError::structural(
        "unterminated loop block (missing endloop)",
    ))
}

/// Splits the body of the `if` opener at `start` into then- and
/// else-blocks. An `else` at nesting level zero partitions; deeper `else`
/// lines stay with their enclosing block. Returns both blocks and the
/// index of the matching `endif`.
fn partition_if(
    lines: &[String],
    start: usize,
) -> Result<(Vec<String>, Vec<String>, usize), ScriptError> {
    let mut then_block = Vec::new();
    let mut else_block = Vec::new();
    let mut in_else = false;
    let mut nest = 0usize;
    let mut i = start + 1;
    while i < lines.len() {
        let raw = &lines[i];
        let trimmed = raw.trim();
        if is_if_opener(trimmed) {
            nest += 1;
        } else if trimmed == "endif" {
            if nest == 0 {
                return Ok((then_block, else_block, i));
            }
            nest -= 1;
        } else if trimmed == "else" && nest == 0 {
            in_else = true;
            i += 1;
            continue;
        }
        if in_else {
            else_block.push(raw.clone());
        } else {
            then_block.push(raw.clone());
        }
        i += 1;
    }
    Err(ScriptError::structural("unterminated if block (missing endif)"))
}

impl Interpreter {
    /// Executes a whole script with multi-line block support. This is the
    /// canonical entry point.
    ///
    /// Returns the collected statement outputs. A `break` or `continue`
    /// that no loop consumed is a control-flow error.
    pub async fn parse_script(&mut self, source: &str) -> Result<Value, ScriptError> {
        self.context.clear();
        let lines: Vec<String> = source.lines().map(String::from).collect();
        let outputs = self.run_block(lines).await?;
        if self.context.break_flag {
            self.context.clear();
            return Err(ScriptError::ControlFlow { signal: "break" });
        }
        if self.context.continue_flag {
            self.context.clear();
            return Err(ScriptError::ControlFlow { signal: "continue" });
        }
        Ok(Value::Array(outputs))
    }

    /// Walks a group of lines, dispatching each logical unit. Stops early
    /// when a loop-control flag is raised and leaves the flag set for the
    /// caller to consume.
    fn run_block<'a>(
        &'a mut self,
        lines: Vec<String>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Value>, ScriptError>> + 'a>> {
        Box::pin(async move {
            let mut results = Vec::new();
            let mut i = 0;
            while i < lines.len() {
                if self.context.break_flag || self.context.continue_flag {
                    break;
                }
                let line = lines[i].trim().to_string();
                if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
                    i += 1;
                    continue;
                }

                if is_http_method_line(&line) {
                    let (joined, next) = join_header_continuations(&lines, i);
                    let value = self
                        .parse_with_context(&joined)
                        .await
                        .map_err(|e| e.at_line(i + 1))?;
                    results.push(value);
                    i = next;
                    continue;
                }

                if is_if_opener(&line) {
                    let condition = line["if ".len()..line.len() - " then".len()].to_string();
                    let (then_block, else_block, end) =
                        partition_if(&lines, i).map_err(|e| e.at_line(i + 1))?;
                    let truthy = self.evaluate_condition(&condition);
                    debug!(condition = %condition, truthy, "if block");
                    let branch = if truthy { then_block } else { else_block };
                    if !branch.is_empty() {
                        let sub = self.run_block(branch).await?;
                        results.extend(sub);
                    }
                    i = end + 1;
                    continue;
                }

                if line.starts_with("repeat ") && line.ends_with(" do") {
                    i = self.run_repeat(&lines, i, &line, &mut results).await?;
                    continue;
                }
                if line.starts_with("while ") && line.ends_with(" do") {
                    i = self.run_while(&lines, i, &line, &mut results).await?;
                    continue;
                }
                if line.starts_with("foreach ") && line.contains(" in ") && line.ends_with(" do")
                {
                    i = self.run_foreach(&lines, i, &line, &mut results).await?;
                    continue;
                }

                if line == "break" {
                    self.context.break_flag = true;
                    break;
                }
                if line == "continue" {
                    self.context.continue_flag = true;
                    break;
                }

                if let Some(values) = self
                    .execute_inline_if(&line)
                    .await
                    .map_err(|e| e.at_line(i + 1))?
                {
                    results.extend(values);
                    i += 1;
                    continue;
                }

                let value = self
                    .parse_with_context(&line)
                    .await
                    .map_err(|e| e.at_line(i + 1))?;
                results.push(value);
                i += 1;
            }
            Ok(results)
        })
    }

    /// Single-line `if` forms are evaluated textually, before grammar
    /// dispatch, so that exactly one branch executes. Returns `None` when
    /// the line is not a single-line `if`.
    async fn execute_inline_if(
        &mut self,
        line: &str,
    ) -> Result<Option<Vec<Value>>, ScriptError> {
        let Some(rest) = line.strip_prefix("if ") else {
            return Ok(None);
        };
        let Some((condition, branches)) = rest.split_once(" then ") else {
            return Ok(None);
        };
        let branches = branches.strip_suffix(" endif").unwrap_or(branches);
        let (then_stmt, else_stmt) = match branches.split_once(" else ") {
            Some((t, e)) => (t.trim(), e.trim()),
            None => (branches.trim(), ""),
        };

        let chosen = if self.evaluate_condition(condition) {
            then_stmt
        } else {
            else_stmt
        };
        match chosen {
            "" => Ok(Some(Vec::new())),
            "break" => {
                self.context.break_flag = true;
                Ok(Some(Vec::new()))
            }
            "continue" => {
                self.context.continue_flag = true;
                Ok(Some(Vec::new()))
            }
            stmt => {
                let value = self.parse_with_context(stmt).await?;
                Ok(Some(vec![value]))
            }
        }
    }

    /// Converts pending context flags into loop signals, clearing them.
    /// Returns true when a signal was taken.
    fn take_signal(&mut self, lr: &mut LoopResult) -> bool {
        if self.context.break_flag {
            self.context.break_flag = false;
            lr.should_break = true;
            return true;
        }
        if self.context.continue_flag {
            self.context.continue_flag = false;
            lr.should_continue = true;
            return true;
        }
        false
    }

    /// Walks one pass through a loop body, watching for loop-control
    /// signals at every step.
    fn process_loop_body<'a>(
        &'a mut self,
        body: Vec<String>,
    ) -> Pin<Box<dyn Future<Output = Result<LoopResult, ScriptError>> + 'a>> {
        Box::pin(async move {
            let mut lr = LoopResult::default();
            let mut i = 0;
            while i < body.len() {
                let line = body[i].trim().to_string();
                if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
                    i += 1;
                    continue;
                }

                if line == "break" {
                    lr.should_break = true;
                    return Ok(lr);
                }
                if line == "continue" {
                    lr.should_continue = true;
                    return Ok(lr);
                }

                if is_if_opener(&line) {
                    let (block, end) =
                        extract_if_block(&body, i).map_err(|e| e.at_line(i + 1))?;
                    let sub = self.process_if_with_control(block).await?;
                    lr.outputs.extend(sub.outputs);
                    if sub.should_break {
                        lr.should_break = true;
                        return Ok(lr);
                    }
                    if sub.should_continue {
                        lr.should_continue = true;
                        return Ok(lr);
                    }
                    i = end + 1;
                    continue;
                }

                if is_loop_opener(&line) {
                    let (block, end) =
                        extract_loop_block(&body, i).map_err(|e| e.at_line(i + 1))?;
                    // The nested loop consumes its own signals.
                    let sub = self.run_block(block).await?;
                    lr.outputs.extend(sub);
                    i = end + 1;
                    continue;
                }

                if is_http_method_line(&line) {
                    let (joined, next) = join_header_continuations(&body, i);
                    let value = self
                        .parse_with_context(&joined)
                        .await
                        .map_err(|e| e.at_line(i + 1))?;
                    lr.outputs.push(value);
                    i = next;
                    if self.take_signal(&mut lr) {
                        return Ok(lr);
                    }
                    continue;
                }

                if let Some(values) = self
                    .execute_inline_if(&line)
                    .await
                    .map_err(|e| e.at_line(i + 1))?
                {
                    lr.outputs.extend(values);
                    i += 1;
                    if self.take_signal(&mut lr) {
                        return Ok(lr);
                    }
                    continue;
                }

                let value = self
                    .parse_with_context(&line)
                    .await
                    .map_err(|e| e.at_line(i + 1))?;
                lr.outputs.push(value);
                i += 1;
                if self.take_signal(&mut lr) {
                    return Ok(lr);
                }
            }
            Ok(lr)
        })
    }

    /// Executes an `if` block inside a loop body, propagating `break` and
    /// `continue` raised anywhere in the chosen branch up to the loop.
    async fn process_if_with_control(
        &mut self,
        block: Vec<String>,
    ) -> Result<LoopResult, ScriptError> {
        let mut lr = LoopResult::default();
        let first = block.first().map(|l| l.trim().to_string()).unwrap_or_default();
        let condition = first
            .strip_prefix("if ")
            .and_then(|r| r.strip_suffix(" then"))
            .ok_or_else(|| ScriptError::structural("malformed if block"))?;
        let (then_block, else_block, _) = partition_if(&block, 0)?;
        let branch = if self.evaluate_condition(condition) {
            then_block
        } else {
            else_block
        };
        if !branch.is_empty() {
            let outputs = self.run_block(branch).await?;
            lr.outputs.extend(outputs);
            self.take_signal(&mut lr);
        }
        Ok(lr)
    }

    async fn run_repeat(
        &mut self,
        lines: &[String],
        i: usize,
        line: &str,
        results: &mut Vec<Value>,
    ) -> Result<usize, ScriptError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 4 || parts[2] != "times" {
            return Err(
                ScriptError::structural(format!("invalid repeat syntax: {}", line))
                    .at_line(i + 1),
            );
        }
        let count = if let Some(name) = parts[1].strip_prefix('$') {
            self.variables
                .get(name)
                .and_then(|v| v.as_number())
                .unwrap_or(0.0) as usize
        } else {
            parts[1].parse::<usize>().unwrap_or(0)
        };
        let (body, end) = collect_loop_body(lines, i).map_err(|e| e.at_line(i + 1))?;

        let mut executed = 0usize;
        for iteration in 0..count {
            self.variables
                .insert("_index".into(), Value::Num(iteration as f64));
            self.variables
                .insert("_iteration".into(), Value::Num((iteration + 1) as f64));
            let lr = self.process_loop_body(body.clone()).await?;
            results.extend(lr.outputs);
            executed += 1;
            if lr.should_continue {
                continue;
            }
            if lr.should_break {
                break;
            }
        }
        results.push(Value::Str(format!("repeated {} times", executed)));
        Ok(end + 1)
    }

    async fn run_while(
        &mut self,
        lines: &[String],
        i: usize,
        line: &str,
        results: &mut Vec<Value>,
    ) -> Result<usize, ScriptError> {
        let condition = line["while ".len()..line.len() - " do".len()].to_string();
        let (body, end) = collect_loop_body(lines, i).map_err(|e| e.at_line(i + 1))?;

        let mut iterations = 0usize;
        // The condition string is re-evaluated before every iteration.
        while self.evaluate_condition(&condition) {
            if iterations >= MAX_WHILE_ITERATIONS {
                return Err(ScriptError::semantic(format!(
                    "while loop exceeded maximum iterations ({})",
                    MAX_WHILE_ITERATIONS
                ))
                .at_line(i + 1));
            }
            self.variables
                .insert("_iteration".into(), Value::Num((iterations + 1) as f64));
            let lr = self.process_loop_body(body.clone()).await?;
            results.extend(lr.outputs);
            iterations += 1;
            if lr.should_break {
                break;
            }
        }
        results.push(Value::Str(format!(
            "while loop executed {} times",
            iterations
        )));
        Ok(end + 1)
    }

    async fn run_foreach(
        &mut self,
        lines: &[String],
        i: usize,
        line: &str,
        results: &mut Vec<Value>,
    ) -> Result<usize, ScriptError> {
        let inner = &line["foreach ".len()..line.len() - " do".len()];
        let Some((var_part, list_part)) = inner.split_once(" in ") else {
            return Err(
                ScriptError::structural(format!("invalid foreach syntax: {}", line))
                    .at_line(i + 1),
            );
        };
        let item_name = var_part.trim().trim_start_matches('$').to_string();
        let list_part = list_part.trim();

        let items: Vec<Value> = if list_part.starts_with('[') {
            parse_json_array(list_part).unwrap_or_else(|| split_bracketed_list(list_part))
        } else if let Some(name) = list_part.strip_prefix('$') {
            match self.variables.get(name) {
                Some(Value::Array(items)) => items.clone(),
                Some(Value::Str(s)) if s.trim_start().starts_with('[') => {
                    parse_json_array(s).unwrap_or_else(|| split_bracketed_list(s))
                }
                _ => Vec::new(),
            }
        } else {
            Vec::new()
        };

        let (body, end) = collect_loop_body(lines, i).map_err(|e| e.at_line(i + 1))?;

        let mut executed = 0usize;
        for (index, item) in items.into_iter().enumerate() {
            self.variables.insert(item_name.clone(), item);
            self.variables
                .insert("_index".into(), Value::Num(index as f64));
            self.variables
                .insert("_iteration".into(), Value::Num((index + 1) as f64));
            let lr = self.process_loop_body(body.clone()).await?;
            results.extend(lr.outputs);
            executed += 1;
            if lr.should_continue {
                continue;
            }
            if lr.should_break {
                break;
            }
        }
        results.push(Value::Str(format!("foreach executed for {} items", executed)));
        Ok(end + 1)
    }

    /// Checks script structure and single-statement syntax without
    /// executing anything: no variable writes, no HTTP.
    pub fn validate_script(&self, source: &str) -> Result<(), ScriptError> {
        let lines: Vec<String> = source.lines().map(String::from).collect();
        let mut stack: Vec<&'static str> = Vec::new();
        let mut i = 0;
        while i < lines.len() {
            let line = lines[i].trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
                i += 1;
                continue;
            }
            if is_http_method_line(line) {
                let (joined, next) = join_header_continuations(&lines, i);
                let tokens = tokenize(&joined).map_err(|e| e.at_line(i + 1))?;
                parse_program(&self.grammar, &tokens).map_err(|e| e.at_line(i + 1))?;
                i = next;
                continue;
            }
            if is_if_opener(line) {
                stack.push("endif");
                i += 1;
                continue;
            }
            if is_loop_opener(line) {
                stack.push("endloop");
                i += 1;
                continue;
            }
            if line == "endif" || line == "endloop" {
                match stack.pop() {
                    Some(expected) if expected == line => {}
                    _ => {
                        return Err(ScriptError::structural(format!("unexpected '{}'", line))
                            .at_line(i + 1));
                    }
                }
                i += 1;
                continue;
            }
            if line == "else" || line == "break" || line == "continue" {
                i += 1;
                continue;
            }
            // Single-line ifs are evaluated textually at run time; their
            // conditions may use the bare response keywords the grammar
            // does not accept, so they are only checked structurally.
            if line.starts_with("if ") && line.contains(" then ") {
                i += 1;
                continue;
            }
            let tokens = tokenize(line).map_err(|e| e.at_line(i + 1))?;
            parse_program(&self.grammar, &tokens).map_err(|e| e.at_line(i + 1))?;
            i += 1;
        }
        if let Some(terminator) = stack.last() {
            return Err(ScriptError::structural(format!(
                "unterminated block (missing {})",
                terminator
            )));
        }
        Ok(())
    }
}

/// Splits a script into top-level executable units: one per statement,
/// with a whole block (and its nested blocks) forming a single unit.
/// Used by runners that continue past failures.
pub fn split_statements(source: &str) -> Result<Vec<String>, ScriptError> {
    let lines: Vec<&str> = source.lines().collect();
    let mut units = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            i += 1;
            continue;
        }
        if is_if_opener(line) || is_loop_opener(line) {
            let start = i;
            let mut stack = vec![if is_if_opener(line) { "endif" } else { "endloop" }];
            i += 1;
            while i < lines.len() && !stack.is_empty() {
                let inner = lines[i].trim();
                if is_if_opener(inner) {
                    stack.push("endif");
                } else if is_loop_opener(inner) {
                    stack.push("endloop");
                } else if inner == "endif" || inner == "endloop" {
                    match stack.pop() {
                        Some(expected) if expected == inner => {}
                        _ => {
                            return Err(ScriptError::structural(format!(
                                "unexpected '{}'",
                                inner
                            ))
                            .at_line(i + 1));
                        }
                    }
                }
                i += 1;
            }
            if !stack.is_empty() {
                return Err(ScriptError::structural(format!(
                    "unterminated block (missing {})",
                    stack[stack.len() - 1]
                )));
            }
            units.push(lines[start..i].join("\n"));
            continue;
        }
        if is_http_method_line(line) {
            let start = i;
            i += 1;
            while i < lines.len()
                && lines[i].starts_with("    ")
                && lines[i].trim_start().starts_with("header ")
            {
                i += 1;
            }
            units.push(lines[start..i].join("\n"));
            continue;
        }
        units.push(lines[i].to_string());
        i += 1;
    }
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn own(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn partition_if_splits_on_top_level_else_only() {
        let lines = own(&[
            "if $a > 1 then",
            "set $x 1",
            "if $b > 1 then",
            "set $y 1",
            "else",
            "set $y 2",
            "endif",
            "else",
            "set $x 2",
            "endif",
        ]);
        let (then_block, else_block, end) = partition_if(&lines, 0).unwrap();
        assert_eq!(end, 9);
        assert_eq!(then_block.len(), 6); // nested if kept whole, inner else included
        assert_eq!(else_block, own(&["set $x 2"]));
    }

    #[test]
    fn unbalanced_if_is_a_structural_error() {
        let lines = own(&["if $a > 1 then", "set $x 1"]);
        assert!(matches!(
            partition_if(&lines, 0),
            Err(ScriptError::Structural { .. })
        ));
    }

    #[test]
    fn collect_loop_body_tracks_nesting() {
        let lines = own(&[
            "while $a < 3 do",
            "repeat 2 times do",
            "set $x 1",
            "endloop",
            "endloop",
        ]);
        let (body, end) = collect_loop_body(&lines, 0).unwrap();
        assert_eq!(end, 4);
        assert_eq!(body, own(&["repeat 2 times do", "set $x 1", "endloop"]));
    }

    #[test]
    fn extract_loop_block_includes_delimiters() {
        let lines = own(&["set $a 1", "while $a < 3 do", "set $a 2", "endloop", "print $a"]);
        let (block, end) = extract_loop_block(&lines, 1).unwrap();
        assert_eq!(end, 3);
        assert_eq!(block.len(), 3);
    }

    #[test]
    fn split_statements_keeps_blocks_whole() {
        let source = "set $a 1\nwhile $a < 3 do\nset $a $a + 1\nendloop\nprint $a\n";
        let units = split_statements(source).unwrap();
        assert_eq!(units.len(), 3);
        assert!(units[1].starts_with("while"));
        assert!(units[1].ends_with("endloop"));
    }

    #[test]
    fn split_statements_joins_indented_headers() {
        let source = "GET \"http://h/x\"\n    header \"A\" \"1\"\n    header \"B\" \"2\"\nprint \"done\"\n";
        let units = split_statements(source).unwrap();
        assert_eq!(units.len(), 2);
        assert!(units[0].contains("header \"B\""));
    }

    #[tokio::test]
    async fn script_if_else_executes_one_branch() {
        let mut interp = Interpreter::new();
        interp
            .parse_script(
                "set $x 10\nif $x > 5 then\nset $result \"big\"\nelse\nset $result \"small\"\nendif\n",
            )
            .await
            .unwrap();
        assert_eq!(interp.get_var("result"), Some(&Value::Str("big".into())));
    }

    #[tokio::test]
    async fn script_single_line_if_else_executes_exactly_one_branch() {
        let mut interp = Interpreter::new();
        interp
            .parse_script("if 5 > 3 then set $a \"Y\" else set $a \"N\"\n")
            .await
            .unwrap();
        assert_eq!(interp.get_var("a"), Some(&Value::Str("Y".into())));
    }

    #[tokio::test]
    async fn script_while_loop_counts() {
        let mut interp = Interpreter::new();
        interp
            .parse_script("set $c 0\nwhile $c < 5 do\nset $c $c + 1\nendloop\n")
            .await
            .unwrap();
        assert_eq!(interp.get_var("c"), Some(&Value::Num(5.0)));
    }

    #[tokio::test]
    async fn script_while_loop_break_via_nested_if() {
        let mut interp = Interpreter::new();
        interp
            .parse_script(
                "set $c 0\nwhile $c < 10 do\nset $c $c + 1\nif $c == 3 then break endif\nendloop\nprint $c\n",
            )
            .await
            .unwrap();
        assert_eq!(interp.get_var("c"), Some(&Value::Num(3.0)));
        assert_eq!(interp.take_output(), vec!["$c = 3".to_string()]);
    }

    #[tokio::test]
    async fn script_break_in_multiline_if_terminates_while() {
        let mut interp = Interpreter::new();
        interp
            .parse_script(
                "set $c 0\nwhile $c < 10 do\nset $c $c + 1\nif $c == 4 then\nbreak\nendif\nendloop\n",
            )
            .await
            .unwrap();
        assert_eq!(interp.get_var("c"), Some(&Value::Num(4.0)));
    }

    #[tokio::test]
    async fn script_break_in_doubly_nested_if_terminates_while() {
        let mut interp = Interpreter::new();
        interp
            .parse_script(
                concat!(
                    "set $c 0\n",
                    "while $c < 10 do\n",
                    "set $c $c + 1\n",
                    "if $c > 1 then\n",
                    "if $c == 3 then\n",
                    "break\n",
                    "endif\n",
                    "endif\n",
                    "endloop\n",
                ),
            )
            .await
            .unwrap();
        assert_eq!(interp.get_var("c"), Some(&Value::Num(3.0)));
    }

    #[tokio::test]
    async fn script_continue_skips_to_next_iteration() {
        let mut interp = Interpreter::new();
        interp
            .parse_script(
                concat!(
                    "set $sum 0\n",
                    "foreach $n in [1, 2, 3, 4] do\n",
                    "if $n == 2 then continue endif\n",
                    "set $sum $sum + $n\n",
                    "endloop\n",
                ),
            )
            .await
            .unwrap();
        assert_eq!(interp.get_var("sum"), Some(&Value::Num(8.0)));
    }

    #[tokio::test]
    async fn script_foreach_literal_order_and_count() {
        let mut interp = Interpreter::new();
        interp
            .parse_script("foreach $f in [\"x\",\"y\",\"z\"] do\nprint \"item: $f\"\nendloop\n")
            .await
            .unwrap();
        assert_eq!(
            interp.take_output(),
            vec!["item: x", "item: y", "item: z"]
        );
    }

    #[tokio::test]
    async fn script_foreach_empty_array_runs_zero_times() {
        let mut interp = Interpreter::new();
        interp
            .parse_script("set $ran 0\nforeach $f in [] do\nset $ran 1\nendloop\n")
            .await
            .unwrap();
        assert_eq!(interp.get_var("ran"), Some(&Value::Num(0.0)));
    }

    #[tokio::test]
    async fn script_foreach_over_variable_array() {
        let mut interp = Interpreter::new();
        interp.set_var(
            "items",
            Value::Str("[\"a\",\"b\",\"c\"]".into()),
        );
        interp
            .parse_script("set $count 0\nforeach $i in $items do\nset $count $count + 1\nendloop\n")
            .await
            .unwrap();
        assert_eq!(interp.get_var("count"), Some(&Value::Num(3.0)));
        // Loop-index variables reflect the final iteration.
        assert_eq!(interp.get_var("_index"), Some(&Value::Num(2.0)));
        assert_eq!(interp.get_var("_iteration"), Some(&Value::Num(3.0)));
        assert_eq!(interp.get_var("i"), Some(&Value::Str("c".into())));
    }

    #[tokio::test]
    async fn script_repeat_with_variable_count() {
        let mut interp = Interpreter::new();
        interp
            .parse_script("set $n 3\nset $c 0\nrepeat $n times do\nset $c $c + 1\nendloop\n")
            .await
            .unwrap();
        assert_eq!(interp.get_var("c"), Some(&Value::Num(3.0)));
    }

    #[tokio::test]
    async fn script_nested_loops_inner_break_only_exits_inner() {
        let mut interp = Interpreter::new();
        interp
            .parse_script(
                concat!(
                    "set $outer 0\n",
                    "set $inner 0\n",
                    "repeat 3 times do\n",
                    "set $outer $outer + 1\n",
                    "while $inner < 100 do\n",
                    "set $inner $inner + 1\n",
                    "break\n",
                    "endloop\n",
                    "endloop\n",
                ),
            )
            .await
            .unwrap();
        assert_eq!(interp.get_var("outer"), Some(&Value::Num(3.0)));
        assert_eq!(interp.get_var("inner"), Some(&Value::Num(3.0)));
    }

    #[tokio::test]
    async fn script_while_cap_aborts_runaway_loop() {
        let mut interp = Interpreter::new();
        let err = interp
            .parse_script("set $x 1\nwhile $x > 0 do\nset $x $x + 1\nendloop\n")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("maximum iterations"));
    }

    #[tokio::test]
    async fn script_top_level_break_is_a_control_flow_error() {
        let mut interp = Interpreter::new();
        let err = interp.parse_script("set $x 1\nbreak\n").await.unwrap_err();
        assert!(matches!(err, ScriptError::ControlFlow { signal: "break" }));
    }

    #[tokio::test]
    async fn script_condition_casings_are_equivalent() {
        let mut interp = Interpreter::new();
        interp
            .parse_script(
                concat!(
                    "set $a 1\n",
                    "set $b 2\n",
                    "if $a == 1 AND $b == 2 then\n",
                    "set $upper \"yes\"\n",
                    "endif\n",
                    "if $a == 1 and $b == 2 then\n",
                    "set $lower \"yes\"\n",
                    "endif\n",
                ),
            )
            .await
            .unwrap();
        assert_eq!(interp.get_var("upper"), Some(&Value::Str("yes".into())));
        assert_eq!(interp.get_var("lower"), Some(&Value::Str("yes".into())));
    }

    #[tokio::test]
    async fn validate_accepts_good_and_rejects_bad_scripts() {
        let interp = Interpreter::new();
        interp
            .validate_script("set $a 1\nif $a > 0 then\nprint $a\nendif\n")
            .unwrap();
        assert!(matches!(
            interp.validate_script("while $a < 3 do\nset $a 1\n"),
            Err(ScriptError::Structural { .. })
        ));
        assert!(matches!(
            interp.validate_script("set $a 1\nfrobnicate\n"),
            Err(ScriptError::Syntax { .. })
        ));
    }

    #[tokio::test]
    async fn comments_and_blank_lines_are_ignored() {
        let mut interp = Interpreter::new();
        interp
            .parse_script("# leading comment\n\n// slash comment\nset $x 1\n")
            .await
            .unwrap();
        assert_eq!(interp.get_var("x"), Some(&Value::Num(1.0)));
    }
}
