//! Rule actions: the behavior attached to each grammar reduction.
//!
//! The parse tree is evaluated bottom-up in a single pass, children before
//! parents, so every action runs exactly once per statement. Actions
//! mutate the interpreter (variable writes, context flags) and drive the
//! HTTP engine, and return a short string describing their effect.
//!
//! Note that bottom-up evaluation means the inline conditional forms see
//! both branches already evaluated; the block preprocessor recognizes
//! single-line `if`/`then`/`else` textually before grammar dispatch to
//! guarantee exactly one branch runs (see [`crate::blocks`]).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::engine::{Auth, RequestOptions};
use crate::error::ScriptError;
use crate::eval::{arithmetic, compare_values};
use crate::grammar::{Action, Node};
use crate::interpreter::Interpreter;
use crate::value::{parse_json_array, split_bracketed_list, Value};

/// Intermediate reduction results. Request options need structure that a
/// plain [`Value`] does not carry; everything else flows as values.
#[derive(Debug, Clone)]
pub(crate) enum Reduced {
    Val(Value),
    Opt(ReqOpt),
    Opts(Vec<ReqOpt>),
}

#[derive(Debug, Clone)]
pub(crate) enum ReqOpt {
    Header(String, String),
    Body(String),
    Json(String),
    AuthBasic(String, String),
    AuthBearer(String),
    Timeout(Duration),
}

/// Evaluates a parsed statement tree to its final value.
pub(crate) async fn eval_program(
    interp: &mut Interpreter,
    node: &Node,
) -> Result<Value, ScriptError> {
    match eval_node(interp, node).await? {
        Reduced::Val(v) => Ok(v),
        _ => Err(ScriptError::syntax("incomplete statement")),
    }
}

fn eval_node<'a>(
    interp: &'a mut Interpreter,
    node: &'a Node,
) -> Pin<Box<dyn Future<Output = Result<Reduced, ScriptError>> + 'a>> {
    Box::pin(async move {
        match node {
            Node::Leaf(token) => Ok(Reduced::Val(Value::Str(token.lexeme.clone()))),
            Node::Reduce { action, children } => {
                let mut args = Vec::with_capacity(children.len());
                for child in children {
                    args.push(eval_node(interp, child).await?);
                }
                apply_action(interp, *action, args).await
            }
        }
    })
}

fn val(args: &[Reduced], i: usize) -> Result<&Value, ScriptError> {
    match args.get(i) {
        Some(Reduced::Val(v)) => Ok(v),
        _ => Err(ScriptError::syntax("malformed statement")),
    }
}

fn text(args: &[Reduced], i: usize) -> Result<String, ScriptError> {
    val(args, i).map(|v| v.as_string())
}

fn number(args: &[Reduced], i: usize) -> Result<f64, ScriptError> {
    let v = val(args, i)?;
    v.as_number()
        .ok_or_else(|| ScriptError::semantic(format!("'{}' is not a number", v.as_string())))
}

fn statements(args: &[Reduced], i: usize) -> Result<&[Value], ScriptError> {
    match val(args, i)? {
        Value::Array(items) => Ok(items),
        _ => Err(ScriptError::syntax("malformed statement")),
    }
}

async fn apply_action(
    interp: &mut Interpreter,
    action: Action,
    mut args: Vec<Reduced>,
) -> Result<Reduced, ScriptError> {
    match action {
        // ---------------------------------------------------------- structure
        Action::Pass => args
            .into_iter()
            .next()
            .ok_or_else(|| ScriptError::syntax("malformed statement")),
        Action::Second => args
            .into_iter()
            .nth(1)
            .ok_or_else(|| ScriptError::syntax("malformed statement")),
        Action::StatementSingle => {
            let v = val(&args, 0)?.clone();
            Ok(Reduced::Val(Value::Array(vec![v])))
        }
        Action::StatementList => {
            let head = val(&args, 0)?.clone();
            let mut rest = match args.remove(1) {
                Reduced::Val(Value::Array(items)) => items,
                _ => return Err(ScriptError::syntax("malformed statement")),
            };
            let mut list = vec![head];
            list.append(&mut rest);
            Ok(Reduced::Val(Value::Array(list)))
        }
        Action::Program => {
            let stmts = statements(&args, 0)?;
            let mut last = Value::Null;
            for v in stmts {
                last = v.clone();
                if interp.context.break_flag {
                    break;
                }
                if interp.context.continue_flag {
                    interp.context.continue_flag = false;
                    continue;
                }
            }
            Ok(Reduced::Val(last))
        }

        // ------------------------------------------------------- control flow
        Action::BreakStmt => {
            interp.context.break_flag = true;
            Ok(Reduced::Val(Value::Str("break".into())))
        }
        Action::ContinueStmt => {
            interp.context.continue_flag = true;
            Ok(Reduced::Val(Value::Str("continue".into())))
        }

        // ------------------------------------------------------ HTTP requests
        Action::MethodName | Action::TimeUnit | Action::KeywordName => args
            .into_iter()
            .next()
            .ok_or_else(|| ScriptError::syntax("malformed statement")),
        Action::UrlString | Action::UrlDirect => {
            let url = text(&args, 0)?;
            Ok(Reduced::Val(Value::Str(interp.expand_variables(&url))))
        }
        Action::UrlVariable => {
            let name = text(&args, 0)?;
            match interp.variables.get(&name) {
                Some(v) => Ok(Reduced::Val(Value::Str(v.as_string()))),
                None => Err(ScriptError::semantic(format!(
                    "variable ${} not found",
                    name
                ))),
            }
        }
        Action::OptHeader => {
            let key = text(&args, 1)?;
            let value = interp.expand_variables(&text(&args, 2)?);
            Ok(Reduced::Opt(ReqOpt::Header(key, value)))
        }
        Action::OptBody => {
            let body = interp.expand_variables(&text(&args, 1)?);
            Ok(Reduced::Opt(ReqOpt::Body(body)))
        }
        Action::OptJsonStr | Action::OptJsonInline => {
            let json = interp.expand_variables(&text(&args, 1)?);
            Ok(Reduced::Opt(ReqOpt::Json(json)))
        }
        Action::OptAuthBasic => {
            let user = interp.expand_variables(&text(&args, 2)?);
            let pass = interp.expand_variables(&text(&args, 3)?);
            Ok(Reduced::Opt(ReqOpt::AuthBasic(user, pass)))
        }
        Action::OptAuthBearer => {
            let token = interp.expand_variables(&text(&args, 2)?);
            Ok(Reduced::Opt(ReqOpt::AuthBearer(token)))
        }
        Action::OptTimeout => {
            let amount = number(&args, 1)?;
            let unit = text(&args, 2)?;
            let ms = if unit == "s" { amount * 1000.0 } else { amount };
            Ok(Reduced::Opt(ReqOpt::Timeout(Duration::from_millis(ms as u64))))
        }
        Action::OptionFirst => match args.remove(0) {
            Reduced::Opt(opt) => Ok(Reduced::Opts(vec![opt])),
            _ => Err(ScriptError::syntax("malformed statement")),
        },
        Action::OptionAppend => {
            let opt = match args.remove(1) {
                Reduced::Opt(opt) => opt,
                _ => return Err(ScriptError::syntax("malformed statement")),
            };
            match args.remove(0) {
                Reduced::Opts(mut list) => {
                    list.push(opt);
                    Ok(Reduced::Opts(list))
                }
                _ => Err(ScriptError::syntax("malformed statement")),
            }
        }
        Action::RequestSimple => {
            let method = text(&args, 0)?;
            let url = text(&args, 1)?;
            let result = interp
                .engine
                .request(&method, &url, RequestOptions::default())
                .await;
            Ok(Reduced::Val(result))
        }
        Action::RequestWithOptions => {
            let method = text(&args, 0)?;
            let url = text(&args, 1)?;
            let opts = match args.remove(2) {
                Reduced::Opts(list) => list,
                _ => return Err(ScriptError::syntax("malformed statement")),
            };
            let mut options = RequestOptions::default();
            for opt in opts {
                match opt {
                    ReqOpt::Header(k, v) => options.headers.push((k, v)),
                    ReqOpt::Body(b) => options.body = Some(b),
                    ReqOpt::Json(j) => options.json = Some(j),
                    ReqOpt::AuthBasic(user, pass) => {
                        options.auth = Some(Auth::Basic { user, pass });
                    }
                    ReqOpt::AuthBearer(token) => options.auth = Some(Auth::Bearer(token)),
                    ReqOpt::Timeout(d) => options.timeout = Some(d),
                }
            }
            let result = interp.engine.request(&method, &url, options).await;
            Ok(Reduced::Val(result))
        }

        // ------------------------------------------- variables and expressions
        Action::SetVariable => {
            let name = text(&args, 1)?;
            let value = val(&args, 2)?.clone();
            let described = value.as_string();
            interp.variables.insert(name.clone(), value);
            Ok(Reduced::Val(Value::Str(format!(
                "variable ${} set to {}",
                name, described
            ))))
        }
        Action::ArithmeticOp => {
            let left = number(&args, 0)?;
            let op = text(&args, 1)?;
            let right = number(&args, 2)?;
            Ok(Reduced::Val(Value::Num(arithmetic(&op, left, right)?)))
        }
        Action::ValueString => {
            let s = text(&args, 0)?;
            Ok(Reduced::Val(Value::Str(interp.expand_variables(&s))))
        }
        Action::ValueNumber => {
            let n = number(&args, 0)?;
            Ok(Reduced::Val(Value::Num(n)))
        }
        Action::ValueVariable => {
            let name = text(&args, 0)?;
            match interp.variables.get(&name) {
                Some(v) => Ok(Reduced::Val(v.clone())),
                None => Err(ScriptError::semantic(format!(
                    "variable ${} not found",
                    name
                ))),
            }
        }
        Action::LengthFn => {
            let name = text(&args, 1)?;
            let len = interp
                .variables
                .get(&name)
                .map(|v| v.length())
                .unwrap_or(0);
            Ok(Reduced::Val(Value::Num(len as f64)))
        }
        Action::SplitFn => {
            let name = text(&args, 1)?;
            let delimiter = text(&args, 2)?;
            let source = match interp.variables.get(&name) {
                Some(v) => v.as_string(),
                None => {
                    return Err(ScriptError::semantic(format!(
                        "variable ${} not found",
                        name
                    )));
                }
            };
            let parts = source
                .split(delimiter.as_str())
                .map(|p| Value::Str(p.to_string()))
                .collect();
            Ok(Reduced::Val(Value::Array(parts)))
        }
        Action::IndexByNumber => {
            let name = text(&args, 0)?;
            let index = text(&args, 2)?
                .parse::<usize>()
                .map_err(|_| ScriptError::semantic("array index must be a whole number"))?;
            Ok(Reduced::Val(index_into(interp, &name, index)?))
        }
        Action::IndexByVariable => {
            let name = text(&args, 0)?;
            let index_name = text(&args, 2)?;
            let index = match interp.variables.get(&index_name) {
                Some(v) => v.as_number().ok_or_else(|| {
                    ScriptError::semantic(format!(
                        "index variable ${} is not a number",
                        index_name
                    ))
                })? as usize,
                None => {
                    return Err(ScriptError::semantic(format!(
                        "index variable ${} not found",
                        index_name
                    )));
                }
            };
            Ok(Reduced::Val(index_into(interp, &name, index)?))
        }

        // -------------------------------------------------------------- print
        Action::PrintVariable => {
            let name = text(&args, 1)?;
            let line = match interp.variables.get(&name) {
                Some(v) => format!("${} = {}", name, v.as_string()),
                None => format!("variable ${} not found", name),
            };
            interp.output.push(line.clone());
            Ok(Reduced::Val(Value::Str(line)))
        }
        Action::PrintString => {
            let line = interp.expand_variables(&text(&args, 1)?);
            interp.output.push(line.clone());
            Ok(Reduced::Val(Value::Str(line)))
        }

        // ---------------------------------------------------------- extraction
        Action::ExtractWithPattern => {
            let kind = text(&args, 1)?;
            let pattern = text(&args, 2)?;
            let name = text(&args, 4)?;
            Ok(Reduced::Val(run_extract(interp, &kind, &pattern, &name)))
        }
        Action::ExtractNoPattern => {
            let kind = text(&args, 1)?;
            let name = text(&args, 3)?;
            Ok(Reduced::Val(run_extract(interp, &kind, "", &name)))
        }

        // -------------------------------------------------------- conditionals
        Action::CompareCond => {
            let left = val(&args, 0)?;
            let op = text(&args, 1)?;
            let right = val(&args, 2)?;
            Ok(Reduced::Val(Value::Bool(compare_values(left, &op, right))))
        }
        Action::ContainsCond => {
            let haystack = text(&args, 0)?;
            let needle = text(&args, 2)?;
            Ok(Reduced::Val(Value::Bool(haystack.contains(&needle))))
        }
        Action::EmptyCond => {
            let s = text(&args, 0)?;
            Ok(Reduced::Val(Value::Bool(
                s.is_empty() || s == "0" || s == "false",
            )))
        }
        Action::ExistsCond => {
            let exists = *val(&args, 0)? != Value::Null;
            Ok(Reduced::Val(Value::Bool(exists)))
        }
        Action::AndCond => {
            let result = val(&args, 0)?.is_truthy() && val(&args, 2)?.is_truthy();
            Ok(Reduced::Val(Value::Bool(result)))
        }
        Action::OrCond => {
            let result = val(&args, 0)?.is_truthy() || val(&args, 2)?.is_truthy();
            Ok(Reduced::Val(Value::Bool(result)))
        }
        Action::NotCond => {
            let result = !val(&args, 1)?.is_truthy();
            Ok(Reduced::Val(Value::Bool(result)))
        }
        Action::IfInline => {
            let truthy = val(&args, 1)?.is_truthy();
            if truthy {
                Ok(Reduced::Val(val(&args, 3)?.clone()))
            } else {
                Ok(Reduced::Val(Value::Null))
            }
        }
        Action::IfElseInline => {
            let truthy = val(&args, 1)?.is_truthy();
            let index = if truthy { 3 } else { 5 };
            Ok(Reduced::Val(val(&args, index)?.clone()))
        }
        Action::IfBlock => {
            let truthy = val(&args, 1)?.is_truthy();
            if truthy {
                let body = statements(&args, 3)?;
                Ok(Reduced::Val(body.last().cloned().unwrap_or(Value::Null)))
            } else {
                Ok(Reduced::Val(Value::Null))
            }
        }
        Action::IfElseBlock => {
            let truthy = val(&args, 1)?.is_truthy();
            let index = if truthy { 3 } else { 5 };
            let body = statements(&args, index)?;
            Ok(Reduced::Val(body.last().cloned().unwrap_or(Value::Null)))
        }

        // ---------------------------------------------------------- assertions
        Action::AssertStatus => {
            let expected = number(&args, 1)? as u16;
            let actual = interp.engine.last_status();
            if actual == expected {
                Ok(Reduced::Val(Value::Str(format!("status is {}", expected))))
            } else {
                Err(ScriptError::Assertion {
                    expected: format!("status {}", expected),
                    actual: format!("status {}", actual),
                })
            }
        }
        Action::AssertTime => {
            let max = number(&args, 2)?;
            let actual = interp.engine.last_elapsed_ms();
            if actual < max {
                Ok(Reduced::Val(Value::Str(format!(
                    "response time {:.2}ms < {:.0}ms",
                    actual, max
                ))))
            } else {
                Err(ScriptError::Assertion {
                    expected: format!("time less than {:.0}ms", max),
                    actual: format!("{:.2}ms", actual),
                })
            }
        }
        Action::AssertContains => {
            let needle = interp.expand_variables(&text(&args, 2)?);
            if interp.engine.last_body().contains(&needle) {
                Ok(Reduced::Val(Value::Str(format!(
                    "response contains \"{}\"",
                    needle
                ))))
            } else {
                Err(ScriptError::Assertion {
                    expected: format!("response containing \"{}\"", needle),
                    actual: format!(
                        "{} byte response without it",
                        interp.engine.last_body().len()
                    ),
                })
            }
        }

        // ----------------------------------------------------------- utilities
        Action::WaitCmd => {
            let amount = number(&args, 1)?;
            let unit = text(&args, 2)?;
            let ms = if unit == "s" { amount * 1000.0 } else { amount };
            interp.engine.wait(ms as u64).await;
            Ok(Reduced::Val(Value::Str(format!("waited {:.0}ms", ms))))
        }
        Action::LogCmd => {
            let message = interp.expand_variables(&text(&args, 1)?);
            interp.engine.log(&message);
            Ok(Reduced::Val(Value::Str(format!("logged: {}", message))))
        }
        Action::DebugCmd => {
            let message = interp.expand_variables(&text(&args, 1)?);
            interp.engine.debug_log(&message);
            Ok(Reduced::Val(Value::Str(format!("debug: {}", message))))
        }
        Action::ClearCookies => {
            interp.engine.clear_cookies();
            Ok(Reduced::Val(Value::Str("cookies cleared".into())))
        }
        Action::ResetCmd => {
            interp.reset_state();
            Ok(Reduced::Val(Value::Str("reset complete".into())))
        }
        Action::SetBaseUrl => {
            let url = interp.expand_variables(&text(&args, 2)?);
            interp.engine.set_base_url(&url);
            Ok(Reduced::Val(Value::Str(format!("base url set to {}", url))))
        }

        // ---------------------------------------------------- single-line loops
        // The body statements were already evaluated once, bottom-up; these
        // bind the loop-index variables and consume a pending break. Real
        // iteration lives in the block preprocessor.
        Action::RepeatLoop => {
            let times = text(&args, 1)?.parse::<usize>().unwrap_or(0);
            for i in 0..times {
                interp.variables.insert("_index".into(), Value::Num(i as f64));
                interp
                    .variables
                    .insert("_iteration".into(), Value::Num((i + 1) as f64));
                if interp.context.break_flag {
                    interp.context.break_flag = false;
                    break;
                }
            }
            Ok(Reduced::Val(Value::Str(format!("repeated {} times", times))))
        }
        Action::WhileLoop => {
            let condition = val(&args, 1)?.is_truthy();
            let mut iterations = 0usize;
            while iterations < crate::blocks::MAX_WHILE_ITERATIONS {
                if !condition {
                    break;
                }
                interp
                    .variables
                    .insert("_iteration".into(), Value::Num((iterations + 1) as f64));
                if interp.context.break_flag {
                    interp.context.break_flag = false;
                    break;
                }
                iterations += 1;
            }
            if iterations >= crate::blocks::MAX_WHILE_ITERATIONS {
                return Err(ScriptError::semantic(format!(
                    "while loop exceeded maximum iterations ({})",
                    crate::blocks::MAX_WHILE_ITERATIONS
                )));
            }
            Ok(Reduced::Val(Value::Str(format!(
                "while loop executed {} times",
                iterations
            ))))
        }
        Action::ForeachLoop => {
            let item_name = text(&args, 1)?;
            let list_name = text(&args, 3)?;
            let items = match interp.variables.get(&list_name) {
                Some(Value::Array(items)) => items.clone(),
                Some(Value::Str(s)) => parse_json_array(s).unwrap_or_else(|| {
                    s.split(',')
                        .map(|p| Value::Str(p.trim().to_string()))
                        .collect()
                }),
                Some(_) => {
                    return Err(ScriptError::semantic(format!(
                        "variable ${} is not iterable",
                        list_name
                    )));
                }
                None => {
                    return Err(ScriptError::semantic(format!(
                        "list variable ${} not found",
                        list_name
                    )));
                }
            };
            for (i, item) in items.into_iter().enumerate() {
                interp.variables.insert(item_name.clone(), item);
                interp.variables.insert("_index".into(), Value::Num(i as f64));
                if interp.context.break_flag {
                    interp.context.break_flag = false;
                    break;
                }
            }
            Ok(Reduced::Val(Value::Str(format!(
                "foreach completed for ${}",
                list_name
            ))))
        }
    }
}

fn run_extract(interp: &mut Interpreter, kind: &str, pattern: &str, name: &str) -> Value {
    if !interp.engine.has_response() {
        interp
            .variables
            .insert(name.to_string(), Value::Str(String::new()));
        tracing::warn!(variable = %name, "no response available for extraction");
        return Value::Str(format!(
            "warning: no response available for extraction; ${} set to empty",
            name
        ));
    }
    let mut value = interp.engine.extract(kind, pattern);
    if value == Value::Null {
        value = Value::Str(String::new());
    }
    interp.variables.insert(name.to_string(), value);
    if pattern.is_empty() {
        Value::Str(format!("extracted {} into ${}", kind, name))
    } else {
        Value::Str(format!("extracted {} \"{}\" into ${}", kind, pattern, name))
    }
}

/// Indexes into an array variable, a string holding a bracketed list, or
/// the characters of a plain string.
fn index_into(interp: &Interpreter, name: &str, index: usize) -> Result<Value, ScriptError> {
    let value = interp
        .variables
        .get(name)
        .ok_or_else(|| ScriptError::semantic(format!("variable ${} not found", name)))?;
    match value {
        Value::Array(items) => items
            .get(index)
            .cloned()
            .ok_or_else(|| ScriptError::semantic(format!("array index out of bounds: {}", index))),
        Value::Str(s) => {
            let elements =
                parse_json_array(s).or_else(|| {
                    if s.trim_start().starts_with('[') {
                        Some(split_bracketed_list(s))
                    } else {
                        None
                    }
                });
            match elements {
                Some(items) => items.get(index).cloned().ok_or_else(|| {
                    ScriptError::semantic(format!("array index out of bounds: {}", index))
                }),
                None => s
                    .chars()
                    .nth(index)
                    .map(|c| Value::Str(c.to_string()))
                    .ok_or_else(|| {
                        ScriptError::semantic(format!("string index out of bounds: {}", index))
                    }),
            }
        }
        _ => Err(ScriptError::semantic(format!(
            "variable ${} is not an array",
            name
        ))),
    }
}
