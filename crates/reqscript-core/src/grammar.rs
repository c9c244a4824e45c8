//! Rule-table grammar engine with left-recursion support.
//!
//! The grammar is data: named rules, each with ordered alternatives of
//! symbols (token matchers or rule references) and an [`Action`] tag.
//! Parsing is a packrat pass (per `(rule, position)` memoization over
//! ordered alternatives) extended with growing-seed left recursion
//! so list-building rules like
//! `option_list := option | option_list option` work directly and preserve
//! option order.
//!
//! Parsing produces a [`Node`] tree and performs no side effects; actions
//! are applied afterwards in a single bottom-up pass (see
//! [`crate::actions`]), so each action runs exactly once regardless of how
//! much backtracking the parse needed.

use std::collections::HashMap;

use crate::error::ScriptError;
use crate::lexer::{Token, TokenKind};

/// Action tag attached to each rule; identifies the reduction behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    // Structure
    Program,
    StatementList,
    StatementSingle,
    /// Returns the first child's value unchanged.
    Pass,
    /// Returns the second child's value unchanged.
    Second,
    // Control flow
    BreakStmt,
    ContinueStmt,
    // HTTP requests
    RequestWithOptions,
    RequestSimple,
    OptionFirst,
    OptionAppend,
    OptHeader,
    OptBody,
    OptJsonStr,
    OptJsonInline,
    OptAuthBasic,
    OptAuthBearer,
    OptTimeout,
    MethodName,
    UrlString,
    UrlDirect,
    UrlVariable,
    TimeUnit,
    // Variables and expressions
    SetVariable,
    ArithmeticOp,
    ValueString,
    ValueNumber,
    ValueVariable,
    LengthFn,
    SplitFn,
    IndexByNumber,
    IndexByVariable,
    PrintVariable,
    PrintString,
    ExtractWithPattern,
    ExtractNoPattern,
    KeywordName,
    // Conditionals
    IfBlock,
    IfElseBlock,
    IfInline,
    IfElseInline,
    CompareCond,
    ContainsCond,
    EmptyCond,
    ExistsCond,
    AndCond,
    OrCond,
    NotCond,
    // Assertions
    AssertStatus,
    AssertTime,
    AssertContains,
    // Utilities
    WaitCmd,
    LogCmd,
    DebugCmd,
    ClearCookies,
    ResetCmd,
    SetBaseUrl,
    // Single-line loops
    RepeatLoop,
    WhileLoop,
    ForeachLoop,
}

/// A symbol in a rule body.
#[derive(Debug, Clone)]
enum Sym {
    /// Any token of this kind.
    Kind(TokenKind),
    /// A keyword or HTTP-method token with this exact lexeme.
    Kw(&'static str),
    /// A reference to another rule, resolved to an id when compiled.
    Rule(&'static str),
}

#[derive(Debug, Clone)]
enum CompiledSym {
    Kind(TokenKind),
    Kw(&'static str),
    Rule(usize),
}

struct RuleSpec {
    name: &'static str,
    symbols: Vec<Sym>,
    action: Action,
}

struct CompiledRule {
    symbols: Vec<CompiledSym>,
    action: Action,
}

/// A compiled grammar: rule alternatives grouped by rule id, in
/// registration order.
pub struct Grammar {
    alternatives: Vec<Vec<CompiledRule>>,
    /// Rules with a directly left-recursive alternative get seed growth.
    left_recursive: Vec<bool>,
    program: usize,
}

impl Grammar {
    fn compile(specs: Vec<RuleSpec>) -> Grammar {
        let mut ids: HashMap<&'static str, usize> = HashMap::new();
        for spec in &specs {
            let next = ids.len();
            ids.entry(spec.name).or_insert(next);
        }
        let rule_count = ids.len();

        let mut alternatives: Vec<Vec<CompiledRule>> = (0..rule_count).map(|_| Vec::new()).collect();
        let mut left_recursive = vec![false; rule_count];
        for spec in specs {
            let id = ids[spec.name];
            if let Some(Sym::Rule(first)) = spec.symbols.first() {
                if *first == spec.name {
                    left_recursive[id] = true;
                }
            }
            let symbols = spec
                .symbols
                .into_iter()
                .map(|s| match s {
                    Sym::Kind(k) => CompiledSym::Kind(k),
                    Sym::Kw(w) => CompiledSym::Kw(w),
                    Sym::Rule(name) => CompiledSym::Rule(ids[name]),
                })
                .collect();
            alternatives[id].push(CompiledRule {
                symbols,
                action: spec.action,
            });
        }

        let program = ids["program"];
        Grammar {
            alternatives,
            left_recursive,
            program,
        }
    }
}

/// A node of the reduced parse tree. Leaves are matched tokens; interior
/// nodes carry the action of the rule that reduced them.
#[derive(Debug, Clone)]
pub enum Node {
    Leaf(Token),
    Reduce { action: Action, children: Vec<Node> },
}

#[derive(Clone)]
enum Memo {
    Fail,
    Match { node: Node, end: usize },
}

impl Memo {
    fn to_opt(&self) -> Option<(Node, usize)> {
        match self {
            Memo::Fail => None,
            Memo::Match { node, end } => Some((node.clone(), *end)),
        }
    }
}

struct Parser<'a> {
    grammar: &'a Grammar,
    tokens: &'a [Token],
    memo: HashMap<(usize, usize), Memo>,
    /// Journal frames for active left-recursion heads. Every memo store is
    /// recorded in all open frames; when a head's seed grows, entries made
    /// under the stale seed are purged and recomputed.
    journal: Vec<Vec<(usize, usize)>>,
}

impl<'a> Parser<'a> {
    fn new(grammar: &'a Grammar, tokens: &'a [Token]) -> Self {
        Parser {
            grammar,
            tokens,
            memo: HashMap::new(),
            journal: Vec::new(),
        }
    }

    fn store(&mut self, key: (usize, usize), entry: Memo) {
        for frame in &mut self.journal {
            frame.push(key);
        }
        self.memo.insert(key, entry);
    }

    fn apply_rule(&mut self, id: usize, pos: usize) -> Option<(Node, usize)> {
        let key = (id, pos);
        if let Some(entry) = self.memo.get(&key) {
            return entry.to_opt();
        }
        // The seed: recursive references at the same position see a
        // failure until a base alternative has matched.
        self.memo.insert(key, Memo::Fail);

        if !self.grammar.left_recursive[id] {
            let result = self.try_alternatives(id, pos);
            let entry = match &result {
                Some((node, end)) => Memo::Match {
                    node: node.clone(),
                    end: *end,
                },
                None => Memo::Fail,
            };
            self.store(key, entry);
            return result;
        }

        // Seed growth: re-run the alternatives against the current seed
        // until a pass stops extending the match. Each growth invalidates
        // memo entries computed under the previous, shorter seed. The seed
        // end strictly increases and is bounded by the token count, so the
        // loop terminates.
        loop {
            self.journal.push(Vec::new());
            let attempt = self.try_alternatives(id, pos);
            let created = self.journal.pop().unwrap_or_default();

            let grew = match (&attempt, self.memo.get(&key)) {
                (Some((_, end)), Some(Memo::Match { end: seed_end, .. })) => end > seed_end,
                (Some(_), Some(Memo::Fail)) | (Some(_), None) => true,
                _ => false,
            };
            if grew {
                for k in created {
                    if k != key {
                        self.memo.remove(&k);
                    }
                }
                if let Some((node, end)) = attempt {
                    self.store(key, Memo::Match { node, end });
                }
            } else {
                break;
            }
        }
        self.memo.get(&key).and_then(|m| m.to_opt())
    }

    /// Tries every alternative of a rule and keeps the longest match;
    /// ties go to registration order. Longest-match selection is what
    /// lets a grown left-recursion seed beat a shorter non-recursive
    /// alternative (e.g. `$a[0] + 1` over just `$a[0]`).
    fn try_alternatives(&mut self, id: usize, pos: usize) -> Option<(Node, usize)> {
        let count = self.grammar.alternatives[id].len();
        let mut best: Option<(Node, usize)> = None;
        for alt in 0..count {
            if let Some((node, end)) = self.match_alternative(id, alt, pos) {
                let better = match &best {
                    Some((_, best_end)) => end > *best_end,
                    None => true,
                };
                if better {
                    best = Some((node, end));
                }
            }
        }
        best
    }

    fn match_alternative(&mut self, id: usize, alt: usize, pos: usize) -> Option<(Node, usize)> {
        let len = self.grammar.alternatives[id][alt].symbols.len();
        let action = self.grammar.alternatives[id][alt].action;
        let mut children = Vec::with_capacity(len);
        let mut cur = pos;
        for i in 0..len {
            let sym = self.grammar.alternatives[id][alt].symbols[i].clone();
            match sym {
                CompiledSym::Kind(kind) => {
                    let token = self.tokens.get(cur)?;
                    if token.kind != kind {
                        return None;
                    }
                    children.push(Node::Leaf(token.clone()));
                    cur += 1;
                }
                CompiledSym::Kw(word) => {
                    let token = self.tokens.get(cur)?;
                    let is_word = matches!(token.kind, TokenKind::Keyword | TokenKind::Method);
                    if !is_word || token.lexeme != word {
                        return None;
                    }
                    children.push(Node::Leaf(token.clone()));
                    cur += 1;
                }
                CompiledSym::Rule(rule_id) => {
                    let (node, end) = self.apply_rule(rule_id, cur)?;
                    children.push(node);
                    cur = end;
                }
            }
        }
        Some((Node::Reduce { action, children }, cur))
    }
}

/// Parses a token stream against the grammar's `program` rule, requiring
/// the whole stream to be consumed.
pub fn parse_program(grammar: &Grammar, tokens: &[Token]) -> Result<Node, ScriptError> {
    if tokens.is_empty() {
        return Err(ScriptError::syntax("empty statement"));
    }
    let mut parser = Parser::new(grammar, tokens);
    match parser.apply_rule(grammar.program, 0) {
        Some((node, end)) if end == tokens.len() => Ok(node),
        Some((_, end)) => {
            let t = &tokens[end];
            Err(ScriptError::syntax(format!(
                "line {}: unexpected '{}' at column {}",
                t.line, t.lexeme, t.column
            )))
        }
        None => {
            let t = &tokens[0];
            Err(ScriptError::syntax(format!(
                "line {}: no rule matches statement starting with '{}'",
                t.line, t.lexeme
            )))
        }
    }
}

/// Builds the script grammar. The longest-matching alternative wins;
/// registration order breaks ties, so more specific forms are listed
/// first.
pub fn script_grammar() -> Grammar {
    use Sym::{Kind, Kw, Rule};
    let mut specs: Vec<RuleSpec> = Vec::new();
    let mut rule = |name: &'static str, symbols: Vec<Sym>, action: Action| {
        specs.push(RuleSpec {
            name,
            symbols,
            action,
        });
    };

    rule("program", vec![Rule("statements")], Action::Program);

    rule(
        "statements",
        vec![Rule("statement"), Rule("statements")],
        Action::StatementList,
    );
    rule("statements", vec![Rule("statement")], Action::StatementSingle);

    for sub in [
        "http_request",
        "variable_op",
        "print_cmd",
        "conditional",
        "loop_stmt",
        "assertion",
        "utility",
        "control_flow",
    ] {
        rule("statement", vec![Rule(sub)], Action::Pass);
    }

    rule("control_flow", vec![Kw("break")], Action::BreakStmt);
    rule("control_flow", vec![Kw("continue")], Action::ContinueStmt);

    rule(
        "http_request",
        vec![Rule("http_method"), Rule("url_value"), Rule("option_list")],
        Action::RequestWithOptions,
    );
    rule(
        "http_request",
        vec![Rule("http_method"), Rule("url_value")],
        Action::RequestSimple,
    );

    rule("option_list", vec![Rule("option")], Action::OptionFirst);
    rule(
        "option_list",
        vec![Rule("option_list"), Rule("option")],
        Action::OptionAppend,
    );

    rule(
        "option",
        vec![Kw("header"), Kind(TokenKind::Str), Kind(TokenKind::Str)],
        Action::OptHeader,
    );
    rule(
        "option",
        vec![Kw("body"), Kind(TokenKind::Str)],
        Action::OptBody,
    );
    rule(
        "option",
        vec![Kw("json"), Kind(TokenKind::Str)],
        Action::OptJsonStr,
    );
    rule(
        "option",
        vec![Kw("json"), Kind(TokenKind::JsonInline)],
        Action::OptJsonInline,
    );
    rule(
        "option",
        vec![
            Kw("auth"),
            Kw("basic"),
            Kind(TokenKind::Str),
            Kind(TokenKind::Str),
        ],
        Action::OptAuthBasic,
    );
    rule(
        "option",
        vec![Kw("auth"), Kw("bearer"), Kind(TokenKind::Str)],
        Action::OptAuthBearer,
    );
    rule(
        "option",
        vec![Kw("timeout"), Kind(TokenKind::Number), Rule("time_unit")],
        Action::OptTimeout,
    );

    rule(
        "http_method",
        vec![Kind(TokenKind::Method)],
        Action::MethodName,
    );

    rule("url_value", vec![Kind(TokenKind::Str)], Action::UrlString);
    rule("url_value", vec![Kind(TokenKind::Url)], Action::UrlDirect);
    rule(
        "url_value",
        vec![Kind(TokenKind::Variable)],
        Action::UrlVariable,
    );

    rule("time_unit", vec![Kw("ms")], Action::TimeUnit);
    rule("time_unit", vec![Kw("s")], Action::TimeUnit);

    rule("variable_op", vec![Rule("set_var")], Action::Pass);
    rule("variable_op", vec![Rule("extract_var")], Action::Pass);

    for kw in ["set", "var"] {
        rule(
            "set_var",
            vec![Kw(kw), Kind(TokenKind::Variable), Rule("expression")],
            Action::SetVariable,
        );
    }

    rule("expression", vec![Rule("array_access")], Action::Pass);
    rule("expression", vec![Rule("function_call")], Action::Pass);
    rule(
        "expression",
        vec![Rule("expression"), Kind(TokenKind::Arithmetic), Rule("term")],
        Action::ArithmeticOp,
    );
    rule("expression", vec![Rule("term")], Action::Pass);

    rule("term", vec![Rule("value")], Action::Pass);

    rule("value", vec![Kind(TokenKind::Str)], Action::ValueString);
    rule("value", vec![Kind(TokenKind::Number)], Action::ValueNumber);
    rule("value", vec![Kind(TokenKind::Variable)], Action::ValueVariable);

    rule(
        "function_call",
        vec![Kw("length"), Kind(TokenKind::Variable)],
        Action::LengthFn,
    );
    rule(
        "function_call",
        vec![Kw("split"), Kind(TokenKind::Variable), Kind(TokenKind::Str)],
        Action::SplitFn,
    );

    rule(
        "array_access",
        vec![
            Kind(TokenKind::Variable),
            Kind(TokenKind::LBracket),
            Kind(TokenKind::Number),
            Kind(TokenKind::RBracket),
        ],
        Action::IndexByNumber,
    );
    rule(
        "array_access",
        vec![
            Kind(TokenKind::Variable),
            Kind(TokenKind::LBracket),
            Kind(TokenKind::Variable),
            Kind(TokenKind::RBracket),
        ],
        Action::IndexByVariable,
    );

    rule(
        "print_cmd",
        vec![Kw("print"), Kind(TokenKind::Variable)],
        Action::PrintVariable,
    );
    rule(
        "print_cmd",
        vec![Kw("print"), Kind(TokenKind::Str)],
        Action::PrintString,
    );

    rule(
        "extract_var",
        vec![
            Kw("extract"),
            Rule("extract_type"),
            Kind(TokenKind::Str),
            Kw("as"),
            Kind(TokenKind::Variable),
        ],
        Action::ExtractWithPattern,
    );
    rule(
        "extract_var",
        vec![
            Kw("extract"),
            Rule("extract_type"),
            Kw("as"),
            Kind(TokenKind::Variable),
        ],
        Action::ExtractNoPattern,
    );

    for kw in ["jsonpath", "xpath", "regex", "header", "status"] {
        rule("extract_type", vec![Kw(kw)], Action::KeywordName);
    }

    // Block forms before inline forms; they consume the trailing `endif`.
    rule(
        "conditional",
        vec![
            Kw("if"),
            Rule("condition"),
            Kw("then"),
            Rule("statements"),
            Kw("else"),
            Rule("statements"),
            Kw("endif"),
        ],
        Action::IfElseBlock,
    );
    rule(
        "conditional",
        vec![
            Kw("if"),
            Rule("condition"),
            Kw("then"),
            Rule("statements"),
            Kw("endif"),
        ],
        Action::IfBlock,
    );
    rule(
        "conditional",
        vec![
            Kw("if"),
            Rule("condition"),
            Kw("then"),
            Rule("statement"),
            Kw("else"),
            Rule("statement"),
        ],
        Action::IfElseInline,
    );
    rule(
        "conditional",
        vec![Kw("if"), Rule("condition"), Kw("then"), Rule("statement")],
        Action::IfInline,
    );

    rule(
        "condition",
        vec![Rule("condition"), Kw("and"), Rule("simple_condition")],
        Action::AndCond,
    );
    rule(
        "condition",
        vec![Rule("condition"), Kw("or"), Rule("simple_condition")],
        Action::OrCond,
    );
    rule("condition", vec![Kw("not"), Rule("condition")], Action::NotCond);
    rule("condition", vec![Rule("simple_condition")], Action::Pass);

    rule(
        "simple_condition",
        vec![Rule("value"), Kind(TokenKind::Comparison), Rule("value")],
        Action::CompareCond,
    );
    rule(
        "simple_condition",
        vec![Rule("value"), Kw("contains"), Rule("value")],
        Action::ContainsCond,
    );
    rule(
        "simple_condition",
        vec![Rule("value"), Kw("empty")],
        Action::EmptyCond,
    );
    rule(
        "simple_condition",
        vec![Rule("value"), Kw("exists")],
        Action::ExistsCond,
    );

    for kw in ["assert", "expect"] {
        rule("assertion", vec![Kw(kw), Rule("assertion_type")], Action::Second);
    }
    rule(
        "assertion_type",
        vec![Kw("status"), Kind(TokenKind::Number)],
        Action::AssertStatus,
    );
    rule(
        "assertion_type",
        vec![Kw("time"), Kw("less"), Kind(TokenKind::Number), Kw("ms")],
        Action::AssertTime,
    );
    rule(
        "assertion_type",
        vec![Kw("response"), Kw("contains"), Kind(TokenKind::Str)],
        Action::AssertContains,
    );

    for kw in ["wait", "sleep"] {
        rule(
            "utility",
            vec![Kw(kw), Kind(TokenKind::Number), Rule("time_unit")],
            Action::WaitCmd,
        );
    }
    rule("utility", vec![Kw("log"), Kind(TokenKind::Str)], Action::LogCmd);
    rule(
        "utility",
        vec![Kw("debug"), Kind(TokenKind::Str)],
        Action::DebugCmd,
    );
    rule(
        "utility",
        vec![Kw("clear"), Kw("cookies")],
        Action::ClearCookies,
    );
    rule("utility", vec![Kw("reset")], Action::ResetCmd);
    rule(
        "utility",
        vec![Kw("base"), Kw("url"), Kind(TokenKind::Str)],
        Action::SetBaseUrl,
    );

    rule(
        "loop_stmt",
        vec![
            Kw("repeat"),
            Kind(TokenKind::Number),
            Kw("times"),
            Kw("do"),
            Rule("statements"),
            Kw("endloop"),
        ],
        Action::RepeatLoop,
    );
    rule(
        "loop_stmt",
        vec![
            Kw("while"),
            Rule("condition"),
            Kw("do"),
            Rule("statements"),
            Kw("endloop"),
        ],
        Action::WhileLoop,
    );
    rule(
        "loop_stmt",
        vec![
            Kw("foreach"),
            Kind(TokenKind::Variable),
            Kw("in"),
            Kind(TokenKind::Variable),
            Kw("do"),
            Rule("statements"),
            Kw("endloop"),
        ],
        Action::ForeachLoop,
    );

    Grammar::compile(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse(input: &str) -> Result<Node, ScriptError> {
        let grammar = script_grammar();
        let tokens = tokenize(input).unwrap();
        parse_program(&grammar, &tokens)
    }

    fn top_action(node: &Node) -> Action {
        // program -> statements -> statement -> <actual>
        fn unwrap(node: &Node) -> &Node {
            match node {
                Node::Reduce { action, children } => match action {
                    Action::Program
                    | Action::StatementSingle
                    | Action::Pass => unwrap(&children[0]),
                    Action::Second => unwrap(&children[1]),
                    _ => node,
                },
                Node::Leaf(_) => node,
            }
        }
        match unwrap(node) {
            Node::Reduce { action, .. } => *action,
            Node::Leaf(_) => panic!("expected a reduction"),
        }
    }

    #[test]
    fn parses_simple_request() {
        let node = parse(r#"GET "https://example.com""#).unwrap();
        assert_eq!(top_action(&node), Action::RequestSimple);
    }

    #[test]
    fn parses_request_with_chained_options() {
        let node =
            parse(r#"GET "https://example.com" header "A" "1" header "B" "2" timeout 5 s"#)
                .unwrap();
        assert_eq!(top_action(&node), Action::RequestWithOptions);
    }

    #[test]
    fn option_list_preserves_order_via_left_recursion() {
        let node = parse(r#"GET "https://x.dev" header "A" "1" header "B" "2" header "C" "3""#)
            .unwrap();
        // Walk to the option_list reduction and check the nesting shape:
        // ((A B) C): appended options hang off the right.
        fn find(node: &Node, wanted: Action) -> Option<&Node> {
            match node {
                Node::Reduce { action, children } => {
                    if *action == wanted {
                        return Some(node);
                    }
                    children.iter().find_map(|c| find(c, wanted))
                }
                Node::Leaf(_) => None,
            }
        }
        let append = find(&node, Action::OptionAppend).expect("no option append");
        match append {
            Node::Reduce { children, .. } => assert_eq!(children.len(), 2),
            _ => unreachable!(),
        }
    }

    #[test]
    fn parses_left_recursive_arithmetic() {
        let node = parse("set $total $a + $b + 3").unwrap();
        assert_eq!(top_action(&node), Action::SetVariable);
    }

    #[test]
    fn parses_set_with_array_access() {
        let node = parse("set $first $items[0]").unwrap();
        assert_eq!(top_action(&node), Action::SetVariable);
    }

    #[test]
    fn parses_extract_with_and_without_pattern() {
        assert_eq!(
            top_action(&parse(r#"extract jsonpath "$.token" as $t"#).unwrap()),
            Action::ExtractWithPattern
        );
        assert_eq!(
            top_action(&parse("extract status as $code").unwrap()),
            Action::ExtractNoPattern
        );
    }

    #[test]
    fn parses_inline_if_endif() {
        let node = parse("if $c == 3 then break endif").unwrap();
        assert_eq!(top_action(&node), Action::IfBlock);
    }

    #[test]
    fn parses_inline_if_else() {
        let node = parse(r#"if 5 > 3 then set $a "Y" else set $a "N""#).unwrap();
        assert_eq!(top_action(&node), Action::IfElseInline);
    }

    #[test]
    fn parses_compound_condition() {
        let node = parse(r#"if $a > 1 and $b < 2 or $c == 3 then set $x 1"#).unwrap();
        assert_eq!(top_action(&node), Action::IfInline);
    }

    #[test]
    fn parses_assertion_forms() {
        assert_eq!(
            top_action(&parse("assert status 200").unwrap()),
            Action::AssertStatus
        );
        assert_eq!(
            top_action(&parse("expect time less 500 ms").unwrap()),
            Action::AssertTime
        );
        assert_eq!(
            top_action(&parse(r#"assert response contains "ok""#).unwrap()),
            Action::AssertContains
        );
    }

    #[test]
    fn rejects_unknown_statement() {
        assert!(matches!(
            parse("frobnicate $x"),
            Err(ScriptError::Syntax { .. })
        ));
    }

    #[test]
    fn rejects_trailing_garbage() {
        let err = parse("set $x 1 ]").unwrap_err();
        assert!(err.to_string().contains("unexpected"));
    }

    #[test]
    fn multiple_statements_on_one_line() {
        let node = parse(r#"set $x 1 set $y 2"#).unwrap();
        match node {
            Node::Reduce {
                action: Action::Program,
                children,
            } => match &children[0] {
                Node::Reduce { action, .. } => assert_eq!(*action, Action::StatementList),
                _ => panic!("expected statement list"),
            },
            _ => panic!("expected program"),
        }
    }
}
