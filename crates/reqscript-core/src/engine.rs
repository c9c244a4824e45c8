//! HTTP execution engine.
//!
//! Owns the connection pool, the cookie jar, and the last-response
//! snapshot. Exactly one engine exists per interpreter; `extract`,
//! assertions, and response-dependent conditions all read the snapshot,
//! which is overwritten by the next request.
//!
//! # Failure capture
//!
//! Network failures (DNS, refused connections, timeouts) do not abort the
//! script. The request statement returns a synthetic failure string, the
//! snapshot is reset to a zero-status sentinel, and execution continues so
//! scripts can inspect `status` and react.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::header::HeaderMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::value::Value;

const USER_AGENT: &str = concat!("reqscript/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_IDLE_PER_HOST: usize = 10;
const MAX_HISTORY: usize = 100;

/// Authentication option for a single request.
#[derive(Debug, Clone)]
pub enum Auth {
    Basic { user: String, pass: String },
    Bearer(String),
}

/// Options accumulated from a request statement's option list.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub json: Option<String>,
    pub auth: Option<Auth>,
    pub timeout: Option<Duration>,
}

/// Everything preserved from the most recent response.
#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub body_bytes: Vec<u8>,
    pub body: String,
    pub headers: HeaderMap,
    pub elapsed_ms: f64,
    pub method: String,
    pub url: String,
}

impl ResponseSnapshot {
    /// The zero-status sentinel stored when a request fails on the wire.
    fn failure(method: &str, url: &str, elapsed_ms: f64) -> Self {
        ResponseSnapshot {
            status: 0,
            body_bytes: Vec::new(),
            body: String::new(),
            headers: HeaderMap::new(),
            elapsed_ms,
            method: method.to_string(),
            url: url.to_string(),
        }
    }
}

/// One completed (or failed) request, kept in a bounded ring for
/// diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub elapsed_ms: f64,
    pub timestamp: DateTime<Utc>,
}

pub struct HttpEngine {
    client: reqwest::Client,
    base_url: Option<String>,
    default_timeout: Duration,
    last: Option<ResponseSnapshot>,
    logs: Vec<String>,
    history: VecDeque<HistoryEntry>,
}

fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .cookie_store(true)
        .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
        .build()
        .expect("HTTP client initialization")
}

impl Default for HttpEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpEngine {
    pub fn new() -> Self {
        HttpEngine {
            client: build_client(),
            base_url: None,
            default_timeout: DEFAULT_TIMEOUT,
            last: None,
            logs: Vec::new(),
            history: VecDeque::with_capacity(MAX_HISTORY),
        }
    }

    /// Performs a request and stores the response snapshot.
    ///
    /// Returns a response summary on success and a synthetic failure string
    /// on a wire-level error; either way the snapshot is updated and the
    /// script keeps running.
    pub async fn request(&mut self, method: &str, url: &str, options: RequestOptions) -> Value {
        let url = self.resolve_url(url);
        let method_parsed = match reqwest::Method::from_bytes(method.as_bytes()) {
            Ok(m) => m,
            Err(_) => {
                self.last = Some(ResponseSnapshot::failure(method, &url, 0.0));
                return Value::Str(format!("unsupported method {}", method));
            }
        };

        let mut builder = self
            .client
            .request(method_parsed, &url)
            .timeout(options.timeout.unwrap_or(self.default_timeout));

        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &options.body {
            builder = builder.body(body.clone());
        }
        if let Some(json) = &options.json {
            // Sent as-is; the payload is not validated here.
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(json.clone());
        }
        match &options.auth {
            Some(Auth::Basic { user, pass }) => {
                builder = builder.basic_auth(user, Some(pass));
            }
            Some(Auth::Bearer(token)) => {
                builder = builder.bearer_auth(token);
            }
            None => {}
        }

        let start = Instant::now();
        let outcome = builder.send().await;
        match outcome {
            Ok(response) => {
                let status = response.status().as_u16();
                let headers = response.headers().clone();
                let bytes = match response.bytes().await {
                    Ok(b) => b.to_vec(),
                    Err(e) => {
                        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
                        return self.capture_failure(method, &url, elapsed_ms, &e.to_string());
                    }
                };
                let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
                let body = String::from_utf8_lossy(&bytes).into_owned();
                let size = bytes.len();

                info!(method, url = %url, status, elapsed_ms, size, "request completed");
                self.log_line(format!(
                    "{} {} - status {}, {:.2}ms, {} bytes",
                    method, url, status, elapsed_ms, size
                ));
                self.push_history(method, &url, status, elapsed_ms);
                self.last = Some(ResponseSnapshot {
                    status,
                    body_bytes: bytes,
                    body: body.clone(),
                    headers,
                    elapsed_ms,
                    method: method.to_string(),
                    url: url.clone(),
                });

                let mut summary = std::collections::BTreeMap::new();
                summary.insert("status".to_string(), Value::Num(status as f64));
                summary.insert("time".to_string(), Value::Num(elapsed_ms));
                summary.insert("size".to_string(), Value::Num(size as f64));
                summary.insert("body".to_string(), Value::Str(body));
                Value::Object(summary)
            }
            Err(e) => {
                let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
                self.capture_failure(method, &url, elapsed_ms, &e.to_string())
            }
        }
    }

    fn capture_failure(&mut self, method: &str, url: &str, elapsed_ms: f64, error: &str) -> Value {
        warn!(method, url = %url, error, "request failed");
        self.log_line(format!("{} {} failed: {}", method, url, error));
        self.push_history(method, url, 0, elapsed_ms);
        self.last = Some(ResponseSnapshot::failure(method, url, elapsed_ms));
        Value::Str(format!("{} {} failed: {}", method, url, error))
    }

    fn resolve_url(&self, url: &str) -> String {
        match &self.base_url {
            Some(base) if !url.starts_with("http") => {
                format!("{}{}", base, url.trim_start_matches('/'))
            }
            _ => url.to_string(),
        }
    }

    fn push_history(&mut self, method: &str, url: &str, status: u16, elapsed_ms: f64) {
        if self.history.len() >= MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(HistoryEntry {
            method: method.to_string(),
            url: url.to_string(),
            status,
            elapsed_ms,
            timestamp: Utc::now(),
        });
    }

    // -----------------------------------------------------------------
    // Snapshot access
    // -----------------------------------------------------------------

    pub fn last_response(&self) -> Option<&ResponseSnapshot> {
        self.last.as_ref()
    }

    pub fn has_response(&self) -> bool {
        self.last.is_some()
    }

    pub fn last_status(&self) -> u16 {
        self.last.as_ref().map(|s| s.status).unwrap_or(0)
    }

    pub fn last_elapsed_ms(&self) -> f64 {
        self.last.as_ref().map(|s| s.elapsed_ms).unwrap_or(0.0)
    }

    pub fn last_body(&self) -> &str {
        self.last.as_ref().map(|s| s.body.as_str()).unwrap_or("")
    }

    // -----------------------------------------------------------------
    // Extraction
    // -----------------------------------------------------------------

    /// Evaluates an extraction query against the last response.
    ///
    /// Returns [`Value::Null`] when nothing matches. Callers are expected
    /// to have checked [`HttpEngine::has_response`] first; without a
    /// response everything extracts as null.
    pub fn extract(&self, kind: &str, pattern: &str) -> Value {
        match kind {
            "status" => Value::Num(self.last_status() as f64),
            "header" => {
                let value = self
                    .last
                    .as_ref()
                    .and_then(|s| s.headers.get(pattern))
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                Value::Str(value.to_string())
            }
            "jsonpath" => self.extract_json_path(pattern),
            "xpath" => self.extract_xpath(pattern),
            "regex" => self.extract_regex(pattern),
            _ => Value::Null,
        }
    }

    fn extract_json_path(&self, path: &str) -> Value {
        let data: serde_json::Value = match serde_json::from_str(self.last_body()) {
            Ok(v) => v,
            Err(_) => return Value::Null,
        };
        json_path(&data, path)
    }

    /// Only the `//tag` form is recognized: the inner text of the first
    /// matching tag, found with a regular expression rather than a real
    /// markup parser.
    fn extract_xpath(&self, path: &str) -> Value {
        let Some(rest) = path.strip_prefix("//") else {
            return Value::Null;
        };
        let tag = rest.split('/').next().unwrap_or(rest);
        if tag.is_empty() {
            return Value::Null;
        }
        let pattern = format!("<{tag}[^>]*>(.*?)</{tag}>", tag = regex::escape(tag));
        match Regex::new(&pattern) {
            Ok(re) => re
                .captures(self.last_body())
                .and_then(|c| c.get(1))
                .map(|m| Value::Str(m.as_str().to_string()))
                .unwrap_or(Value::Null),
            Err(_) => Value::Null,
        }
    }

    /// First capturing group if the pattern has one, else the full match.
    fn extract_regex(&self, pattern: &str) -> Value {
        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(_) => return Value::Null,
        };
        match re.captures(self.last_body()) {
            Some(caps) => {
                if let Some(group) = caps.get(1) {
                    Value::Str(group.as_str().to_string())
                } else {
                    Value::Str(caps.get(0).map(|m| m.as_str()).unwrap_or("").to_string())
                }
            }
            None => Value::Null,
        }
    }

    // -----------------------------------------------------------------
    // Utilities
    // -----------------------------------------------------------------

    pub async fn wait(&self, milliseconds: u64) {
        tokio::time::sleep(Duration::from_millis(milliseconds)).await;
    }

    pub fn log(&mut self, message: &str) {
        info!(msg = %message, "script log");
        self.log_line(message.to_string());
    }

    pub fn debug_log(&mut self, message: &str) {
        debug!(msg = %message, "script debug");
        self.log_line(format!("DEBUG: {}", message));
    }

    fn log_line(&mut self, message: String) {
        let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
        self.logs.push(format!("[{}] {}", stamp, message));
    }

    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    /// Drops all cookies by rebuilding the client around a fresh jar.
    pub fn clear_cookies(&mut self) {
        self.client = build_client();
    }

    /// Returns the engine to its initial state.
    pub fn reset(&mut self) {
        self.clear_cookies();
        self.base_url = None;
        self.default_timeout = DEFAULT_TIMEOUT;
        self.last = None;
        self.logs.clear();
        self.history.clear();
    }

    /// Sets the prefix applied to subsequent relative request URLs.
    pub fn set_base_url(&mut self, url: &str) {
        let mut base = url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        self.base_url = Some(base);
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// Adjusts the timeout applied to requests without an explicit
    /// `timeout` option.
    pub fn set_default_timeout(&mut self, timeout: Duration) {
        self.default_timeout = timeout;
    }
}

/// Restricted JSONPath evaluation: `$` (root), `.field`, `[N]`, a root
/// filter `[?(@.field OP value)]` with an optional trailing projection.
/// A filter with exactly one result yields the scalar; several yield an
/// array.
fn json_path(root: &serde_json::Value, path: &str) -> Value {
    if path == "$" {
        return Value::from_json(root);
    }

    if let Some(rest) = path.strip_prefix("$[?(@.") {
        return json_path_filter(root, rest);
    }

    // Root array index: $[N] with an optional remaining path.
    if let Some(rest) = path.strip_prefix("$[") {
        let Some(close) = rest.find(']') else {
            return Value::Null;
        };
        let Ok(index) = rest[..close].parse::<usize>() else {
            return Value::Null;
        };
        let Some(element) = root.as_array().and_then(|a| a.get(index)) else {
            return Value::Null;
        };
        let remainder = &rest[close + 1..];
        if remainder.is_empty() {
            return Value::from_json(element);
        }
        if let Some(sub) = remainder.strip_prefix('.') {
            return json_path(element, &format!("$.{}", sub));
        }
        return Value::Null;
    }

    // Dotted field access with optional [N] indexing per segment.
    let Some(dotted) = path.strip_prefix("$.") else {
        return Value::Null;
    };
    let mut current = root;
    for part in dotted.split('.') {
        if let Some(open) = part.find('[') {
            let field = &part[..open];
            let Some(close) = part.find(']') else {
                return Value::Null;
            };
            let Ok(index) = part[open + 1..close].parse::<usize>() else {
                return Value::Null;
            };
            let Some(next) = current.get(field).and_then(|v| v.get(index)) else {
                return Value::Null;
            };
            current = next;
        } else {
            let Some(next) = current.get(part) else {
                return Value::Null;
            };
            current = next;
        }
    }
    Value::from_json(current)
}

/// Evaluates `field OP value)].projection?` against a root-level array.
fn json_path_filter(root: &serde_json::Value, rest: &str) -> Value {
    let Some(close) = rest.find(")]") else {
        return Value::Null;
    };
    let expr = &rest[..close];
    let projection = rest[close + 2..].strip_prefix('.');

    let (field, op, target) = match ["==", "!=", ">", "<"]
        .iter()
        .find_map(|op| {
            let sep = format!(" {} ", op);
            expr.split_once(&sep).map(|(f, v)| (f, *op, v))
        }) {
        Some(parts) => parts,
        None => return Value::Null,
    };
    let target = target.trim_matches(|c| c == '"' || c == '\'');

    let Some(items) = root.as_array() else {
        return Value::Null;
    };

    let mut results: Vec<Value> = Vec::new();
    for item in items {
        let Some(obj) = item.as_object() else {
            continue;
        };
        let Some(found) = obj.get(field) else {
            continue;
        };
        let found_str = match found {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let numeric = found_str
            .parse::<f64>()
            .ok()
            .zip(target.parse::<f64>().ok());
        let matched = match (op, numeric) {
            ("==", Some((a, b))) => a == b,
            ("!=", Some((a, b))) => a != b,
            (">", Some((a, b))) => a > b,
            ("<", Some((a, b))) => a < b,
            ("==", None) => found_str == target,
            ("!=", None) => found_str != target,
            // Ordered comparison needs numbers on both sides.
            _ => false,
        };
        if !matched {
            continue;
        }
        match projection {
            Some(field) => {
                if let Some(projected) = obj.get(field) {
                    results.push(Value::from_json(projected));
                }
            }
            None => results.push(Value::from_json(item)),
        }
    }

    match results.len() {
        0 => Value::Null,
        1 => results.remove(0),
        _ => Value::Array(results),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_body(body: &str) -> HttpEngine {
        let mut engine = HttpEngine::new();
        engine.last = Some(ResponseSnapshot {
            status: 200,
            body_bytes: body.as_bytes().to_vec(),
            body: body.to_string(),
            headers: HeaderMap::new(),
            elapsed_ms: 12.5,
            method: "GET".to_string(),
            url: "http://test.local/".to_string(),
        });
        engine
    }

    #[test]
    fn jsonpath_nested_field() {
        let engine = engine_with_body(r#"{"user":{"id":42}}"#);
        assert_eq!(engine.extract("jsonpath", "$.user.id"), Value::Num(42.0));
    }

    #[test]
    fn jsonpath_field_with_array_index() {
        let engine = engine_with_body(r#"{"users":[{"id":1},{"id":2}]}"#);
        assert_eq!(engine.extract("jsonpath", "$.users[1].id"), Value::Num(2.0));
    }

    #[test]
    fn jsonpath_root_index_with_remaining_path() {
        let engine = engine_with_body(r#"[{"name":"a"},{"name":"b"}]"#);
        assert_eq!(
            engine.extract("jsonpath", "$[1].name"),
            Value::Str("b".into())
        );
    }

    #[test]
    fn jsonpath_filter_single_result_is_scalar() {
        let engine =
            engine_with_body(r#"[{"userId":1,"title":"first"},{"userId":2,"title":"second"}]"#);
        assert_eq!(
            engine.extract("jsonpath", "$[?(@.userId == 2)].title"),
            Value::Str("second".into())
        );
    }

    #[test]
    fn jsonpath_filter_multiple_results_is_array() {
        let engine = engine_with_body(
            r#"[{"kind":"x","n":1},{"kind":"x","n":2},{"kind":"y","n":3}]"#,
        );
        assert_eq!(
            engine.extract("jsonpath", "$[?(@.kind == x)].n"),
            Value::Array(vec![Value::Num(1.0), Value::Num(2.0)])
        );
    }

    #[test]
    fn jsonpath_filter_numeric_ordering() {
        let engine = engine_with_body(r#"[{"n":5},{"n":15}]"#);
        assert_eq!(
            engine.extract("jsonpath", "$[?(@.n > 10)].n"),
            Value::Num(15.0)
        );
    }

    #[test]
    fn jsonpath_missing_path_is_null() {
        let engine = engine_with_body(r#"{"a":1}"#);
        assert_eq!(engine.extract("jsonpath", "$.b.c"), Value::Null);
    }

    #[test]
    fn jsonpath_on_invalid_json_is_null() {
        let engine = engine_with_body("not json");
        assert_eq!(engine.extract("jsonpath", "$.a"), Value::Null);
    }

    #[test]
    fn xpath_extracts_first_tag_inner_text() {
        let engine = engine_with_body("<html><title>Hello</title><title>Again</title></html>");
        assert_eq!(engine.extract("xpath", "//title"), Value::Str("Hello".into()));
    }

    #[test]
    fn xpath_unmatched_tag_is_null() {
        let engine = engine_with_body("<html></html>");
        assert_eq!(engine.extract("xpath", "//missing"), Value::Null);
    }

    #[test]
    fn regex_prefers_capture_group() {
        let engine = engine_with_body(r#"token=abc123;"#);
        assert_eq!(
            engine.extract("regex", r"token=(\w+)"),
            Value::Str("abc123".into())
        );
        assert_eq!(
            engine.extract("regex", r"token=\w+"),
            Value::Str("token=abc123".into())
        );
    }

    #[test]
    fn regex_invalid_pattern_is_null() {
        let engine = engine_with_body("anything");
        assert_eq!(engine.extract("regex", "("), Value::Null);
    }

    #[test]
    fn header_extraction_is_case_insensitive() {
        let mut engine = engine_with_body("");
        if let Some(snapshot) = engine.last.as_mut() {
            snapshot
                .headers
                .insert("X-Request-Id", "abc".parse().unwrap());
        }
        assert_eq!(
            engine.extract("header", "x-request-id"),
            Value::Str("abc".into())
        );
        assert_eq!(engine.extract("header", "Missing"), Value::Str("".into()));
    }

    #[test]
    fn status_extraction() {
        let engine = engine_with_body("{}");
        assert_eq!(engine.extract("status", ""), Value::Num(200.0));
    }

    #[test]
    fn base_url_prefixes_relative_requests() {
        let mut engine = HttpEngine::new();
        engine.set_base_url("http://api.local");
        assert_eq!(engine.resolve_url("/users"), "http://api.local/users");
        assert_eq!(engine.resolve_url("users"), "http://api.local/users");
        assert_eq!(
            engine.resolve_url("http://other.local/x"),
            "http://other.local/x"
        );
    }

    #[test]
    fn reset_clears_state() {
        let mut engine = engine_with_body("{}");
        engine.set_base_url("http://api.local");
        engine.log("hello");
        engine.reset();
        assert!(!engine.has_response());
        assert!(engine.base_url().is_none());
        assert!(engine.logs().is_empty());
    }

    #[tokio::test]
    async fn failed_request_sets_zero_status_sentinel() {
        let mut engine = HttpEngine::new();
        // Nothing listens on this port; connection is refused immediately.
        let result = engine
            .request("GET", "http://127.0.0.1:9/unreachable", RequestOptions::default())
            .await;
        match result {
            Value::Str(msg) => assert!(msg.contains("failed")),
            other => panic!("expected failure string, got {:?}", other),
        }
        assert!(engine.has_response());
        assert_eq!(engine.last_status(), 0);
        assert_eq!(engine.last_body(), "");
    }
}
