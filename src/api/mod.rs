//! JSON API contract
//!
//! Transport-agnostic: [`Api::handle`] takes a method, a path with query
//! string and a body, and returns the status and JSON the presentation
//! layer serves. Stage and toolchain failures come back as structured data
//! with status 200; only validation, lookup and internal faults change the
//! status code.

pub mod handlers;
pub mod types;

pub use types::{ApiReply, CompileBody, CompileData};

use crate::core::types::JobMode;
use crate::pipeline::Orchestrator;
use serde_json::json;
use std::collections::BTreeMap;

/// Decoded query string
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query(BTreeMap<String, String>);

impl Query {
    pub fn parse(raw: &str) -> Self {
        let pairs = raw
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => (decode(key), decode(value)),
                None => (decode(pair), String::new()),
            })
            .collect();
        Self(pairs)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn number(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }
}

/// Percent-decoding with `+` as space
fn decode(component: &str) -> String {
    let bytes = component.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            byte => out.push(byte),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[derive(Clone)]
pub struct Api {
    orchestrator: Orchestrator,
}

impl Api {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn handle(&self, method: &str, path: &str, body: &str) -> ApiReply {
        let (route, raw_query) = path.split_once('?').unwrap_or((path, ""));
        let query = Query::parse(raw_query);
        let method = method.to_ascii_uppercase();
        let route = route.trim_end_matches('/');
        log::debug!("api {} {}", method, route);

        match (method.as_str(), route) {
            ("POST", "/api/compile") => handlers::compile(&self.orchestrator, body, JobMode::Compile),
            ("POST", "/api/analyze") => handlers::compile(&self.orchestrator, body, JobMode::Analyze),
            ("GET", "/api/visualization") | ("GET", "/api/vizualize") => {
                handlers::visualization(&self.orchestrator, &query)
            }
            ("GET", "/api/step") => handlers::step(&self.orchestrator, &query),
            ("GET", "/api/download") => handlers::download(&self.orchestrator, &query),
            ("GET", "/api/job") => handlers::job(&self.orchestrator, &query),
            ("POST", "/api/cancel") => handlers::cancel(&self.orchestrator, &query),
            (_, "/api/compile" | "/api/analyze" | "/api/visualization" | "/api/step"
                | "/api/download" | "/api/job" | "/api/cancel") => ApiReply::json(
                405,
                json!({ "success": false, "error": format!("method {} not allowed", method) }),
            ),
            _ => ApiReply::json(
                404,
                json!({ "success": false, "error": format!("no route for {}", route) }),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_decoding() {
        let query = Query::parse("id=abc-123&stage=parse%20tree&x&name=a+b");
        assert_eq!(query.get("id"), Some("abc-123"));
        assert_eq!(query.get("stage"), Some("parse tree"));
        assert_eq!(query.get("x"), Some(""));
        assert_eq!(query.get("name"), Some("a b"));
        assert_eq!(Query::parse("step=3").number("step"), Some(3));
        assert_eq!(Query::parse("bad=%zz").get("bad"), Some("%zz"));
    }
}
