//! Label selector expressions.
//!
//! The grammar is the familiar control-plane one: comma-separated
//! requirements, each either equality-based (`app=web`, `tier!=cache`) or
//! set-based (`env in (dev,staging)`, `release notin (canary)`, `gpu`,
//! `!legacy`). An empty expression matches everything.

use std::collections::HashMap;
use std::str::FromStr;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Op {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Requirement {
    key: String,
    op: Op,
    values: Vec<String>,
}

impl Requirement {
    fn matches(&self, labels: &HashMap<String, String>) -> bool {
        match self.op {
            Op::Exists => labels.contains_key(&self.key),
            Op::DoesNotExist => !labels.contains_key(&self.key),
            Op::In => labels
                .get(&self.key)
                .map(|v| self.values.iter().any(|want| want == v))
                .unwrap_or(false),
            Op::NotIn => labels
                .get(&self.key)
                .map(|v| !self.values.iter().any(|want| want == v))
                .unwrap_or(true),
        }
    }
}

/// A parsed label-matching predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// The selector that matches every object.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Parse a selector expression. Fails with `BadRequest` on malformed input.
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Ok(Self::everything());
        }

        let mut requirements = Vec::new();
        for part in split_requirements(expr) {
            requirements.push(parse_requirement(part.trim())?);
        }
        Ok(Self { requirements })
    }

    /// True when every requirement holds for the given label set.
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl FromStr for Selector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Selector::parse(s)
    }
}

/// Split on commas outside of `(...)` value lists.
fn split_requirements(expr: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in expr.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&expr[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&expr[start..]);
    parts
}

fn parse_requirement(req: &str) -> Result<Requirement> {
    if req.is_empty() {
        return Err(Error::BadRequest("empty selector requirement".into()));
    }

    if let Some(rest) = req.strip_prefix('!') {
        let key = rest.trim();
        validate_key(key)?;
        return Ok(Requirement { key: key.to_string(), op: Op::DoesNotExist, values: vec![] });
    }

    // Set-based forms: "key in (a,b)" / "key notin (a,b)".
    for (word, op) in [(" notin ", Op::NotIn), (" in ", Op::In)] {
        if let Some(idx) = req.find(word) {
            let key = req[..idx].trim();
            validate_key(key)?;
            let values = parse_value_list(req[idx + word.len()..].trim())?;
            return Ok(Requirement { key: key.to_string(), op, values });
        }
    }

    // Equality forms, longest operator first so "!=" and "==" win over "=".
    for (sym, op) in [("!=", Op::NotIn), ("==", Op::In), ("=", Op::In)] {
        if let Some(idx) = req.find(sym) {
            let key = req[..idx].trim();
            let value = req[idx + sym.len()..].trim();
            validate_key(key)?;
            return Ok(Requirement {
                key: key.to_string(),
                op,
                values: vec![value.to_string()],
            });
        }
    }

    // Bare key: existence.
    validate_key(req)?;
    Ok(Requirement { key: req.to_string(), op: Op::Exists, values: vec![] })
}

fn parse_value_list(list: &str) -> Result<Vec<String>> {
    let inner = list
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| Error::BadRequest(format!("expected parenthesized value list, got {:?}", list)))?;
    let values: Vec<String> = inner
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        return Err(Error::BadRequest("empty value list in selector".into()));
    }
    Ok(values)
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains(|c: char| c.is_whitespace() || c == '(' || c == ')' || c == ',') {
        return Err(Error::BadRequest(format!("invalid selector key {:?}", key)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn empty_matches_everything() {
        let sel = Selector::parse("").unwrap();
        assert!(sel.is_empty());
        assert!(sel.matches(&labels(&[])));
        assert!(sel.matches(&labels(&[("app", "web")])));
    }

    #[test]
    fn equality_and_inequality() {
        let sel = Selector::parse("app=web,tier!=cache").unwrap();
        assert!(sel.matches(&labels(&[("app", "web"), ("tier", "frontend")])));
        assert!(sel.matches(&labels(&[("app", "web")])));
        assert!(!sel.matches(&labels(&[("app", "web"), ("tier", "cache")])));
        assert!(!sel.matches(&labels(&[("app", "api")])));
    }

    #[test]
    fn double_equals_is_equality() {
        let sel = Selector::parse("app==web").unwrap();
        assert!(sel.matches(&labels(&[("app", "web")])));
        assert!(!sel.matches(&labels(&[("app", "api")])));
    }

    #[test]
    fn set_based_in_and_notin() {
        let sel = Selector::parse("env in (dev, staging)").unwrap();
        assert!(sel.matches(&labels(&[("env", "dev")])));
        assert!(sel.matches(&labels(&[("env", "staging")])));
        assert!(!sel.matches(&labels(&[("env", "prod")])));
        assert!(!sel.matches(&labels(&[])));

        let sel = Selector::parse("env notin (prod)").unwrap();
        assert!(sel.matches(&labels(&[("env", "dev")])));
        assert!(sel.matches(&labels(&[])));
        assert!(!sel.matches(&labels(&[("env", "prod")])));
    }

    #[test]
    fn existence_forms() {
        let sel = Selector::parse("gpu").unwrap();
        assert!(sel.matches(&labels(&[("gpu", "true")])));
        assert!(!sel.matches(&labels(&[])));

        let sel = Selector::parse("!legacy").unwrap();
        assert!(sel.matches(&labels(&[])));
        assert!(!sel.matches(&labels(&[("legacy", "yes")])));
    }

    #[test]
    fn commas_inside_value_lists_do_not_split() {
        let sel = Selector::parse("env in (dev,staging),app=web").unwrap();
        assert!(sel.matches(&labels(&[("env", "dev"), ("app", "web")])));
        assert!(!sel.matches(&labels(&[("env", "dev"), ("app", "api")])));
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert!(Selector::parse("env in dev").is_err());
        assert!(Selector::parse("=web").is_err());
        assert!(Selector::parse("a,,b").is_err());
        assert!(Selector::parse("env in ()").is_err());
    }
}
