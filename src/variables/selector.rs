//! Variable selection (`ARGS:foo`, `&ARGS`, `REQUEST_HEADERS:/^x-/`).

use super::collection::{Collection, MatchData};
use super::store::VariableStore;
use super::variable::Variable;
use crate::error::{Error, Result};
use regex::Regex;

/// A key excluded from a selection.
#[derive(Debug, Clone)]
pub enum KeyException {
    /// Exact key, compared with the collection's case rules.
    Literal(String),
    /// Keys matching a pattern.
    Pattern(Regex),
}

/// Which fields of a variable to read.
#[derive(Debug, Clone)]
pub struct VariableSelector {
    /// The variable.
    pub variable: Variable,
    /// Literal key (`ARGS:foo`).
    pub key: Option<String>,
    /// Key pattern (`ARGS:/^foo/`). Takes precedence over `key`.
    pub key_regex: Option<Regex>,
    /// Excluded keys (`!ARGS:foo`).
    pub exceptions: Vec<KeyException>,
    /// Return the number of fields instead of the fields (`&ARGS`).
    pub count: bool,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::RegexCompile {
        pattern: pattern.to_string(),
        source: e,
    })
}

impl VariableSelector {
    /// Select every field of a variable.
    pub fn new(variable: Variable) -> Self {
        Self {
            variable,
            key: None,
            key_regex: None,
            exceptions: Vec::new(),
            count: false,
        }
    }

    /// Restrict to a literal key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Restrict to keys matching a pattern.
    pub fn with_key_regex(mut self, pattern: &str) -> Result<Self> {
        self.key_regex = Some(compile(pattern)?);
        Ok(self)
    }

    /// Exclude a literal key.
    pub fn except(mut self, key: impl Into<String>) -> Self {
        self.exceptions.push(KeyException::Literal(key.into()));
        self
    }

    /// Exclude keys matching a pattern.
    pub fn except_regex(mut self, pattern: &str) -> Result<Self> {
        self.exceptions.push(KeyException::Pattern(compile(pattern)?));
        Ok(self)
    }

    /// Count fields instead of returning them.
    pub fn counted(mut self) -> Self {
        self.count = true;
        self
    }

    /// Parse a single selector such as `&ARGS`, `ARGS:id` or `ARGS:/^user/`.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (count, input) = match input.strip_prefix('&') {
            Some(rest) => (true, rest),
            None => (false, input),
        };

        let (name, selection) = match input.split_once(':') {
            Some((name, sel)) => (name, Some(sel)),
            None => (input, None),
        };

        let mut selector = Self::new(Variable::parse(name)?);
        selector.count = count;
        match selection {
            Some(sel) if sel.len() >= 2 && sel.starts_with('/') && sel.ends_with('/') => {
                selector = selector.with_key_regex(&sel[1..sel.len() - 1])?;
            }
            Some(sel) => selector.key = Some(sel.to_string()),
            None => {}
        }
        Ok(selector)
    }

    /// Parse a `|`-separated selector list. `!VAR:key` entries become
    /// exceptions of every selector of the same variable.
    pub fn parse_list(input: &str) -> Result<Vec<Self>> {
        let mut selectors = Vec::new();
        let mut exclusions = Vec::new();

        for part in input.split('|').map(str::trim).filter(|p| !p.is_empty()) {
            match part.strip_prefix('!') {
                Some(excl) => exclusions.push(Self::parse(excl)?),
                None => selectors.push(Self::parse(part)?),
            }
        }

        for selector in &mut selectors {
            for excl in exclusions.iter().filter(|e| e.variable == selector.variable) {
                if let Some(re) = &excl.key_regex {
                    selector.exceptions.push(KeyException::Pattern(re.clone()));
                } else if let Some(key) = &excl.key {
                    selector.exceptions.push(KeyException::Literal(key.clone()));
                }
            }
        }
        Ok(selectors)
    }

    /// Resolve the selection against a store.
    ///
    /// A key pattern wins over a literal key; with neither every field is
    /// returned. Exceptions are applied before counting.
    pub fn select(&self, store: &VariableStore) -> Vec<MatchData> {
        let collection = store.collection(self.variable);

        let mut fields = match (&self.key_regex, &self.key) {
            (Some(re), _) => collection.find_regex(re),
            (None, Some(key)) => collection.find_string(key),
            (None, None) => collection.find_all(),
        };

        if !self.exceptions.is_empty() && collection.is_keyed() {
            fields.retain(|field| {
                !self.exceptions.iter().any(|ex| match ex {
                    KeyException::Literal(key) => collection.matches_key(&field.key, key),
                    KeyException::Pattern(re) => collection.matches_pattern(&field.key, re),
                })
            });
        }

        if self.count {
            return vec![MatchData::new(self.variable, "", fields.len().to_string())];
        }
        fields
    }
}
