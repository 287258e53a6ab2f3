//! Collection trait and implementations.

use super::variable::{KeyCase, Variable};
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashMap;

/// One addressable value pulled out of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchData {
    /// Originating variable.
    pub variable: Variable,
    /// Key inside the collection (empty for scalars).
    pub key: String,
    /// The value.
    pub value: String,
}

impl MatchData {
    /// Create match data for a variable/key/value triple.
    pub fn new(variable: Variable, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            variable,
            key: key.into(),
            value: value.into(),
        }
    }

    /// `NAME:key`, or just `NAME` for scalars.
    pub fn variable_name(&self) -> String {
        if self.key.is_empty() {
            self.variable.name().to_string()
        } else {
            format!("{}:{}", self.variable.name(), self.key)
        }
    }
}

/// Read capabilities shared by every collection shape.
pub trait Collection {
    /// Variable this collection is addressed by.
    fn variable(&self) -> Variable;

    /// Values stored under a key.
    fn get(&self, key: &str) -> Vec<&str>;

    /// Every value as a field.
    fn find_all(&self) -> Vec<MatchData>;

    /// Fields stored under a key.
    fn find_string(&self, key: &str) -> Vec<MatchData>;

    /// Fields whose key matches a pattern.
    fn find_regex(&self, pattern: &Regex) -> Vec<MatchData>;

    /// Number of values.
    fn len(&self) -> usize;

    /// Whether the collection holds no values.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single-valued variable.
#[derive(Debug, Clone)]
pub struct Scalar {
    variable: Variable,
    value: String,
}

impl Scalar {
    /// Create an empty scalar.
    pub fn new(variable: Variable) -> Self {
        Self {
            variable,
            value: String::new(),
        }
    }

    /// Current value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Replace the value.
    pub fn set(&mut self, value: impl Into<String>) {
        self.value = value.into();
    }

    /// Clear the value, keeping the allocation.
    pub fn reset(&mut self) {
        self.value.clear();
    }
}

impl Collection for Scalar {
    fn variable(&self) -> Variable {
        self.variable
    }

    fn get(&self, _key: &str) -> Vec<&str> {
        vec![self.value.as_str()]
    }

    fn find_all(&self) -> Vec<MatchData> {
        vec![MatchData::new(self.variable, "", self.value.as_str())]
    }

    fn find_string(&self, _key: &str) -> Vec<MatchData> {
        self.find_all()
    }

    fn find_regex(&self, _pattern: &Regex) -> Vec<MatchData> {
        self.find_all()
    }

    fn len(&self) -> usize {
        1
    }
}

#[derive(Debug, Clone)]
struct KeyValue {
    key: String,
    value: String,
}

/// Ordered multi-valued map.
///
/// Keys are kept in first-insertion order and every key keeps its values in
/// insertion order. Case-insensitive maps index by the lower-cased key but
/// report the key as it was first written.
#[derive(Debug, Clone)]
pub struct MultiMap {
    variable: Variable,
    case: KeyCase,
    keys: Vec<String>,
    data: HashMap<String, Vec<KeyValue>>,
}

impl MultiMap {
    /// Create an empty map.
    pub fn new(variable: Variable, case: KeyCase) -> Self {
        Self {
            variable,
            case,
            keys: Vec::new(),
            data: HashMap::new(),
        }
    }

    fn normalize<'a>(&self, key: &'a str) -> Cow<'a, str> {
        match self.case {
            KeyCase::Sensitive => Cow::Borrowed(key),
            KeyCase::Insensitive if key.bytes().any(|b| b.is_ascii_uppercase()) => {
                Cow::Owned(key.to_ascii_lowercase())
            }
            KeyCase::Insensitive => Cow::Borrowed(key),
        }
    }

    /// Append a value under a key.
    pub fn add(&mut self, key: &str, value: impl Into<String>) {
        let normalized = self.normalize(key).into_owned();
        let entry = KeyValue {
            key: key.to_string(),
            value: value.into(),
        };
        match self.data.get_mut(&normalized) {
            Some(values) => values.push(entry),
            None => {
                self.keys.push(normalized.clone());
                self.data.insert(normalized, vec![entry]);
            }
        }
    }

    /// Replace all values of a key.
    pub fn set(&mut self, key: &str, values: Vec<String>) {
        let normalized = self.normalize(key).into_owned();
        let entries = values
            .into_iter()
            .map(|value| KeyValue {
                key: key.to_string(),
                value,
            })
            .collect();
        if self.data.insert(normalized.clone(), entries).is_none() {
            self.keys.push(normalized);
        }
    }

    /// Remove a key and its values.
    pub fn remove(&mut self, key: &str) {
        let normalized = self.normalize(key);
        if self.data.remove(normalized.as_ref()).is_some() {
            self.keys.retain(|k| k != normalized.as_ref());
        }
    }

    /// Whether a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(self.normalize(key).as_ref())
    }

    /// Keys as first written, in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.keys
            .iter()
            .filter_map(|k| self.data.get(k))
            .filter_map(|values| values.first())
            .map(|kv| kv.key.as_str())
    }

    /// `(key, value)` pairs in insertion order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.keys
            .iter()
            .filter_map(|k| self.data.get(k))
            .flat_map(|values| values.iter().map(|kv| (kv.key.as_str(), kv.value.as_str())))
    }

    /// Drop every key, keeping the allocations of the index.
    pub fn reset(&mut self) {
        self.keys.clear();
        self.data.clear();
    }

    fn fields<'a>(&'a self, values: &'a [KeyValue]) -> impl Iterator<Item = MatchData> + 'a {
        values
            .iter()
            .map(move |kv| MatchData::new(self.variable, kv.key.as_str(), kv.value.as_str()))
    }

    pub(crate) fn names(&self, variable: Variable) -> impl Iterator<Item = MatchData> + '_ {
        self.pairs()
            .map(move |(key, _)| MatchData::new(variable, key, key))
    }

    pub(crate) fn matches_key(&self, key: &str, literal: &str) -> bool {
        match self.case {
            KeyCase::Sensitive => key == literal,
            KeyCase::Insensitive => key.eq_ignore_ascii_case(literal),
        }
    }

    pub(crate) fn matches_pattern(&self, key: &str, pattern: &Regex) -> bool {
        pattern.is_match(self.normalize(key).as_ref())
    }
}

impl Collection for MultiMap {
    fn variable(&self) -> Variable {
        self.variable
    }

    fn get(&self, key: &str) -> Vec<&str> {
        self.data
            .get(self.normalize(key).as_ref())
            .map(|values| values.iter().map(|kv| kv.value.as_str()).collect())
            .unwrap_or_default()
    }

    fn find_all(&self) -> Vec<MatchData> {
        self.keys
            .iter()
            .filter_map(|k| self.data.get(k))
            .flat_map(|values| self.fields(values))
            .collect()
    }

    fn find_string(&self, key: &str) -> Vec<MatchData> {
        self.data
            .get(self.normalize(key).as_ref())
            .map(|values| self.fields(values).collect())
            .unwrap_or_default()
    }

    fn find_regex(&self, pattern: &Regex) -> Vec<MatchData> {
        self.keys
            .iter()
            .filter(|k| pattern.is_match(k))
            .filter_map(|k| self.data.get(k))
            .flat_map(|values| self.fields(values))
            .collect()
    }

    fn len(&self) -> usize {
        self.data.values().map(|v| v.len()).sum()
    }
}

/// Read-only view merging several maps under one variable.
///
/// With `keys_only` the view yields the member keys as values, which is how
/// the `*_NAMES` variables are derived.
#[derive(Debug, Clone)]
pub struct Union<'a> {
    variable: Variable,
    members: Vec<&'a MultiMap>,
    keys_only: bool,
}

impl<'a> Union<'a> {
    pub(crate) fn new(variable: Variable, members: Vec<&'a MultiMap>, keys_only: bool) -> Self {
        Self {
            variable,
            members,
            keys_only,
        }
    }

    /// Maps merged by this view.
    pub fn members(&self) -> &[&'a MultiMap] {
        &self.members
    }

    /// Whether the view yields keys instead of values.
    pub fn keys_only(&self) -> bool {
        self.keys_only
    }

    fn relabel(&self, fields: Vec<MatchData>) -> impl Iterator<Item = MatchData> + '_ {
        let keys_only = self.keys_only;
        let variable = self.variable;
        fields.into_iter().map(move |mut md| {
            md.variable = variable;
            if keys_only {
                md.value = md.key.clone();
            }
            md
        })
    }
}

impl Collection for Union<'_> {
    fn variable(&self) -> Variable {
        self.variable
    }

    fn get(&self, key: &str) -> Vec<&str> {
        self.members
            .iter()
            .flat_map(|m| {
                if self.keys_only {
                    m.pairs()
                        .filter(|(k, _)| m.matches_key(k, key))
                        .map(|(k, _)| k)
                        .collect::<Vec<_>>()
                } else {
                    m.get(key)
                }
            })
            .collect()
    }

    fn find_all(&self) -> Vec<MatchData> {
        if self.keys_only {
            return self
                .members
                .iter()
                .flat_map(|m| m.names(self.variable))
                .collect();
        }
        self.members
            .iter()
            .flat_map(|m| self.relabel(m.find_all()).collect::<Vec<_>>())
            .collect()
    }

    fn find_string(&self, key: &str) -> Vec<MatchData> {
        self.members
            .iter()
            .flat_map(|m| self.relabel(m.find_string(key)).collect::<Vec<_>>())
            .collect()
    }

    fn find_regex(&self, pattern: &Regex) -> Vec<MatchData> {
        self.members
            .iter()
            .flat_map(|m| self.relabel(m.find_regex(pattern)).collect::<Vec<_>>())
            .collect()
    }

    fn len(&self) -> usize {
        self.members.iter().map(|m| m.len()).sum()
    }
}

/// Any collection of a store, borrowed for reading.
#[derive(Debug, Clone)]
pub enum CollectionRef<'a> {
    /// Single value.
    Scalar(&'a Scalar),
    /// Stored map.
    Map(&'a MultiMap),
    /// Computed view over other maps.
    Union(Union<'a>),
}

impl CollectionRef<'_> {
    /// Whether the collection is keyed.
    pub fn is_keyed(&self) -> bool {
        !matches!(self, CollectionRef::Scalar(_))
    }

    pub(crate) fn matches_key(&self, key: &str, literal: &str) -> bool {
        match self {
            CollectionRef::Scalar(_) => key == literal,
            CollectionRef::Map(m) => m.matches_key(key, literal),
            CollectionRef::Union(u) => u
                .members
                .iter()
                .any(|m| m.contains_key(key) && m.matches_key(key, literal)),
        }
    }

    pub(crate) fn matches_pattern(&self, key: &str, pattern: &Regex) -> bool {
        match self {
            CollectionRef::Scalar(_) => pattern.is_match(key),
            CollectionRef::Map(m) => m.matches_pattern(key, pattern),
            CollectionRef::Union(u) => u
                .members
                .iter()
                .any(|m| m.contains_key(key) && m.matches_pattern(key, pattern)),
        }
    }
}

impl Collection for CollectionRef<'_> {
    fn variable(&self) -> Variable {
        match self {
            CollectionRef::Scalar(c) => c.variable(),
            CollectionRef::Map(c) => c.variable(),
            CollectionRef::Union(c) => c.variable(),
        }
    }

    fn get(&self, key: &str) -> Vec<&str> {
        match self {
            CollectionRef::Scalar(c) => c.get(key),
            CollectionRef::Map(c) => c.get(key),
            CollectionRef::Union(c) => c.get(key),
        }
    }

    fn find_all(&self) -> Vec<MatchData> {
        match self {
            CollectionRef::Scalar(c) => c.find_all(),
            CollectionRef::Map(c) => c.find_all(),
            CollectionRef::Union(c) => c.find_all(),
        }
    }

    fn find_string(&self, key: &str) -> Vec<MatchData> {
        match self {
            CollectionRef::Scalar(c) => c.find_string(key),
            CollectionRef::Map(c) => c.find_string(key),
            CollectionRef::Union(c) => c.find_string(key),
        }
    }

    fn find_regex(&self, pattern: &Regex) -> Vec<MatchData> {
        match self {
            CollectionRef::Scalar(c) => c.find_regex(pattern),
            CollectionRef::Map(c) => c.find_regex(pattern),
            CollectionRef::Union(c) => c.find_regex(pattern),
        }
    }

    fn len(&self) -> usize {
        match self {
            CollectionRef::Scalar(c) => c.len(),
            CollectionRef::Map(c) => c.len(),
            CollectionRef::Union(c) => c.len(),
        }
    }
}
