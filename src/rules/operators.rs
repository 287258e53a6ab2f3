//! Match operators for the built-in rule group (`@rx`, `@pm`, `@contains`,
//! `@streq`, `@unconditionalMatch`).

use crate::error::{Error, Result};
use aho_corasick::AhoCorasick;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Outcome of running an operator against one value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperatorMatch {
    /// Whether the operator matched.
    pub matched: bool,
    /// Capture groups, whole match first. Only `@rx` fills this.
    pub captures: Vec<String>,
}

impl OperatorMatch {
    fn no_match() -> Self {
        Self::default()
    }

    fn hit(value: &str) -> Self {
        Self {
            matched: true,
            captures: vec![value.to_string()],
        }
    }
}

/// An operator evaluated against variable values.
pub trait Operator: Send + Sync {
    /// Run against a value.
    fn execute(&self, value: &str) -> OperatorMatch;

    /// Operator name, without the `@`.
    fn name(&self) -> &'static str;
}

/// `@rx`: regular expression.
pub struct RegexOperator {
    regex: Regex,
}

impl RegexOperator {
    /// Compile the pattern.
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(Error::config("@rx needs a pattern"));
        }
        let regex = Regex::new(pattern).map_err(|source| Error::RegexCompile {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { regex })
    }
}

impl Operator for RegexOperator {
    fn execute(&self, value: &str) -> OperatorMatch {
        match self.regex.captures(value) {
            Some(caps) => OperatorMatch {
                matched: true,
                captures: caps
                    .iter()
                    .map(|c| c.map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect(),
            },
            None => OperatorMatch::no_match(),
        }
    }

    fn name(&self) -> &'static str {
        "rx"
    }
}

/// `@pm`: case-insensitive phrase match over space-separated phrases.
pub struct PhraseOperator {
    automaton: AhoCorasick,
    phrases: Vec<String>,
}

impl PhraseOperator {
    /// Build the automaton.
    pub fn new(phrases: &str) -> Result<Self> {
        let phrases: Vec<String> = phrases.split_whitespace().map(str::to_string).collect();
        if phrases.is_empty() {
            return Err(Error::config("@pm needs at least one phrase"));
        }
        let automaton = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(&phrases)
            .map_err(|e| Error::config(format!("@pm: {}", e)))?;
        Ok(Self { automaton, phrases })
    }
}

impl Operator for PhraseOperator {
    fn execute(&self, value: &str) -> OperatorMatch {
        match self.automaton.find(value) {
            Some(m) => OperatorMatch::hit(&self.phrases[m.pattern().as_usize()]),
            None => OperatorMatch::no_match(),
        }
    }

    fn name(&self) -> &'static str {
        "pm"
    }
}

/// `@contains`.
pub struct ContainsOperator {
    needle: String,
}

impl Operator for ContainsOperator {
    fn execute(&self, value: &str) -> OperatorMatch {
        if value.contains(&self.needle) {
            OperatorMatch::hit(&self.needle)
        } else {
            OperatorMatch::no_match()
        }
    }

    fn name(&self) -> &'static str {
        "contains"
    }
}

/// `@streq`.
pub struct StreqOperator {
    expected: String,
}

impl Operator for StreqOperator {
    fn execute(&self, value: &str) -> OperatorMatch {
        if value == self.expected {
            OperatorMatch::hit(value)
        } else {
            OperatorMatch::no_match()
        }
    }

    fn name(&self) -> &'static str {
        "streq"
    }
}

/// `@unconditionalMatch`.
pub struct UnconditionalOperator;

impl Operator for UnconditionalOperator {
    fn execute(&self, value: &str) -> OperatorMatch {
        OperatorMatch::hit(value)
    }

    fn name(&self) -> &'static str {
        "unconditionalMatch"
    }
}

#[derive(Debug, Clone, Copy)]
enum OperatorName {
    Rx,
    Pm,
    Contains,
    Streq,
    Unconditional,
}

static OPERATOR_NAMES: phf::Map<&'static str, OperatorName> = phf::phf_map! {
    "rx" => OperatorName::Rx,
    "pm" => OperatorName::Pm,
    "contains" => OperatorName::Contains,
    "streq" => OperatorName::Streq,
    "unconditionalmatch" => OperatorName::Unconditional,
};

/// Build an operator from its name (case-insensitive, `@` optional) and
/// argument.
pub fn create_operator(name: &str, argument: &str) -> Result<Arc<dyn Operator>> {
    let key = name.trim_start_matches('@').to_ascii_lowercase();
    let kind = OPERATOR_NAMES
        .get(key.as_str())
        .copied()
        .ok_or_else(|| Error::config(format!("unknown operator: {}", name)))?;

    Ok(match kind {
        OperatorName::Rx => Arc::new(RegexOperator::new(argument)?),
        OperatorName::Pm => Arc::new(PhraseOperator::new(argument)?),
        OperatorName::Contains => Arc::new(ContainsOperator {
            needle: argument.to_string(),
        }),
        OperatorName::Streq => Arc::new(StreqOperator {
            expected: argument.to_string(),
        }),
        OperatorName::Unconditional => Arc::new(UnconditionalOperator),
    })
}

/// Parse `"@rx ^admin"` or `"!@streq x"` into a negation flag and an
/// operator. A bare argument means `@rx`.
pub fn parse_operator(input: &str) -> Result<(bool, Arc<dyn Operator>)> {
    let input = input.trim();
    let (negated, rest) = match input.strip_prefix('!') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, input),
    };
    if !rest.starts_with('@') {
        return Ok((negated, create_operator("rx", rest)?));
    }
    let (name, argument) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    Ok((negated, create_operator(name, argument.trim_start())?))
}

impl fmt::Debug for dyn Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.name())
    }
}
