//! Macro templates (`%{request_headers.host}`).
//!
//! A [`Macro`] is parsed once and expanded against any number of
//! transactions. Placeholders name a variable and an optional key; the key
//! follows the case rules of the variable's collection.

use crate::engine::Transaction;
use crate::error::{Error, Result};
use crate::variables::{Collection, Variable, VariableStore};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Variable {
        variable: Variable,
        key: Option<String>,
    },
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macro {
    original: String,
    tokens: Vec<Token>,
}

fn parse_placeholder(inner: &str, offset: usize) -> Result<Token> {
    let inner = inner.trim();
    if inner.is_empty() {
        return Err(Error::macro_parse("empty placeholder", offset));
    }
    let (name, key) = match inner.split_once('.') {
        Some((_, "")) => return Err(Error::macro_parse("empty key", offset)),
        Some((name, key)) => (name, Some(key.to_string())),
        None => (inner, None),
    };
    Ok(Token::Variable {
        variable: Variable::parse(name)?,
        key,
    })
}

impl Macro {
    /// Parse a template.
    pub fn new(template: &str) -> Result<Self> {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut rest = template;
        let mut offset = 0;

        while let Some(start) = rest.find("%{") {
            literal.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| Error::macro_parse("unterminated placeholder", offset + start))?;
            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            tokens.push(parse_placeholder(&after[..end], offset + start)?);
            let consumed = start + 2 + end + 1;
            offset += consumed;
            rest = &rest[consumed..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        Ok(Self {
            original: template.to_string(),
            tokens,
        })
    }

    /// The template as written.
    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// Whether the template has placeholders.
    pub fn is_expandable(&self) -> bool {
        self.tokens
            .iter()
            .any(|t| matches!(t, Token::Variable { .. }))
    }

    /// Expand against a transaction.
    pub fn expand(&self, tx: &Transaction) -> String {
        self.expand_with(tx.id(), tx.variables())
    }

    /// Expand against a transaction id and a variable store.
    ///
    /// Missing values expand to nothing; several values are joined with `,`.
    pub fn expand_with(&self, unique_id: &str, store: &VariableStore) -> String {
        let mut out = String::with_capacity(self.original.len());
        for token in &self.tokens {
            match token {
                Token::Literal(text) => out.push_str(text),
                Token::Variable {
                    variable: Variable::UniqueId,
                    ..
                } => out.push_str(unique_id),
                Token::Variable { variable, key } => {
                    let collection = store.collection(*variable);
                    let fields = match key {
                        Some(key) => collection.find_string(key),
                        None => collection.find_all(),
                    };
                    for (i, field) in fields.iter().enumerate() {
                        if i > 0 {
                            out.push(',');
                        }
                        out.push_str(&field.value);
                    }
                }
            }
        }
        out
    }
}

impl FromStr for Macro {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for Macro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}
