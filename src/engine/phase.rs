//! Transaction processing phases.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Evaluation points of a transaction, in the order they are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum Phase {
    /// Connection established.
    Connection = 1,
    /// Request headers received.
    #[default]
    RequestHeaders = 2,
    /// Request body received.
    RequestBody = 3,
    /// Response headers received.
    ResponseHeaders = 4,
    /// Response body received.
    ResponseBody = 5,
    /// Transaction finished.
    Logging = 6,
}

impl Phase {
    /// Every phase, in evaluation order.
    pub const ALL: [Phase; 6] = [
        Phase::Connection,
        Phase::RequestHeaders,
        Phase::RequestBody,
        Phase::ResponseHeaders,
        Phase::ResponseBody,
        Phase::Logging,
    ];

    /// Ordinal, 1 to 6.
    pub fn number(self) -> u8 {
        self as u8
    }

    /// Zero-based position in [`Phase::ALL`].
    pub(crate) fn index(self) -> usize {
        usize::from(self.number() - 1)
    }

    /// Upper-case phase name.
    pub fn name(self) -> &'static str {
        match self {
            Phase::Connection => "CONNECTION",
            Phase::RequestHeaders => "REQUEST_HEADERS",
            Phase::RequestBody => "REQUEST_BODY",
            Phase::ResponseHeaders => "RESPONSE_HEADERS",
            Phase::ResponseBody => "RESPONSE_BODY",
            Phase::Logging => "LOGGING",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for Phase {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        value
            .checked_sub(1)
            .and_then(|i| Phase::ALL.get(usize::from(i)))
            .copied()
            .ok_or_else(|| Error::config(format!("invalid phase: {}", value)))
    }
}

/// Accepts a phase number or a name (`2`, `request_headers`).
impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u8>() {
            return Phase::try_from(n);
        }
        Phase::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::config(format!("invalid phase: {}", s)))
    }
}
