//! Request body processors.
//!
//! A processor is picked from the request content type when headers are
//! added, and runs once when the request body is finalized.

pub mod multipart;
pub mod urlencoded;

use crate::error::Result;
use crate::variables::VariableStore;
use std::fmt;

/// Available request body processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyProcessorKind {
    /// `application/x-www-form-urlencoded`.
    Urlencoded,
    /// `multipart/form-data`.
    Multipart,
}

impl BodyProcessorKind {
    /// Processor for a request content type.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type.split(';').next().unwrap_or_default().trim();
        if mime.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
            Some(Self::Urlencoded)
        } else if mime.eq_ignore_ascii_case("multipart/form-data") {
            Some(Self::Multipart)
        } else {
            None
        }
    }

    /// Processor by its `REQBODY_PROCESSOR` name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "URLENCODED" => Some(Self::Urlencoded),
            "MULTIPART" => Some(Self::Multipart),
            _ => None,
        }
    }

    /// Name stored in `REQBODY_PROCESSOR`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Urlencoded => "URLENCODED",
            Self::Multipart => "MULTIPART",
        }
    }

    /// Decode a request body into the store.
    pub fn process_request(
        self,
        body: &[u8],
        content_type: &str,
        argument_separator: &str,
        store: &mut VariableStore,
    ) -> Result<()> {
        match self {
            Self::Urlencoded => {
                urlencoded::process(body, argument_separator, store);
                Ok(())
            }
            Self::Multipart => multipart::process(body, content_type, store),
        }
    }
}

impl fmt::Display for BodyProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
