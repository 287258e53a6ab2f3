//! `multipart/form-data` decoding.

use crate::error::{Error, Result};
use crate::variables::{Variable, VariableStore};

/// Extract the boundary parameter of a multipart content type.
pub fn boundary(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.trim().split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then_some(value)
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn skip_line_end(data: &[u8]) -> &[u8] {
    data.strip_prefix(b"\r\n")
        .or_else(|| data.strip_prefix(b"\n"))
        .unwrap_or(data)
}

fn strip_line_end(data: &[u8]) -> &[u8] {
    data.strip_suffix(b"\r\n")
        .or_else(|| data.strip_suffix(b"\n"))
        .unwrap_or(data)
}

/// A decoded part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// Form field name.
    pub name: String,
    /// File name, for uploads.
    pub filename: Option<String>,
    /// Part content.
    pub content: Vec<u8>,
}

fn disposition_param(disposition: &str, param: &str) -> Option<String> {
    disposition.split(';').skip(1).find_map(|p| {
        let (name, value) = p.trim().split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case(param)
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

fn parse_part(raw: &[u8]) -> Result<Part> {
    let (head, content) = match find(raw, b"\r\n\r\n") {
        Some(pos) => (&raw[..pos], &raw[pos + 4..]),
        None => match find(raw, b"\n\n") {
            Some(pos) => (&raw[..pos], &raw[pos + 2..]),
            None => return Err(Error::request_body("multipart part without header block")),
        },
    };

    let head = String::from_utf8_lossy(head);
    let disposition = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-disposition"))
        .map(|(_, value)| value.trim().to_string())
        .ok_or_else(|| Error::request_body("multipart part without content-disposition"))?;

    let name = disposition_param(&disposition, "name")
        .ok_or_else(|| Error::request_body("multipart part without a field name"))?;

    Ok(Part {
        name,
        filename: disposition_param(&disposition, "filename"),
        content: content.to_vec(),
    })
}

/// Split a multipart body into parts.
pub fn parse(body: &[u8], boundary: &str) -> Result<Vec<Part>> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let start = find(body, delimiter)
        .ok_or_else(|| Error::request_body("multipart boundary not found in body"))?;
    let mut rest = &body[start + delimiter.len()..];
    let mut parts = Vec::new();

    loop {
        if rest.starts_with(b"--") {
            return Ok(parts);
        }
        rest = skip_line_end(rest);
        let end = find(rest, delimiter)
            .ok_or_else(|| Error::request_body("multipart body is not terminated"))?;
        parts.push(parse_part(strip_line_end(&rest[..end]))?);
        rest = &rest[end + delimiter.len()..];
    }
}

/// Decode a multipart body into `ARGS_POST` and the `FILES*` variables.
pub(crate) fn process(body: &[u8], content_type: &str, store: &mut VariableStore) -> Result<()> {
    let boundary = boundary(content_type)
        .ok_or_else(|| Error::request_body("multipart content type without boundary"))?;
    let parts = parse(body, boundary)?;

    let mut combined = 0usize;
    for part in parts {
        match part.filename {
            Some(filename) => {
                combined += part.content.len();
                store.add(Variable::Files, &part.name, filename.as_str());
                store.add(
                    Variable::FilesSizes,
                    &filename,
                    part.content.len().to_string(),
                );
            }
            None => {
                let value = String::from_utf8_lossy(&part.content).into_owned();
                store.add(Variable::ArgsPost, &part.name, value);
            }
        }
    }
    store.set_scalar(Variable::FilesCombinedSize, combined.to_string());
    Ok(())
}
