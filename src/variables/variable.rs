//! Variable identifiers.

use crate::error::{Error, Result};
use phf::phf_map;

/// Variables a transaction tracks.
///
/// Every variable maps to exactly one collection in a
/// [`VariableStore`](super::VariableStore). The discriminant doubles as the
/// collection's slot in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Variable {
    // Transaction
    /// Unique transaction id.
    UniqueId,
    /// Transaction collection (setvar, captures).
    Tx,
    /// Most recently matched value.
    MatchedVar,
    /// Most recently matched variable name (`NAME:key`).
    MatchedVarName,
    /// All matched values of the transaction.
    MatchedVars,
    /// Names of all matched variables.
    MatchedVarsNames,
    /// Highest (numerically lowest) severity of matched rules.
    HighestSeverity,

    // Connection
    /// Client IP address.
    RemoteAddr,
    /// Client port.
    RemotePort,
    /// Server IP address.
    ServerAddr,
    /// Server port.
    ServerPort,

    // Request line
    /// HTTP method.
    RequestMethod,
    /// HTTP protocol.
    RequestProtocol,
    /// Full request line.
    RequestLine,
    /// Request URI without fragment.
    RequestUri,
    /// Request URI as received.
    RequestUriRaw,
    /// Request path.
    RequestFilename,
    /// Last path segment.
    RequestBasename,
    /// Raw query string.
    QueryString,
    /// Query string decoding error.
    UrlencodedError,

    // Request headers
    /// Request headers.
    RequestHeaders,
    /// Request header names.
    RequestHeadersNames,
    /// Request cookies.
    RequestCookies,
    /// Request cookie names.
    RequestCookiesNames,

    // Arguments
    /// All arguments (GET, POST and path).
    Args,
    /// All argument names.
    ArgsNames,
    /// GET arguments.
    ArgsGet,
    /// GET argument names.
    ArgsGetNames,
    /// POST arguments.
    ArgsPost,
    /// POST argument names.
    ArgsPostNames,
    /// Path arguments.
    ArgsPath,

    // Request body
    /// Request body (urlencoded or forced).
    RequestBody,
    /// Request body length.
    RequestBodyLength,
    /// Selected request body processor.
    ReqbodyProcessor,
    /// Request body processing failed.
    ReqbodyError,
    /// Request body processing error message.
    ReqbodyErrorMsg,
    /// Request body exceeded its limit.
    InboundDataError,
    /// Uploaded file names by field.
    Files,
    /// Uploaded file field names.
    FilesNames,
    /// Uploaded file sizes by file name.
    FilesSizes,
    /// Combined size of uploaded files.
    FilesCombinedSize,

    // Response
    /// Response status code.
    ResponseStatus,
    /// Response protocol.
    ResponseProtocol,
    /// Response headers.
    ResponseHeaders,
    /// Response header names.
    ResponseHeadersNames,
    /// Response content type.
    ResponseContentType,
    /// Response content length.
    ResponseContentLength,
    /// Response body.
    ResponseBody,
    /// Response body exceeded its limit.
    OutboundDataError,
}

/// How lookups against a map treat key case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCase {
    /// Keys compare byte for byte.
    Sensitive,
    /// Keys compare ASCII case-insensitively.
    Insensitive,
}

/// Storage shape of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shape {
    Scalar,
    Map(KeyCase),
    Union {
        members: &'static [Variable],
        keys_only: bool,
    },
}

const ARGS_MEMBERS: &[Variable] = &[Variable::ArgsGet, Variable::ArgsPost, Variable::ArgsPath];

static VARIABLE_MAP: phf::Map<&'static str, Variable> = phf_map! {
    "unique_id" => Variable::UniqueId,
    "tx" => Variable::Tx,
    "matched_var" => Variable::MatchedVar,
    "matched_var_name" => Variable::MatchedVarName,
    "matched_vars" => Variable::MatchedVars,
    "matched_vars_names" => Variable::MatchedVarsNames,
    "highest_severity" => Variable::HighestSeverity,
    "remote_addr" => Variable::RemoteAddr,
    "remote_port" => Variable::RemotePort,
    "server_addr" => Variable::ServerAddr,
    "server_port" => Variable::ServerPort,
    "request_method" => Variable::RequestMethod,
    "request_protocol" => Variable::RequestProtocol,
    "request_line" => Variable::RequestLine,
    "request_uri" => Variable::RequestUri,
    "request_uri_raw" => Variable::RequestUriRaw,
    "request_filename" => Variable::RequestFilename,
    "request_basename" => Variable::RequestBasename,
    "query_string" => Variable::QueryString,
    "urlencoded_error" => Variable::UrlencodedError,
    "request_headers" => Variable::RequestHeaders,
    "request_headers_names" => Variable::RequestHeadersNames,
    "request_cookies" => Variable::RequestCookies,
    "request_cookies_names" => Variable::RequestCookiesNames,
    "args" => Variable::Args,
    "args_names" => Variable::ArgsNames,
    "args_get" => Variable::ArgsGet,
    "args_get_names" => Variable::ArgsGetNames,
    "args_post" => Variable::ArgsPost,
    "args_post_names" => Variable::ArgsPostNames,
    "args_path" => Variable::ArgsPath,
    "request_body" => Variable::RequestBody,
    "request_body_length" => Variable::RequestBodyLength,
    "reqbody_processor" => Variable::ReqbodyProcessor,
    "reqbody_error" => Variable::ReqbodyError,
    "reqbody_error_msg" => Variable::ReqbodyErrorMsg,
    "inbound_data_error" => Variable::InboundDataError,
    "files" => Variable::Files,
    "files_names" => Variable::FilesNames,
    "files_sizes" => Variable::FilesSizes,
    "files_combined_size" => Variable::FilesCombinedSize,
    "response_status" => Variable::ResponseStatus,
    "response_protocol" => Variable::ResponseProtocol,
    "response_headers" => Variable::ResponseHeaders,
    "response_headers_names" => Variable::ResponseHeadersNames,
    "response_content_type" => Variable::ResponseContentType,
    "response_content_length" => Variable::ResponseContentLength,
    "response_body" => Variable::ResponseBody,
    "outbound_data_error" => Variable::OutboundDataError,
};

impl Variable {
    /// Every variable, in slot order.
    pub const ALL: [Variable; 49] = [
        Variable::UniqueId,
        Variable::Tx,
        Variable::MatchedVar,
        Variable::MatchedVarName,
        Variable::MatchedVars,
        Variable::MatchedVarsNames,
        Variable::HighestSeverity,
        Variable::RemoteAddr,
        Variable::RemotePort,
        Variable::ServerAddr,
        Variable::ServerPort,
        Variable::RequestMethod,
        Variable::RequestProtocol,
        Variable::RequestLine,
        Variable::RequestUri,
        Variable::RequestUriRaw,
        Variable::RequestFilename,
        Variable::RequestBasename,
        Variable::QueryString,
        Variable::UrlencodedError,
        Variable::RequestHeaders,
        Variable::RequestHeadersNames,
        Variable::RequestCookies,
        Variable::RequestCookiesNames,
        Variable::Args,
        Variable::ArgsNames,
        Variable::ArgsGet,
        Variable::ArgsGetNames,
        Variable::ArgsPost,
        Variable::ArgsPostNames,
        Variable::ArgsPath,
        Variable::RequestBody,
        Variable::RequestBodyLength,
        Variable::ReqbodyProcessor,
        Variable::ReqbodyError,
        Variable::ReqbodyErrorMsg,
        Variable::InboundDataError,
        Variable::Files,
        Variable::FilesNames,
        Variable::FilesSizes,
        Variable::FilesCombinedSize,
        Variable::ResponseStatus,
        Variable::ResponseProtocol,
        Variable::ResponseHeaders,
        Variable::ResponseHeadersNames,
        Variable::ResponseContentType,
        Variable::ResponseContentLength,
        Variable::ResponseBody,
        Variable::OutboundDataError,
    ];

    /// Number of variables.
    pub const COUNT: usize = Self::ALL.len();

    /// Look up a variable by name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        VARIABLE_MAP.get(name.to_ascii_lowercase().as_str()).copied()
    }

    /// Look up a variable by name, failing with [`Error::UnknownVariable`].
    pub fn parse(name: &str) -> Result<Self> {
        Self::from_name(name).ok_or_else(|| Error::UnknownVariable {
            name: name.to_string(),
        })
    }

    /// Slot of this variable in a store.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Canonical upper-case name.
    pub fn name(self) -> &'static str {
        match self {
            Variable::UniqueId => "UNIQUE_ID",
            Variable::Tx => "TX",
            Variable::MatchedVar => "MATCHED_VAR",
            Variable::MatchedVarName => "MATCHED_VAR_NAME",
            Variable::MatchedVars => "MATCHED_VARS",
            Variable::MatchedVarsNames => "MATCHED_VARS_NAMES",
            Variable::HighestSeverity => "HIGHEST_SEVERITY",
            Variable::RemoteAddr => "REMOTE_ADDR",
            Variable::RemotePort => "REMOTE_PORT",
            Variable::ServerAddr => "SERVER_ADDR",
            Variable::ServerPort => "SERVER_PORT",
            Variable::RequestMethod => "REQUEST_METHOD",
            Variable::RequestProtocol => "REQUEST_PROTOCOL",
            Variable::RequestLine => "REQUEST_LINE",
            Variable::RequestUri => "REQUEST_URI",
            Variable::RequestUriRaw => "REQUEST_URI_RAW",
            Variable::RequestFilename => "REQUEST_FILENAME",
            Variable::RequestBasename => "REQUEST_BASENAME",
            Variable::QueryString => "QUERY_STRING",
            Variable::UrlencodedError => "URLENCODED_ERROR",
            Variable::RequestHeaders => "REQUEST_HEADERS",
            Variable::RequestHeadersNames => "REQUEST_HEADERS_NAMES",
            Variable::RequestCookies => "REQUEST_COOKIES",
            Variable::RequestCookiesNames => "REQUEST_COOKIES_NAMES",
            Variable::Args => "ARGS",
            Variable::ArgsNames => "ARGS_NAMES",
            Variable::ArgsGet => "ARGS_GET",
            Variable::ArgsGetNames => "ARGS_GET_NAMES",
            Variable::ArgsPost => "ARGS_POST",
            Variable::ArgsPostNames => "ARGS_POST_NAMES",
            Variable::ArgsPath => "ARGS_PATH",
            Variable::RequestBody => "REQUEST_BODY",
            Variable::RequestBodyLength => "REQUEST_BODY_LENGTH",
            Variable::ReqbodyProcessor => "REQBODY_PROCESSOR",
            Variable::ReqbodyError => "REQBODY_ERROR",
            Variable::ReqbodyErrorMsg => "REQBODY_ERROR_MSG",
            Variable::InboundDataError => "INBOUND_DATA_ERROR",
            Variable::Files => "FILES",
            Variable::FilesNames => "FILES_NAMES",
            Variable::FilesSizes => "FILES_SIZES",
            Variable::FilesCombinedSize => "FILES_COMBINED_SIZE",
            Variable::ResponseStatus => "RESPONSE_STATUS",
            Variable::ResponseProtocol => "RESPONSE_PROTOCOL",
            Variable::ResponseHeaders => "RESPONSE_HEADERS",
            Variable::ResponseHeadersNames => "RESPONSE_HEADERS_NAMES",
            Variable::ResponseContentType => "RESPONSE_CONTENT_TYPE",
            Variable::ResponseContentLength => "RESPONSE_CONTENT_LENGTH",
            Variable::ResponseBody => "RESPONSE_BODY",
            Variable::OutboundDataError => "OUTBOUND_DATA_ERROR",
        }
    }

    pub(crate) fn shape(self) -> Shape {
        use Variable::*;
        match self {
            Tx | RequestHeaders | ResponseHeaders => Shape::Map(KeyCase::Insensitive),
            MatchedVars | RequestCookies | ArgsGet | ArgsPost | ArgsPath | Files | FilesSizes => {
                Shape::Map(KeyCase::Sensitive)
            }
            Args => Shape::Union {
                members: ARGS_MEMBERS,
                keys_only: false,
            },
            ArgsNames => Shape::Union {
                members: ARGS_MEMBERS,
                keys_only: true,
            },
            ArgsGetNames => names_of(&[ArgsGet]),
            ArgsPostNames => names_of(&[ArgsPost]),
            RequestHeadersNames => names_of(&[RequestHeaders]),
            RequestCookiesNames => names_of(&[RequestCookies]),
            ResponseHeadersNames => names_of(&[ResponseHeaders]),
            FilesNames => names_of(&[Files]),
            MatchedVarsNames => names_of(&[MatchedVars]),
            _ => Shape::Scalar,
        }
    }

    /// Whether the variable is a keyed collection (map or union).
    pub fn is_collection(self) -> bool {
        !matches!(self.shape(), Shape::Scalar)
    }
}

const fn names_of(members: &'static [Variable]) -> Shape {
    Shape::Union {
        members,
        keys_only: true,
    }
}

impl std::fmt::Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Variable {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
