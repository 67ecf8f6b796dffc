//! Error types for endpoint compilation and request-time generation.
//!
//! Compilation problems are [`SpecError`]s and never reach a client.
//! Everything raised while serving a request ends up as an
//! [`ErrorResponse`] with a client-error status.

use crate::valuer::ValueType;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub const EMPTY_PARAM_TITLE: &str = "Provided value for param is empty";
pub const CONVERSION_FAILED_TITLE: &str = "Conversion failed";
pub const PAYLOAD_GENERATION_TITLE: &str = "Payload generation failed";
pub const UPSTREAM_FAILED_TITLE: &str = "Upstream request failed";
pub const NOT_FOUND_TITLE: &str = "No matching endpoint";

/// Raised while compiling a param tree or an endpoint.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("endpoint url {url}: param key cannot be empty, details: {details}")]
    EmptyKey { url: String, details: String },

    #[error("endpoint url {url}: key `{key}` is duplicated")]
    DuplicatedKey { url: String, key: String },

    #[error("param with key `{key}` has no value set")]
    NoVariant { key: String },

    #[error("param with key `{key}` sets more than one value: {variants}")]
    AmbiguousVariant { key: String, variants: String },

    #[error("object child is not keyed: {details}")]
    UnkeyedChild { details: String },

    #[error("random kind `{0}` is not handled")]
    UnsupportedKind(String),

    #[error("conversion `{0}` is not handled")]
    UnsupportedConversion(String),

    #[error("request location `{0}` is not handled")]
    UnsupportedLocation(String),

    #[error("response format `{format}` is not supported for {context}")]
    UnsupportedFormat { format: String, context: String },

    #[error("response type `{0}` is not supported")]
    UnsupportedResponseType(String),

    #[error("invalid url template `{url}`: {reason}")]
    InvalidRoute { url: String, reason: String },

    #[error("url param cannot have empty key, url: {url}")]
    EmptyPlaceholderKey { url: String },

    #[error("cannot locate key :{key} in url {url}")]
    PlaceholderNotFound { key: String, url: String },

    #[error("value type {value_type} is not allowed in {context}")]
    DisallowedValueType {
        value_type: ValueType,
        context: &'static str,
    },

    #[error("invalid {what} range: min {min}, max {max}")]
    InvalidRange { what: &'static str, min: i64, max: i64 },

    #[error("array with key `{key}` has no element")]
    EmptyArrayElement { key: String },

    #[error("invalid json path `{path}`: {reason}")]
    InvalidJsonPath { path: String, reason: String },

    #[error("invalid proxy url `{url}`: {reason}")]
    InvalidProxyUrl { url: String, reason: String },

    #[error("invalid status code {0}")]
    InvalidStatus(u16),

    #[error("invalid method `{0}`")]
    InvalidMethod(String),

    #[error("invalid header `{name}`: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("cannot read response file {}: {reason}", .path.display())]
    ResponseFile { path: PathBuf, reason: String },

    #[error("{0}")]
    InvalidStatic(String),

    #[error("endpoint url {url} has neither response nor proxy")]
    MissingHandler { url: String },

    #[error("dynamic response for endpoint url {url} has no object")]
    MissingObject { url: String },

    #[error("endpoint {method} {url}: {source}")]
    Endpoint {
        method: String,
        url: String,
        #[source]
        source: Box<SpecError>,
    },
}

impl SpecError {
    /// Attach the offending endpoint to an error.
    pub fn for_endpoint(self, method: &str, url: &str) -> Self {
        SpecError::Endpoint {
            method: method.to_string(),
            url: url.to_string(),
            source: Box::new(self),
        }
    }
}

/// A value could not be located in the inbound request.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("failed binding body: {0}")]
    UnparsableBody(String),

    #[error("failed getting value for json path {0}")]
    PathNotFound(String),

    #[error("no query argument provided for key: {0}")]
    MissingQuery(String),

    #[error("index {index} out of range for key: {key}, values {values:?}")]
    IndexOutOfRange {
        key: String,
        index: i64,
        values: Vec<String>,
    },

    #[error("url segment {position} is missing in path {path}")]
    MissingSegment { position: usize, path: String },
}

/// A value has a runtime type the requested representation cannot take.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConversionError {
    #[error("not known conversion for {type_name} value '{value}' to {target}")]
    NotConvertible {
        type_name: &'static str,
        value: String,
        target: &'static str,
    },

    #[error("not known conversion for '{value}' to number: {reason}")]
    Unparsable { value: String, reason: String },
}

/// Failures while evaluating a valuer tree against a request.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GenerateError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

impl GenerateError {
    fn title(&self) -> &'static str {
        match self {
            GenerateError::Extraction(_) => EMPTY_PARAM_TITLE,
            GenerateError::Conversion(_) => CONVERSION_FAILED_TITLE,
        }
    }
}

/// The outbound request could not be assembled.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatchError {
    #[error("error generating url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("cannot convert {type_name} value to array for query key {key}")]
    NotSequence { key: String, type_name: &'static str },
}

/// Everything that can go wrong while forwarding a request.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("error generating value for key {key}: {source}")]
    Generate {
        key: String,
        #[source]
        source: GenerateError,
    },

    #[error("error converting value for key {key}: {source}")]
    Conversion {
        key: String,
        #[source]
        source: ConversionError,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("error generating proxy body: {0}")]
    Payload(#[source] GenerateError),

    #[error("{0}")]
    Upstream(String),
}

impl ProxyError {
    fn status_and_title(&self) -> (StatusCode, &'static str) {
        match self {
            ProxyError::Payload(_) => (StatusCode::BAD_REQUEST, PAYLOAD_GENERATION_TITLE),
            ProxyError::Upstream(_) => (StatusCode::BAD_GATEWAY, UPSTREAM_FAILED_TITLE),
            ProxyError::Generate { source, .. } => (StatusCode::BAD_REQUEST, source.title()),
            ProxyError::Conversion { .. } | ProxyError::Dispatch(_) => {
                (StatusCode::BAD_REQUEST, CONVERSION_FAILED_TITLE)
            }
        }
    }
}

/// Loading or compiling a whole endpoint file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to parse json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unable to parse yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    Invalid(Vec<String>),

    #[error("{} endpoint(s) failed to compile:\n{}", .0.len(), join_errors(.0))]
    Compile(Vec<SpecError>),
}

/// Generating an endpoint file from an example document.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("response type {0} is not valid. Valid types static, dynamic")]
    InvalidResponseType(String),

    #[error("unable to read file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to parse json: {0}")]
    Json(#[from] serde_json::Error),
}

fn join_errors(errors: &[SpecError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Client-visible error body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub title: String,
    pub url: String,
    pub errors: Vec<ErrorDetail>,
    #[serde(skip)]
    status: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub details: String,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, url: &str, title: &str, details: Vec<String>) -> Self {
        Self {
            title: title.to_string(),
            url: url.to_string(),
            errors: details
                .into_iter()
                .map(|details| ErrorDetail { details })
                .collect(),
            status: status.as_u16(),
        }
    }

    pub fn from_generate(url: &str, err: &GenerateError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, url, err.title(), vec![err.to_string()])
    }

    pub fn from_proxy(url: &str, err: &ProxyError) -> Self {
        let (status, title) = err.status_and_title();
        Self::new(status, url, title, vec![err.to_string()])
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_REQUEST)
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}
