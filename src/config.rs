//! Configuration for the fake server.
//!
//! Defines endpoints, their response or proxy definitions, and the param
//! trees that describe generated values.

use crate::error::ConfigError;
use crate::valuer::ValueType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

/// HTTP methods an endpoint can be registered for.
pub const SUPPORTED_METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

/// Main configuration: the list of endpoints to serve.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FakerConfig {
    /// Endpoints, matched in file order
    #[serde(default)]
    pub endpoints: Vec<EndpointDefinition>,
}

impl FakerConfig {
    /// Load configuration from a JSON or YAML file, chosen by extension.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content)?,
            _ => Self::from_json(&content)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Validate every endpoint, collecting all violations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();

        for (i, endpoint) in self.endpoints.iter().enumerate() {
            for problem in endpoint.validate() {
                problems.push(format!("endpoint {} ({} {}): {}", i, endpoint.method, endpoint.url, problem));
            }
            if !seen.insert((endpoint.method.to_uppercase(), endpoint.url.clone())) {
                problems.push(format!(
                    "endpoint {} ({} {}): duplicated method and url",
                    i, endpoint.method, endpoint.url
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

/// A single endpoint definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EndpointDefinition {
    /// Url template, e.g. `/users/:id` or `/files/*`
    pub url: String,

    /// HTTP method
    pub method: String,

    /// Response to produce
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseDefinition>,

    /// Upstream to forward to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyDefinition>,
}

impl EndpointDefinition {
    fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if !self.url.starts_with('/') {
            problems.push("url must start with /".to_string());
        }
        if let Some(pos) = self.url.find('*') {
            let last_segment = self.url.rsplit('/').next().unwrap_or("");
            if !last_segment.starts_with('*') || pos != self.url.len() - last_segment.len() {
                problems.push("wildcard should be at the end of the url".to_string());
            }
        }
        if !is_supported_method(&self.method) {
            problems.push(format!("method `{}` is not supported", self.method));
        }

        match (&self.response, &self.proxy) {
            (Some(response), None) => problems.extend(response.validate()),
            (None, Some(proxy)) => problems.extend(proxy.validate()),
            (Some(_), Some(_)) => problems.push("response and proxy are mutually exclusive".to_string()),
            (None, None) => problems.push("either response or proxy is required".to_string()),
        }

        problems
    }
}

fn is_supported_method(method: &str) -> bool {
    SUPPORTED_METHODS.contains(&method.to_uppercase().as_str())
}

/// How a response or proxy body is produced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// Fixed body, inline or from a file
    Static,
    /// Body generated from a param tree
    Dynamic,
    /// Externally supplied handler
    Custom,
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResponseType::Static => "static",
            ResponseType::Dynamic => "dynamic",
            ResponseType::Custom => "custom",
        })
    }
}

/// Serialization format of a response body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Json,
    Xml,
    Bytes,
}

impl ResponseFormat {
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            ResponseFormat::Json => Some("application/json"),
            ResponseFormat::Xml => Some("application/xml"),
            ResponseFormat::Bytes => None,
        }
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResponseFormat::Json => "json",
            ResponseFormat::Xml => "xml",
            ResponseFormat::Bytes => "bytes",
        })
    }
}

/// Response definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response type
    #[serde(rename = "type")]
    pub response_type: ResponseType,

    /// Response headers
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Body file, relative to the configuration file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Inline static body, takes priority over `file`
    #[serde(default, rename = "static", skip_serializing_if = "Option::is_none")]
    pub static_body: Option<Value>,

    /// Param tree of a dynamic response
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub object: Vec<Param>,

    /// Body format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ResponseFormat>,

    /// Content type of a `bytes` body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

fn default_status() -> u16 {
    200
}

impl ResponseDefinition {
    fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.response_type == ResponseType::Custom {
            return problems;
        }
        if self.status < 100 || self.status > 599 {
            problems.push(format!("invalid status code: {}", self.status));
        }
        match self.format {
            None => problems.push("response format is required".to_string()),
            Some(ResponseFormat::Bytes) if self.content_type.as_deref().map_or(true, str::is_empty) => {
                problems.push("content_type is required for bytes format".to_string())
            }
            _ => {}
        }
        if self.response_type == ResponseType::Static
            && self.static_body.is_none()
            && self.file.as_deref().map_or(true, str::is_empty)
        {
            problems.push("static response needs either static or file".to_string());
        }
        problems
    }
}

/// Proxy definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProxyDefinition {
    /// Target url, may contain `:name` placeholders
    pub url: String,

    /// Method of the forwarded request
    pub method: String,

    /// `static` forwards as is, `dynamic` templates the request
    #[serde(rename = "type")]
    pub proxy_type: ResponseType,

    /// Generated query parameters
    #[serde(default, rename = "query_params", skip_serializing_if = "Vec::is_empty")]
    pub query: Vec<Param>,

    /// Generated values for `:name` placeholders
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub url_params: Vec<Param>,

    /// Content type of the generated payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Headers set on the forwarded request
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Param tree of the generated payload
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub object: Vec<Param>,
}

impl ProxyDefinition {
    fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.url.is_empty() {
            problems.push("proxy url is required".to_string());
        }
        if !is_supported_method(&self.method) {
            problems.push(format!("proxy method `{}` is not supported", self.method));
        }
        if self.proxy_type == ResponseType::Custom {
            problems.push("proxy type must be static or dynamic".to_string());
        }
        problems
    }
}

/// A node of a param tree. Exactly one value must be set.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Param {
    /// Output key, empty for an unkeyed value
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random: Option<RandomSpec>,

    #[serde(default, rename = "static", skip_serializing_if = "Option::is_none")]
    pub static_value: Option<StaticSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array: Option<ArraySpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped: Option<MappedSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub object: Vec<Param>,
}

impl Param {
    /// Every value variant this param sets.
    pub fn value_types(&self) -> Vec<ValueType> {
        let mut types = Vec::new();
        if self.array.is_some() {
            types.push(ValueType::Array);
        }
        if self.random.is_some() {
            types.push(ValueType::Random);
        }
        if self.static_value.is_some() {
            types.push(ValueType::Static);
        }
        if self.mapped.is_some() {
            types.push(ValueType::Mapped);
        }
        if !self.object.is_empty() {
            types.push(ValueType::Object);
        }
        types
    }

    /// Short human description, used in error messages.
    pub fn details(&self) -> String {
        if let Some(array) = &self.array {
            return format!(
                "array with min {} and max {}, {} element param(s)",
                array.min,
                array.max,
                array.element.len()
            );
        }
        if let Some(random) = &self.random {
            return format!("random with type {}, min {} and max {}", random.kind, random.min, random.max);
        }
        if let Some(value) = &self.static_value {
            return format!("static with value {}", value.value);
        }
        if let Some(mapped) = &self.mapped {
            return format!(
                "mapped from {}, param {}, index {:?}, path {}, as {}",
                mapped.from, mapped.param, mapped.index, mapped.path, mapped.conversion
            );
        }
        if !self.object.is_empty() {
            return format!("object with {} param(s)", self.object.len());
        }
        "unknown".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RandomSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub min: i64,
    #[serde(default)]
    pub max: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StaticSpec {
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ArraySpec {
    pub min: i64,
    pub max: i64,
    #[serde(default)]
    pub element: Vec<Param>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MappedSpec {
    /// `body`, `query` or `url`
    pub from: String,

    /// Query parameter or url placeholder name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub param: String,

    /// Occurrence of a repeated query parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,

    /// JSONPath into the request body
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    /// `none`, `text` or `number`
    #[serde(default, rename = "as", skip_serializing_if = "String::is_empty")]
    pub conversion: String,
}
