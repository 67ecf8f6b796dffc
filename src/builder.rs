//! Compilation of endpoint definitions.
//!
//! Turns [`Param`] trees into [`Valuer`] trees and endpoint definitions
//! into [`CompiledEndpoint`]s. Everything here runs once, before the
//! server accepts its first request.

use crate::config::{
    EndpointDefinition, FakerConfig, MappedSpec, Param, ProxyDefinition, ResponseDefinition,
    ResponseFormat, ResponseType,
};
use crate::convert::Conversion;
use crate::error::{ConfigError, SpecError};
use crate::mapped::{BodyMapper, PathMapper, QueryMapper, RequestLocation};
use crate::matcher::PathTemplate;
use crate::proxy::{has_placeholder, parse_headers, parse_method, ProxyTemplate, StaticProxy};
use crate::server::{CompiledEndpoint, DynamicResponse, Handler, StaticResponse};
use crate::valuer::{
    is_nil, ArrayValuer, ObjectValuer, RandomKind, RandomValuer, ValueType, Valuer, ValuerKind,
};
use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use base64::Engine;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Value types not allowed as url params of a dynamic proxy.
pub const URL_PARAMS_DISALLOWED: [ValueType; 2] = [ValueType::Array, ValueType::Object];
/// Value types not allowed as query params of a dynamic proxy.
pub const QUERY_PARAMS_DISALLOWED: [ValueType; 1] = [ValueType::Object];

/// Compiles params and endpoints. Files referenced by endpoints are
/// resolved against `base_dir`.
#[derive(Debug, Clone)]
pub struct Builder {
    base_dir: PathBuf,
}

impl Builder {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Compile one param, keeping its key.
    pub fn build(&self, param: &Param, url: &str) -> Result<Valuer, SpecError> {
        self.build_keyed(param, &param.key, url)
    }

    /// No params yields `None`, one param compiles directly and more
    /// become an object.
    pub fn build_list(&self, params: &[Param], url: &str) -> Result<Option<Valuer>, SpecError> {
        match params {
            [] => Ok(None),
            [param] => self.build(param, url).map(Some),
            _ => {
                let object = self.build_object(params, url)?;
                Ok(Some(Valuer::new("", ValuerKind::Object(object))))
            }
        }
    }

    /// Compile a named param list into unkeyed valuers, in config order.
    pub fn build_named(
        &self,
        params: &[Param],
        disallowed: &[ValueType],
        url: &str,
        context: &'static str,
    ) -> Result<IndexMap<String, Valuer>, SpecError> {
        let mut valuers = IndexMap::with_capacity(params.len());
        for param in params {
            if param.key.is_empty() {
                return Err(SpecError::EmptyKey {
                    url: url.to_string(),
                    details: format!("{} cannot have empty keys, {}", context, param.details()),
                });
            }
            if valuers.contains_key(&param.key) {
                return Err(SpecError::DuplicatedKey {
                    url: url.to_string(),
                    key: param.key.clone(),
                });
            }
            let value_type = single_value_type(param)?;
            if disallowed.contains(&value_type) {
                return Err(SpecError::DisallowedValueType { value_type, context });
            }
            // the name only addresses the value, it is not part of the output
            let valuer = self.build_keyed(param, "", url)?;
            valuers.insert(param.key.clone(), valuer);
        }
        Ok(valuers)
    }

    fn build_keyed(&self, param: &Param, key: &str, url: &str) -> Result<Valuer, SpecError> {
        let value_type = single_value_type(param)?;
        debug!(key = %param.key, value_type = %value_type, "Building valuer");

        let kind = if let Some(array) = &param.array {
            let element = self.build_list(&array.element, url)?.ok_or_else(|| {
                SpecError::EmptyArrayElement {
                    key: param.key.clone(),
                }
            })?;
            ValuerKind::Array(ArrayValuer::new(array.min, array.max, element)?)
        } else if let Some(random) = &param.random {
            let kind: RandomKind = random.kind.parse()?;
            ValuerKind::Random(RandomValuer::new(kind, random.min, random.max)?)
        } else if let Some(value) = &param.static_value {
            ValuerKind::Static(value.value.clone())
        } else if let Some(mapped) = &param.mapped {
            build_mapped(mapped, url)?
        } else {
            ValuerKind::Object(self.build_object(&param.object, url)?)
        };

        Ok(Valuer::new(key, kind))
    }

    fn build_object(&self, params: &[Param], url: &str) -> Result<ObjectValuer, SpecError> {
        let mut seen = HashSet::with_capacity(params.len());
        let mut children = Vec::with_capacity(params.len());
        for param in params {
            if param.key.is_empty() {
                return Err(SpecError::EmptyKey {
                    url: url.to_string(),
                    details: param.details(),
                });
            }
            if !seen.insert(param.key.as_str()) {
                return Err(SpecError::DuplicatedKey {
                    url: url.to_string(),
                    key: param.key.clone(),
                });
            }
            children.push(self.build(param, url)?);
        }
        ObjectValuer::new(children)
    }

    /// Compile a single endpoint.
    pub fn build_endpoint(&self, endpoint: &EndpointDefinition) -> Result<CompiledEndpoint, SpecError> {
        PathTemplate::parse(&endpoint.url)?;
        let handler = match (&endpoint.response, &endpoint.proxy) {
            (Some(response), _) => self.build_response(response, &endpoint.url)?,
            (None, Some(proxy)) => self.build_proxy(proxy, &endpoint.url)?,
            (None, None) => {
                return Err(SpecError::MissingHandler {
                    url: endpoint.url.clone(),
                })
            }
        };
        Ok(CompiledEndpoint {
            method: endpoint.method.to_uppercase(),
            url: endpoint.url.clone(),
            handler,
        })
    }

    /// Validate the whole configuration, then compile every endpoint.
    /// All failures are reported together.
    pub fn build_all(&self, config: &FakerConfig) -> Result<Vec<CompiledEndpoint>, ConfigError> {
        config.validate()?;

        let mut compiled = Vec::with_capacity(config.endpoints.len());
        let mut errors = Vec::new();
        for endpoint in &config.endpoints {
            match self.build_endpoint(endpoint) {
                Ok(handler) => {
                    info!(method = %endpoint.method, url = %endpoint.url, kind = handler.handler.kind(), "Endpoint compiled");
                    compiled.push(handler);
                }
                Err(err) => {
                    warn!(method = %endpoint.method, url = %endpoint.url, error = %err, "Endpoint failed to compile");
                    errors.push(err.for_endpoint(&endpoint.method, &endpoint.url));
                }
            }
        }

        if errors.is_empty() {
            Ok(compiled)
        } else {
            Err(ConfigError::Compile(errors))
        }
    }

    fn build_response(&self, response: &ResponseDefinition, url: &str) -> Result<Handler, SpecError> {
        let status = StatusCode::from_u16(response.status)
            .map_err(|_| SpecError::InvalidStatus(response.status))?;

        match response.response_type {
            ResponseType::Static => {
                let format = require_format(response)?;
                let body = self.static_body(response, format)?;
                let headers = response_headers(response, format, false)?;
                Ok(Handler::Static(StaticResponse { status, headers, body }))
            }
            ResponseType::Dynamic => {
                let format = require_format(response)?;
                if format != ResponseFormat::Json {
                    return Err(SpecError::UnsupportedFormat {
                        format: format.to_string(),
                        context: "dynamic responses".to_string(),
                    });
                }
                let valuer = self.build_list(&response.object, url)?;
                let valuer = match valuer {
                    Some(valuer) if !is_nil(Some(&valuer)) => valuer,
                    _ => return Err(SpecError::MissingObject { url: url.to_string() }),
                };
                let headers = response_headers(response, format, true)?;
                Ok(Handler::Dynamic(DynamicResponse { status, headers, valuer }))
            }
            ResponseType::Custom => Err(SpecError::UnsupportedResponseType(
                ResponseType::Custom.to_string(),
            )),
        }
    }

    fn build_proxy(&self, proxy: &ProxyDefinition, url: &str) -> Result<Handler, SpecError> {
        let method = parse_method(&proxy.method)?;
        let headers = parse_headers(&proxy.headers)?;

        match proxy.proxy_type {
            ResponseType::Static => Ok(Handler::StaticProxy(StaticProxy::new(method, &proxy.url, headers)?)),
            ResponseType::Dynamic => {
                let url_params = self.build_named(&proxy.url_params, &URL_PARAMS_DISALLOWED, url, "url params")?;
                for name in url_params.keys() {
                    if !has_placeholder(&proxy.url, name) {
                        warn!(url = %proxy.url, param = %name, "Url param has no placeholder in proxy url");
                    }
                }
                let query = self.build_named(&proxy.query, &QUERY_PARAMS_DISALLOWED, url, "query params")?;
                let payload = self.build_list(&proxy.object, url)?;
                let template = ProxyTemplate::new(
                    method,
                    &proxy.url,
                    url_params,
                    query,
                    payload,
                    headers,
                    proxy.content_type.as_deref(),
                )?;
                Ok(Handler::DynamicProxy(template))
            }
            ResponseType::Custom => Err(SpecError::UnsupportedResponseType(
                ResponseType::Custom.to_string(),
            )),
        }
    }

    /// Inline `static` takes priority over `file`.
    fn static_body(&self, response: &ResponseDefinition, format: ResponseFormat) -> Result<Bytes, SpecError> {
        match (format, &response.static_body) {
            (ResponseFormat::Json, Some(value)) => Ok(Bytes::from(value.to_string())),
            (ResponseFormat::Json, None) => {
                let (path, content) = self.read_file(response.file.as_deref())?;
                serde_json::from_slice::<Value>(&content).map_err(|e| SpecError::ResponseFile {
                    path,
                    reason: format!("invalid json: {e}"),
                })?;
                Ok(Bytes::from(content))
            }
            (ResponseFormat::Bytes, Some(Value::String(encoded))) => base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map(Bytes::from)
                .map_err(|e| SpecError::InvalidStatic(format!("static bytes must be base64: {e}"))),
            (ResponseFormat::Xml, Some(Value::String(text))) => Ok(Bytes::from(text.clone())),
            (ResponseFormat::Bytes | ResponseFormat::Xml, Some(other)) => Err(SpecError::InvalidStatic(format!(
                "static {format} body must be a string, got {other}"
            ))),
            // served verbatim, xml is not checked for well-formedness
            (ResponseFormat::Bytes | ResponseFormat::Xml, None) => {
                let (_, content) = self.read_file(response.file.as_deref())?;
                Ok(Bytes::from(content))
            }
        }
    }

    fn read_file(&self, file: Option<&str>) -> Result<(PathBuf, Vec<u8>), SpecError> {
        let file = file.filter(|f| !f.is_empty()).ok_or_else(|| SpecError::ResponseFile {
            path: self.base_dir.clone(),
            reason: "file path is empty".to_string(),
        })?;
        let path = self.base_dir.join(file);
        info!(path = %path.display(), "Reading response file");
        let content = std::fs::read(&path).map_err(|e| SpecError::ResponseFile {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok((path, content))
    }
}

/// Builder whose files resolve next to the given configuration file.
pub fn builder_for(config_path: &Path) -> Builder {
    Builder::new(config_path.parent().unwrap_or_else(|| Path::new(".")))
}

fn build_mapped(mapped: &MappedSpec, url: &str) -> Result<ValuerKind, SpecError> {
    let conversion: Conversion = mapped.conversion.parse()?;
    let kind = match mapped.from.parse::<RequestLocation>()? {
        RequestLocation::Body => ValuerKind::Body(BodyMapper::new(&mapped.path, conversion)?),
        RequestLocation::Query => {
            if mapped.param.is_empty() {
                return Err(SpecError::EmptyKey {
                    url: url.to_string(),
                    details: "mapped query value needs a param name".to_string(),
                });
            }
            ValuerKind::Query(QueryMapper::new(&mapped.param, mapped.index, conversion))
        }
        RequestLocation::Url => ValuerKind::Path(PathMapper::new(&mapped.param, url, conversion)?),
    };
    Ok(kind)
}

/// Exactly one variant must be set.
fn single_value_type(param: &Param) -> Result<ValueType, SpecError> {
    match param.value_types().as_slice() {
        [] => Err(SpecError::NoVariant {
            key: param.key.clone(),
        }),
        [value_type] => Ok(*value_type),
        many => Err(SpecError::AmbiguousVariant {
            key: param.key.clone(),
            variants: many.iter().map(ValueType::to_string).collect::<Vec<_>>().join(", "),
        }),
    }
}

fn require_format(response: &ResponseDefinition) -> Result<ResponseFormat, SpecError> {
    response.format.ok_or_else(|| SpecError::UnsupportedFormat {
        format: "none".to_string(),
        context: format!("{} responses", response.response_type),
    })
}

/// Content type from the format, then configured headers on top.
fn response_headers(
    response: &ResponseDefinition,
    format: ResponseFormat,
    generated: bool,
) -> Result<HeaderMap, SpecError> {
    let content_type = match format.content_type() {
        Some(content_type) => content_type.to_string(),
        None if generated => "application/json".to_string(),
        None => response.content_type.clone().unwrap_or_default(),
    };
    let mut headers = HeaderMap::new();
    if !content_type.is_empty() {
        let value = HeaderValue::from_str(&content_type).map_err(|e| SpecError::InvalidHeader {
            name: header::CONTENT_TYPE.to_string(),
            reason: e.to_string(),
        })?;
        headers.insert(header::CONTENT_TYPE, value);
    }
    for (name, value) in parse_headers(&response.headers)? {
        if let Some(name) = name {
            headers.insert(name, value);
        }
    }
    Ok(headers)
}
