//! Forwarding of inbound requests to an upstream service.
//!
//! A [`ProxyTemplate`] turns the inbound request into an [`OutboundRequest`]
//! by substituting `:name` placeholders of the target url, appending
//! generated query parameters and generating a JSON payload. A
//! [`StaticProxy`] forwards the inbound request as is. Sending is done by
//! a [`Dispatch`] implementation so the network can be swapped out.

use crate::convert::{display_string, type_name};
use crate::error::{DispatchError, ProxyError, SpecError};
use crate::mapped::{RequestContext, PLACEHOLDER_PREFIX};
use crate::valuer::{GenerationType, Valuer};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use indexmap::IndexMap;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default content type of a generated payload.
pub const DEFAULT_PAYLOAD_CONTENT_TYPE: &str = "application/json";

/// Characters escaped when a generated value is placed in a path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::HOST,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
    header::PROXY_AUTHORIZATION,
];

/// A fully prepared request, ready to be sent.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// What came back from upstream.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Sends outbound requests.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, request: OutboundRequest) -> Result<UpstreamResponse, ProxyError>;
}

/// [`Dispatch`] over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
}

impl HttpDispatcher {
    /// Each outbound call is bounded by `timeout`; redirects are passed back to the caller.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Dispatch for HttpDispatcher {
    async fn dispatch(&self, request: OutboundRequest) -> Result<UpstreamResponse, ProxyError> {
        debug!(method = %request.method, url = %request.url, "Dispatching upstream request");
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Parse a configured header map once, at compile time.
pub fn parse_headers(headers: &HashMap<String, String>) -> Result<HeaderMap, SpecError> {
    let mut parsed = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| SpecError::InvalidHeader {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| SpecError::InvalidHeader {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        parsed.insert(header_name, header_value);
    }
    Ok(parsed)
}

/// Parse a proxy method, accepting any case.
pub fn parse_method(method: &str) -> Result<Method, SpecError> {
    Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|_| SpecError::InvalidMethod(method.to_string()))
}

/// Inbound headers minus hop-by-hop ones.
pub fn forwarded_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = inbound.clone();
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
    headers
}

/// Strip hop-by-hop headers from an upstream response.
pub fn response_headers(upstream: &HeaderMap) -> HeaderMap {
    forwarded_headers(upstream)
}

/// Configured headers replace inbound ones with the same name.
fn apply_static_headers(headers: &mut HeaderMap, static_headers: &HeaderMap) {
    for (name, value) in static_headers {
        headers.insert(name.clone(), value.clone());
    }
}

fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Forwards the inbound request to a fixed url.
#[derive(Debug)]
pub struct StaticProxy {
    method: Method,
    url: Url,
    headers: HeaderMap,
}

impl StaticProxy {
    pub fn new(method: Method, url: &str, headers: HeaderMap) -> Result<Self, SpecError> {
        let url = Url::parse(url).map_err(|e| SpecError::InvalidProxyUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { method, url, headers })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Method is overridden and path and query come from the target url;
    /// the inbound body is passed through.
    pub fn prepare(&self, ctx: &RequestContext, inbound_headers: &HeaderMap) -> OutboundRequest {
        let mut headers = forwarded_headers(inbound_headers);
        apply_static_headers(&mut headers, &self.headers);
        let body = (!ctx.body().is_empty()).then(|| Bytes::copy_from_slice(ctx.body()));
        OutboundRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers,
            body,
        }
    }
}

/// Builds the outbound request from generated values.
#[derive(Debug)]
pub struct ProxyTemplate {
    method: Method,
    url: String,
    url_params: IndexMap<String, Valuer>,
    query: IndexMap<String, Valuer>,
    payload: Option<Valuer>,
    headers: HeaderMap,
    content_type: HeaderValue,
}

impl ProxyTemplate {
    pub fn new(
        method: Method,
        url: &str,
        url_params: IndexMap<String, Valuer>,
        query: IndexMap<String, Valuer>,
        payload: Option<Valuer>,
        headers: HeaderMap,
        content_type: Option<&str>,
    ) -> Result<Self, SpecError> {
        let content_type = content_type.unwrap_or(DEFAULT_PAYLOAD_CONTENT_TYPE);
        let content_type = HeaderValue::from_str(content_type).map_err(|e| SpecError::InvalidHeader {
            name: header::CONTENT_TYPE.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            method,
            url: url.to_string(),
            url_params,
            query,
            payload,
            headers,
            content_type,
        })
    }

    /// Generate everything up front; nothing is sent if any step fails.
    pub fn prepare<R: Rng + ?Sized>(
        &self,
        ctx: &RequestContext,
        inbound_headers: &HeaderMap,
        rng: &mut R,
    ) -> Result<OutboundRequest, ProxyError> {
        let url = self.prepare_url(ctx, rng)?;

        let mut headers = forwarded_headers(inbound_headers);
        let body = if carries_body(&self.method) {
            let payload = self.prepare_payload(ctx, rng)?;
            headers.insert(header::CONTENT_TYPE, self.content_type.clone());
            Some(payload.unwrap_or_default())
        } else {
            headers.remove(header::CONTENT_TYPE);
            None
        };
        apply_static_headers(&mut headers, &self.headers);

        Ok(OutboundRequest {
            method: self.method.clone(),
            url,
            headers,
            body,
        })
    }

    /// Substitute placeholders, then append generated query parameters.
    pub fn prepare_url<R: Rng + ?Sized>(
        &self,
        ctx: &RequestContext,
        rng: &mut R,
    ) -> Result<Url, ProxyError> {
        let mut replacements = HashMap::with_capacity(self.url_params.len());
        for (key, valuer) in &self.url_params {
            let value = valuer.generate(ctx, rng).map_err(|source| ProxyError::Generate {
                key: key.clone(),
                source,
            })?;
            let text = display_string(&value).map_err(|source| ProxyError::Conversion {
                key: key.clone(),
                source,
            })?;
            replacements.insert(key.as_str(), text);
        }

        let substituted = substitute_placeholders(&self.url, &replacements);
        let mut url = Url::parse(&substituted).map_err(|e| DispatchError::InvalidUrl {
            url: substituted.clone(),
            reason: e.to_string(),
        })?;

        let mut pairs = Vec::new();
        for (key, valuer) in &self.query {
            let value = valuer.generate(ctx, rng).map_err(|source| ProxyError::Generate {
                key: key.clone(),
                source,
            })?;
            match valuer.generation_type() {
                GenerationType::Multi => {
                    let items = match &value {
                        Value::Array(items) => items,
                        other => {
                            return Err(DispatchError::NotSequence {
                                key: key.clone(),
                                type_name: type_name(other),
                            }
                            .into())
                        }
                    };
                    for item in items {
                        let text = display_string(item).map_err(|source| ProxyError::Conversion {
                            key: key.clone(),
                            source,
                        })?;
                        pairs.push((key.as_str(), text));
                    }
                }
                GenerationType::Single | GenerationType::Complex => {
                    let text = display_string(&value).map_err(|source| ProxyError::Conversion {
                        key: key.clone(),
                        source,
                    })?;
                    pairs.push((key.as_str(), text));
                }
            }
        }

        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        debug!(url = %url, "Prepared proxy url");
        Ok(url)
    }

    fn prepare_payload<R: Rng + ?Sized>(
        &self,
        ctx: &RequestContext,
        rng: &mut R,
    ) -> Result<Option<Bytes>, ProxyError> {
        let payload = match &self.payload {
            Some(payload) if !payload.is_nil() => payload,
            _ => return Ok(None),
        };
        let value = payload.generate(ctx, rng).map_err(ProxyError::Payload)?;
        Ok(Some(Bytes::from(value.to_string())))
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Split off the query and fragment; placeholders only live in the part before.
fn split_path(template: &str) -> (&str, &str) {
    match template.find(['?', '#']) {
        Some(pos) => template.split_at(pos),
        None => (template, ""),
    }
}

/// Next `:name` token: the text before it, the name, and the text after it.
fn next_placeholder(text: &str) -> Option<(&str, &str, &str)> {
    let pos = text.find(PLACEHOLDER_PREFIX)?;
    let after = &text[pos + PLACEHOLDER_PREFIX.len_utf8()..];
    let len = after.find(|c: char| !is_name_char(c)).unwrap_or(after.len());
    Some((&text[..pos], &after[..len], &after[len..]))
}

/// Whether the url template carries a `:name` token before its query.
pub fn has_placeholder(template: &str, name: &str) -> bool {
    let mut remaining = split_path(template).0;
    while let Some((_, token, rest)) = next_placeholder(remaining) {
        if token == name {
            return true;
        }
        remaining = rest;
    }
    false
}

/// Replace every `:name` token that has a value. A token ends at the first
/// character that cannot be part of a name, so `:id` leaves `:idx` alone and
/// `:id.json` keeps its suffix. The query part is left alone.
fn substitute_placeholders(template: &str, values: &HashMap<&str, String>) -> String {
    let (path, query) = split_path(template);
    let mut substituted = String::with_capacity(template.len());
    let mut remaining = path;
    while let Some((before, token, rest)) = next_placeholder(remaining) {
        substituted.push_str(before);
        match values.get(token) {
            Some(value) if !token.is_empty() => {
                substituted.extend(utf8_percent_encode(value, PATH_SEGMENT));
            }
            _ => {
                substituted.push(PLACEHOLDER_PREFIX);
                substituted.push_str(token);
            }
        }
        remaining = rest;
    }
    substituted.push_str(remaining);
    substituted.push_str(query);
    substituted
}
