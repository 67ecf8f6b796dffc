//! The fake HTTP server.

use crate::builder::{builder_for, Builder};
use crate::config::FakerConfig;
use crate::error::{ConfigError, ErrorResponse, NOT_FOUND_TITLE};
use crate::mapped::RequestContext;
use crate::matcher::RouteTable;
use crate::proxy::{response_headers, Dispatch, OutboundRequest, ProxyTemplate, StaticProxy};
use crate::valuer::Valuer;
use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Largest inbound body read into memory.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// An endpoint ready to serve requests.
#[derive(Debug)]
pub struct CompiledEndpoint {
    /// Upper-cased method
    pub method: String,
    pub url: String,
    pub handler: Handler,
}

/// How a matched request is answered.
#[derive(Debug)]
pub enum Handler {
    Static(StaticResponse),
    Dynamic(DynamicResponse),
    StaticProxy(StaticProxy),
    DynamicProxy(ProxyTemplate),
}

impl Handler {
    pub fn kind(&self) -> &'static str {
        match self {
            Handler::Static(_) => "static",
            Handler::Dynamic(_) => "dynamic",
            Handler::StaticProxy(_) => "static proxy",
            Handler::DynamicProxy(_) => "dynamic proxy",
        }
    }
}

/// A body fixed at startup.
#[derive(Debug)]
pub struct StaticResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A JSON body generated per request.
#[derive(Debug)]
pub struct DynamicResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub valuer: Valuer,
}

/// Serves a set of compiled endpoints.
pub struct FakerServer {
    endpoints: Vec<CompiledEndpoint>,
    routes: RouteTable,
    dispatcher: Arc<dyn Dispatch>,
}

impl FakerServer {
    /// Create a server from compiled endpoints, matched in the given order.
    pub fn new(endpoints: Vec<CompiledEndpoint>, dispatcher: Arc<dyn Dispatch>) -> Result<Self, ConfigError> {
        let mut routes = RouteTable::new();
        let mut errors = Vec::new();
        for endpoint in &endpoints {
            if let Err(err) = routes.add(&endpoint.method, &endpoint.url) {
                errors.push(err.for_endpoint(&endpoint.method, &endpoint.url));
            }
        }
        if !errors.is_empty() {
            return Err(ConfigError::Compile(errors));
        }

        info!(endpoints = endpoints.len(), "Fake server initialized");

        Ok(Self {
            endpoints,
            routes,
            dispatcher,
        })
    }

    /// Compile a configuration whose files live in `base_dir`.
    pub fn from_config(
        config: &FakerConfig,
        base_dir: &Path,
        dispatcher: Arc<dyn Dispatch>,
    ) -> Result<Self, ConfigError> {
        let endpoints = Builder::new(base_dir).build_all(config)?;
        Self::new(endpoints, dispatcher)
    }

    /// Load, validate and compile an endpoint file.
    pub fn from_file(path: &Path, dispatcher: Arc<dyn Dispatch>) -> Result<Self, ConfigError> {
        let config = FakerConfig::from_file(path)?;
        let endpoints = builder_for(path).build_all(&config)?;
        Self::new(endpoints, dispatcher)
    }

    pub fn endpoints(&self) -> &[CompiledEndpoint] {
        &self.endpoints
    }

    /// Router answering every request through the route table.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .fallback(handle_request)
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    /// Answer a single request.
    pub async fn respond(&self, method: &Method, uri: &Uri, headers: &HeaderMap, body: Bytes) -> Response {
        let start = Instant::now();
        let path = uri.path();

        let Some(matched) = self.routes.find(method.as_str(), path) else {
            warn!(method = %method, path = %path, "No endpoint matched");
            return ErrorResponse::new(
                StatusCode::NOT_FOUND,
                path,
                NOT_FOUND_TITLE,
                vec![format!("no endpoint registered for {} {}", method, path)],
            )
            .into_response();
        };
        let endpoint = &self.endpoints[matched.index];
        debug!(
            endpoint = %endpoint.url,
            path_params = ?matched.path_params,
            body = %String::from_utf8_lossy(&body),
            "Request matched"
        );

        let ctx = RequestContext::new(method.as_str(), path, uri.query(), body.to_vec());
        let response = match &endpoint.handler {
            Handler::Static(response) => {
                (response.status, response.headers.clone(), response.body.clone()).into_response()
            }
            Handler::Dynamic(response) => {
                let generated = {
                    let mut rng = rand::thread_rng();
                    response.valuer.generate(&ctx, &mut rng)
                };
                match generated {
                    Ok(value) => (response.status, response.headers.clone(), Json(value)).into_response(),
                    Err(err) => {
                        error!(endpoint = %endpoint.url, error = %err, "Response generation failed");
                        ErrorResponse::from_generate(path, &err).into_response()
                    }
                }
            }
            Handler::StaticProxy(proxy) => self.forward(path, proxy.prepare(&ctx, headers)).await,
            Handler::DynamicProxy(template) => {
                let prepared = {
                    let mut rng = rand::thread_rng();
                    template.prepare(&ctx, headers, &mut rng)
                };
                match prepared {
                    Ok(request) => self.forward(path, request).await,
                    Err(err) => {
                        error!(endpoint = %endpoint.url, error = %err, "Proxy request preparation failed");
                        ErrorResponse::from_proxy(path, &err).into_response()
                    }
                }
            }
        };

        info!(
            method = %method,
            path = %path,
            endpoint = %endpoint.url,
            status = response.status().as_u16(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Request served"
        );
        response
    }

    async fn forward(&self, path: &str, request: OutboundRequest) -> Response {
        let target = request.url.to_string();
        match self.dispatcher.dispatch(request).await {
            Ok(upstream) => {
                debug!(upstream_url = %target, status = upstream.status.as_u16(), "Upstream responded");
                (upstream.status, response_headers(&upstream.headers), Body::from(upstream.body)).into_response()
            }
            Err(err) => {
                error!(upstream_url = %target, error = %err, "Upstream request failed");
                ErrorResponse::from_proxy(path, &err).into_response()
            }
        }
    }
}

async fn handle_request(State(server): State<Arc<FakerServer>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(err) => {
            warn!(path = %parts.uri.path(), error = %err, "Failed reading request body");
            return ErrorResponse::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                parts.uri.path(),
                "Request body rejected",
                vec![err.to_string()],
            )
            .into_response();
        }
    };
    server.respond(&parts.method, &parts.uri, &parts.headers, body).await
}
