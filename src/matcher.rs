//! Request routing.
//!
//! Matches incoming requests against endpoint url templates.

use crate::error::SpecError;
use crate::mapped::PLACEHOLDER_PREFIX;
use percent_encoding::percent_decode_str;
use std::collections::HashMap;

const WILDCARD: &str = "*";

/// Result of matching a request against the route table.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch {
    /// Index of the matched endpoint, in registration order
    pub index: usize,
    /// Decoded values of the template's `:name` segments
    pub path_params: HashMap<String, String>,
}

/// Ordered table of method + template routes. The first match wins.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

#[derive(Debug)]
struct Route {
    method: String,
    template: PathTemplate,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route; returns its index.
    pub fn add(&mut self, method: &str, template: &str) -> Result<usize, SpecError> {
        let template = PathTemplate::parse(template)?;
        self.routes.push(Route {
            method: method.to_uppercase(),
            template,
        });
        Ok(self.routes.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Find the first route matching a request.
    pub fn find(&self, method: &str, path: &str) -> Option<RouteMatch> {
        let method = method.to_uppercase();
        self.routes
            .iter()
            .enumerate()
            .filter(|(_, route)| route.method == method)
            .find_map(|(index, route)| {
                route
                    .template
                    .matches(path)
                    .map(|path_params| RouteMatch { index, path_params })
            })
    }
}

/// A parsed url template: literal segments, `:name` placeholders and an
/// optional trailing `*`.
#[derive(Debug, Clone, PartialEq)]
pub struct PathTemplate {
    segments: Vec<TemplateSegment>,
    wildcard: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum TemplateSegment {
    Literal(String),
    Param(String),
}

impl PathTemplate {
    pub fn parse(template: &str) -> Result<Self, SpecError> {
        let invalid = |reason: &str| SpecError::InvalidRoute {
            url: template.to_string(),
            reason: reason.to_string(),
        };

        let rest = template
            .strip_prefix('/')
            .ok_or_else(|| invalid("template must start with /"))?;
        let parts: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/').collect()
        };

        let mut segments = Vec::with_capacity(parts.len());
        let mut wildcard = false;
        for (i, part) in parts.iter().enumerate() {
            if part.starts_with(WILDCARD) {
                if i != parts.len() - 1 {
                    return Err(invalid("wildcard should be at the end of the url"));
                }
                wildcard = true;
            } else if let Some(name) = part.strip_prefix(PLACEHOLDER_PREFIX) {
                if name.is_empty() {
                    return Err(invalid("placeholder name cannot be empty"));
                }
                segments.push(TemplateSegment::Param(name.to_string()));
            } else {
                segments.push(TemplateSegment::Literal(part.to_string()));
            }
        }

        Ok(Self { segments, wildcard })
    }

    /// Match a raw request path, returning the placeholder values.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let rest = path.strip_prefix('/')?;
        let parts: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/').collect()
        };

        if parts.len() < self.segments.len() || (!self.wildcard && parts.len() != self.segments.len()) {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(&parts) {
            match segment {
                TemplateSegment::Literal(literal) => {
                    if literal != part {
                        return None;
                    }
                }
                TemplateSegment::Param(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    let value = percent_decode_str(part).decode_utf8_lossy().into_owned();
                    params.insert(name.clone(), value);
                }
            }
        }

        Some(params)
    }
}
