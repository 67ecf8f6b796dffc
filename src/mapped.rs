//! Extractors that read values from the inbound request.

use crate::convert::Conversion;
use crate::error::{ExtractionError, GenerateError, SpecError};
use jsonpath_rust::JsonPath;
use percent_encoding::percent_decode_str;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, error};

/// Marker of a placeholder segment in a url template.
pub const PLACEHOLDER_PREFIX: char = ':';

/// Part of the request a mapped value is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestLocation {
    Body,
    Query,
    Url,
}

impl FromStr for RequestLocation {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "body" => Ok(RequestLocation::Body),
            "query" => Ok(RequestLocation::Query),
            "url" => Ok(RequestLocation::Url),
            other => Err(SpecError::UnsupportedLocation(other.to_string())),
        }
    }
}

/// The parts of an inbound request valuers can read.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    method: String,
    path: String,
    query: Vec<(String, String)>,
    body: Vec<u8>,
}

impl RequestContext {
    pub fn new(method: &str, path: &str, query_string: Option<&str>, body: Vec<u8>) -> Self {
        Self {
            method: method.to_uppercase(),
            path: path.to_string(),
            query: parse_query_string(query_string.unwrap_or("")),
            body,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request path as received, still percent-encoded.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Query pairs in the order they were sent.
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    /// Every occurrence of a query parameter, in order.
    pub fn query_values(&self, name: &str) -> Vec<&str> {
        self.query
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    fn json_body(&self) -> Result<Value, ExtractionError> {
        serde_json::from_slice(&self.body).map_err(|e| ExtractionError::UnparsableBody(e.to_string()))
    }
}

/// Parse a query string into ordered, decoded key-value pairs.
pub fn parse_query_string(query: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Reads a value from the JSON body with a JSONPath expression.
///
/// A definite expression yields its single match. Wildcards, recursive
/// descent, filters, slices and unions always yield an array, even when
/// only one element matched.
pub struct BodyMapper {
    expression: String,
    path: JsonPath,
    definite: bool,
    conversion: Conversion,
}

impl fmt::Debug for BodyMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyMapper")
            .field("expression", &self.expression)
            .field("definite", &self.definite)
            .field("conversion", &self.conversion)
            .finish()
    }
}

impl BodyMapper {
    pub fn new(expression: &str, conversion: Conversion) -> Result<Self, SpecError> {
        if expression.trim().is_empty() {
            return Err(SpecError::InvalidJsonPath {
                path: expression.to_string(),
                reason: "expression is empty".to_string(),
            });
        }
        let path = JsonPath::try_from(expression).map_err(|e| SpecError::InvalidJsonPath {
            path: expression.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            expression: expression.to_string(),
            path,
            definite: is_definite(expression),
            conversion,
        })
    }

    pub fn is_definite(&self) -> bool {
        self.definite
    }

    pub fn extract(&self, ctx: &RequestContext) -> Result<Value, GenerateError> {
        let body = ctx.json_body()?;
        let matches = match self.path.find(&body) {
            Value::Array(matches) => matches,
            Value::Null => Vec::new(),
            single => vec![single],
        };
        if matches.is_empty() {
            error!(path = %self.expression, "Json path matched nothing");
            return Err(ExtractionError::PathNotFound(self.expression.clone()).into());
        }

        let found = if self.definite {
            matches.into_iter().next().unwrap_or(Value::Null)
        } else {
            Value::Array(matches)
        };
        Ok(self.conversion.apply(found)?)
    }
}

/// Whether an expression can match at most one node.
fn is_definite(expression: &str) -> bool {
    !(expression.contains('*')
        || expression.contains("..")
        || expression.contains("?(")
        || expression.contains(':')
        || expression.contains(','))
}

/// Reads one occurrence of a query parameter.
#[derive(Debug)]
pub struct QueryMapper {
    name: String,
    index: Option<i64>,
    conversion: Conversion,
}

impl QueryMapper {
    pub fn new(name: &str, index: Option<i64>, conversion: Conversion) -> Self {
        Self {
            name: name.to_string(),
            index,
            conversion,
        }
    }

    pub fn extract(&self, ctx: &RequestContext) -> Result<Value, GenerateError> {
        let values = ctx.query_values(&self.name);
        debug!(key = %self.name, values = ?values, "Query values");
        if values.is_empty() {
            return Err(ExtractionError::MissingQuery(self.name.clone()).into());
        }

        let selected = match self.index {
            None => values[0],
            Some(index) if index >= 0 && (index as usize) < values.len() => values[index as usize],
            Some(index) => {
                return Err(ExtractionError::IndexOutOfRange {
                    key: self.name.clone(),
                    index,
                    values: values.iter().map(|v| v.to_string()).collect(),
                }
                .into())
            }
        };

        Ok(self.conversion.apply(Value::String(selected.to_string()))?)
    }
}

/// Reads the url path segment at the position of a `:name` placeholder.
#[derive(Debug)]
pub struct PathMapper {
    position: usize,
    conversion: Conversion,
}

impl PathMapper {
    /// Locate `:name` in the endpoint's url template.
    pub fn new(name: &str, url_template: &str, conversion: Conversion) -> Result<Self, SpecError> {
        if name.is_empty() {
            return Err(SpecError::EmptyPlaceholderKey {
                url: url_template.to_string(),
            });
        }
        let position = find_placeholder(name, url_template).ok_or_else(|| {
            SpecError::PlaceholderNotFound {
                key: name.to_string(),
                url: url_template.to_string(),
            }
        })?;
        Ok(Self {
            position,
            conversion,
        })
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn extract(&self, ctx: &RequestContext) -> Result<Value, GenerateError> {
        // routing already matched the template shape, so the segment is present
        let segment = ctx.path().split('/').nth(self.position).ok_or_else(|| {
            ExtractionError::MissingSegment {
                position: self.position,
                path: ctx.path().to_string(),
            }
        })?;
        let decoded = percent_decode_str(segment).decode_utf8_lossy().into_owned();
        Ok(self.conversion.apply(Value::String(decoded))?)
    }
}

/// Zero-based `/`-separated segment position of `:name` in a template.
pub fn find_placeholder(name: &str, url_template: &str) -> Option<usize> {
    let path = url_template.split(['?', '#']).next().unwrap_or("");
    path.split('/').position(|segment| {
        segment
            .strip_prefix(PLACEHOLDER_PREFIX)
            .is_some_and(|placeholder| placeholder == name)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConversionError;
    use serde_json::json;

    fn body_ctx(payload: &str) -> RequestContext {
        RequestContext::new(
            "POST",
            "/test",
            Some("test=asd&test=asd"),
            payload.as_bytes().to_vec(),
        )
    }

    #[test]
    fn test_body_mapper() {
        let payload = r#"{"name": 1323, "text": "1323", "bad": "1323as"}"#;

        let mapper = BodyMapper::new("$.name", Conversion::None).unwrap();
        assert_eq!(mapper.extract(&body_ctx(payload)).unwrap(), json!(1323));

        let mapper = BodyMapper::new("$.name", Conversion::Text).unwrap();
        assert_eq!(mapper.extract(&body_ctx(payload)).unwrap(), json!("1323"));

        let mapper = BodyMapper::new("$.text", Conversion::Number).unwrap();
        assert_eq!(mapper.extract(&body_ctx(payload)).unwrap(), json!(1323));

        let mapper = BodyMapper::new("$.bad", Conversion::Number).unwrap();
        assert!(matches!(
            mapper.extract(&body_ctx(payload)),
            Err(GenerateError::Conversion(ConversionError::Unparsable { .. }))
        ));
    }

    #[test]
    fn test_body_mapper_nested_and_arrays() {
        let payload = r#"{"user": {"tags": ["a", "b"], "id": 7}}"#;

        let mapper = BodyMapper::new("$.user.id", Conversion::None).unwrap();
        assert_eq!(mapper.extract(&body_ctx(payload)).unwrap(), json!(7));

        let mapper = BodyMapper::new("$.user.tags", Conversion::None).unwrap();
        assert_eq!(mapper.extract(&body_ctx(payload)).unwrap(), json!(["a", "b"]));
    }

    #[test]
    fn test_body_mapper_indefinite_paths() {
        let mapper = BodyMapper::new("$.tags[*]", Conversion::None).unwrap();
        assert!(!mapper.is_definite());
        assert_eq!(mapper.extract(&body_ctx(r#"{"tags": ["a"]}"#)).unwrap(), json!(["a"]));
        assert_eq!(
            mapper.extract(&body_ctx(r#"{"tags": ["a", "b"]}"#)).unwrap(),
            json!(["a", "b"])
        );

        let mapper = BodyMapper::new("$..id", Conversion::None).unwrap();
        assert_eq!(mapper.extract(&body_ctx(r#"{"user": {"id": 7}}"#)).unwrap(), json!([7]));

        let mapper = BodyMapper::new("$.tags[0]", Conversion::None).unwrap();
        assert!(mapper.is_definite());
        assert_eq!(mapper.extract(&body_ctx(r#"{"tags": ["a", "b"]}"#)).unwrap(), json!("a"));

        assert!(!BodyMapper::new("$.tags[0:2]", Conversion::None).unwrap().is_definite());
        assert!(!BodyMapper::new("$.tags[0,1]", Conversion::None).unwrap().is_definite());
        assert!(!BodyMapper::new("$.items[?(@.id == 1)]", Conversion::None).unwrap().is_definite());
    }

    #[test]
    fn test_body_mapper_failures() {
        let mapper = BodyMapper::new("$.name2", Conversion::None).unwrap();
        assert!(matches!(
            mapper.extract(&body_ctx(r#"{"name": 123}"#)),
            Err(GenerateError::Extraction(ExtractionError::PathNotFound(_)))
        ));

        let mapper = BodyMapper::new("$.name", Conversion::None).unwrap();
        assert!(matches!(
            mapper.extract(&body_ctx("not json")),
            Err(GenerateError::Extraction(ExtractionError::UnparsableBody(_)))
        ));
        assert!(matches!(
            mapper.extract(&body_ctx("")),
            Err(GenerateError::Extraction(ExtractionError::UnparsableBody(_)))
        ));
    }

    #[test]
    fn test_body_mapper_invalid_expression() {
        assert!(matches!(
            BodyMapper::new("", Conversion::None),
            Err(SpecError::InvalidJsonPath { .. })
        ));
    }

    fn query_ctx() -> RequestContext {
        RequestContext::new(
            "POST",
            "/",
            Some("test=1234&test2=asd&ids[]=16&ids[]=18"),
            Vec::new(),
        )
    }

    #[test]
    fn test_query_mapper() {
        let ctx = query_ctx();

        let mapper = QueryMapper::new("test2", None, Conversion::None);
        assert_eq!(mapper.extract(&ctx).unwrap(), json!("asd"));

        let mapper = QueryMapper::new("test", None, Conversion::Number);
        assert_eq!(mapper.extract(&ctx).unwrap(), json!(1234));

        let mapper = QueryMapper::new("test2", None, Conversion::Number);
        assert!(matches!(mapper.extract(&ctx), Err(GenerateError::Conversion(_))));

        let mapper = QueryMapper::new("not-present", None, Conversion::None);
        assert!(matches!(
            mapper.extract(&ctx),
            Err(GenerateError::Extraction(ExtractionError::MissingQuery(_)))
        ));
    }

    #[test]
    fn test_query_mapper_index() {
        let ctx = query_ctx();

        let first = QueryMapper::new("ids[]", None, Conversion::None);
        assert_eq!(first.extract(&ctx).unwrap(), json!("16"));

        let second = QueryMapper::new("ids[]", Some(1), Conversion::None);
        assert_eq!(second.extract(&ctx).unwrap(), json!("18"));

        for index in [-1, 2] {
            let mapper = QueryMapper::new("ids[]", Some(index), Conversion::None);
            assert!(matches!(
                mapper.extract(&ctx),
                Err(GenerateError::Extraction(ExtractionError::IndexOutOfRange { .. }))
            ));
        }
    }

    #[test]
    fn test_query_decoding() {
        let ctx = RequestContext::new("GET", "/", Some("name=John%20Doe&q=a+b"), Vec::new());
        assert_eq!(ctx.query_values("name"), vec!["John Doe"]);
        assert_eq!(ctx.query_values("q"), vec!["a b"]);
    }

    #[test]
    fn test_path_mapper_construction() {
        assert!(matches!(
            PathMapper::new("test", "", Conversion::None),
            Err(SpecError::PlaceholderNotFound { .. })
        ));
        assert!(matches!(
            PathMapper::new("", "/super/:test", Conversion::None),
            Err(SpecError::EmptyPlaceholderKey { .. })
        ));
        assert!(matches!(
            PathMapper::new("tes", "/super/:test", Conversion::None),
            Err(SpecError::PlaceholderNotFound { .. })
        ));
        assert_eq!(PathMapper::new("test", "/:test/page", Conversion::None).unwrap().position(), 1);
    }

    #[test]
    fn test_path_mapper_extract() {
        let ctx = RequestContext::new("POST", "/super/page/1234", None, Vec::new());

        let mapper = PathMapper::new("test", "/:test/page", Conversion::None).unwrap();
        assert_eq!(mapper.extract(&ctx).unwrap(), json!("super"));

        let mapper = PathMapper::new("test", "/super/page/:test", Conversion::Text).unwrap();
        assert_eq!(mapper.extract(&ctx).unwrap(), json!("1234"));

        let mapper = PathMapper::new("test", "/super/page/:test", Conversion::Number).unwrap();
        assert_eq!(mapper.extract(&ctx).unwrap(), json!(1234));
    }

    #[test]
    fn test_path_mapper_decodes_segment() {
        let ctx = RequestContext::new("GET", "/users/John%20Doe", None, Vec::new());
        let mapper = PathMapper::new("name", "/users/:name", Conversion::None).unwrap();
        assert_eq!(mapper.extract(&ctx).unwrap(), json!("John Doe"));
    }

    #[test]
    fn test_request_location_parse() {
        assert_eq!("body".parse::<RequestLocation>().unwrap(), RequestLocation::Body);
        assert!("header".parse::<RequestLocation>().is_err());
    }
}
