//! Generates an endpoint file from an example JSON document.
//!
//! Objects become keyed object params, arrays become arrays of three
//! elements shaped like the first one. Scalars are either copied as static
//! values or replaced by random generators of the matching kind.

use crate::config::{
    ArraySpec, EndpointDefinition, FakerConfig, Param, RandomSpec, ResponseDefinition,
    ResponseFormat, ResponseType, StaticSpec,
};
use crate::error::TransformError;
use crate::valuer::RandomKind;
use serde_json::{Number, Value};
use std::collections::HashMap;
use std::path::Path;

/// Url used when none is given.
pub const DEFAULT_URL: &str = "fil-the-url";

const ARRAY_SIZE: i64 = 3;
const MIN_NUMBER: i64 = 1;
const MAX_NUMBER: i64 = 100;

/// Read an example document and render the endpoint file as pretty JSON.
pub fn transform_file(path: &Path, url: Option<&str>, response_type: &str) -> Result<String, TransformError> {
    let response_type = parse_response_type(response_type)?;
    let content = std::fs::read_to_string(path).map_err(|source| TransformError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let input: Value = serde_json::from_str(&content)?;
    let config = transform(&input, url, response_type);
    Ok(serde_json::to_string_pretty(&config)?)
}

/// Only `static` and `dynamic` make sense for generated endpoints.
pub fn parse_response_type(response_type: &str) -> Result<ResponseType, TransformError> {
    match response_type {
        "static" => Ok(ResponseType::Static),
        "dynamic" => Ok(ResponseType::Dynamic),
        other => Err(TransformError::InvalidResponseType(other.to_string())),
    }
}

/// Build a single GET endpoint whose dynamic response mirrors `input`.
pub fn transform(input: &Value, url: Option<&str>, response_type: ResponseType) -> FakerConfig {
    let url = url.filter(|u| !u.is_empty()).unwrap_or(DEFAULT_URL);
    let object = match input {
        Value::Object(fields) => fields
            .iter()
            .map(|(key, value)| param_for(key, value, response_type))
            .collect(),
        other => vec![param_for("", other, response_type)],
    };

    FakerConfig {
        endpoints: vec![EndpointDefinition {
            url: url.to_string(),
            method: "GET".to_string(),
            response: Some(ResponseDefinition {
                status: 200,
                response_type: ResponseType::Dynamic,
                headers: HashMap::new(),
                file: None,
                static_body: None,
                object,
                format: Some(ResponseFormat::Json),
                content_type: None,
            }),
            proxy: None,
        }],
    }
}

fn param_for(key: &str, value: &Value, response_type: ResponseType) -> Param {
    match value {
        // an empty object has nothing to generate from
        Value::Object(fields) if fields.is_empty() => static_param(key, value.clone()),
        Value::Object(fields) => Param {
            key: key.to_string(),
            object: fields
                .iter()
                .map(|(key, value)| param_for(key, value, response_type))
                .collect(),
            ..Default::default()
        },
        Value::Array(items) => {
            let (size, element) = match items.first() {
                Some(first) => (ARRAY_SIZE, param_for("", first, response_type)),
                None => (0, static_param("", Value::Null)),
            };
            Param {
                key: key.to_string(),
                array: Some(ArraySpec {
                    min: size,
                    max: size,
                    element: vec![element],
                }),
                ..Default::default()
            }
        }
        scalar if response_type == ResponseType::Static => static_param(key, scalar.clone()),
        Value::String(_) => random_param(key, RandomKind::StringAll, MIN_NUMBER, MAX_NUMBER),
        Value::Number(number) if is_integral(number) => {
            random_param(key, RandomKind::Integer, MIN_NUMBER, MAX_NUMBER)
        }
        Value::Number(_) => random_param(key, RandomKind::Float, MIN_NUMBER, MAX_NUMBER),
        Value::Bool(_) => random_param(key, RandomKind::Boolean, 0, 0),
        Value::Null => static_param(key, Value::Null),
    }
}

fn is_integral(number: &Number) -> bool {
    number.is_i64() || number.is_u64() || number.as_f64().is_some_and(|f| f.fract() == 0.0)
}

fn static_param(key: &str, value: Value) -> Param {
    Param {
        key: key.to_string(),
        static_value: Some(StaticSpec { value }),
        ..Default::default()
    }
}

fn random_param(key: &str, kind: RandomKind, min: i64, max: i64) -> Param {
    Param {
        key: key.to_string(),
        random: Some(RandomSpec {
            kind: kind.as_str().to_string(),
            min,
            max,
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::server::Handler;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_dynamic_scalars() {
        let input = json!({"name": "John", "age": 30, "score": 4.5, "active": true, "note": null});
        let config = transform(&input, Some("/people"), ResponseType::Dynamic);
        let endpoint = &config.endpoints[0];
        assert_eq!(endpoint.url, "/people");
        assert_eq!(endpoint.method, "GET");

        let object = &endpoint.response.as_ref().unwrap().object;
        let kinds: Vec<(&str, Option<&str>)> = object
            .iter()
            .map(|p| (p.key.as_str(), p.random.as_ref().map(|r| r.kind.as_str())))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("name", Some("string-all")),
                ("age", Some("integer")),
                ("score", Some("float")),
                ("active", Some("boolean")),
                ("note", None),
            ]
        );
        assert_eq!(object[1].random.as_ref().map(|r| (r.min, r.max)), Some((1, 100)));
        assert_eq!(object[4].static_value, Some(StaticSpec { value: Value::Null }));
    }

    #[test]
    fn test_static_scalars_and_default_url() {
        let input = json!({"name": "John", "nested": {"id": 7}});
        let config = transform(&input, None, ResponseType::Static);
        let endpoint = &config.endpoints[0];
        assert_eq!(endpoint.url, DEFAULT_URL);

        let object = &endpoint.response.as_ref().unwrap().object;
        assert_eq!(object[0].static_value, Some(StaticSpec { value: json!("John") }));
        assert_eq!(object[1].key, "nested");
        assert_eq!(object[1].object[0].key, "id");
        assert_eq!(object[1].object[0].static_value, Some(StaticSpec { value: json!(7) }));
    }

    #[test]
    fn test_arrays() {
        let input = json!({"tags": ["a", "b"], "empty": []});
        let config = transform(&input, None, ResponseType::Dynamic);
        let object = &config.endpoints[0].response.as_ref().unwrap().object;

        let tags = object[0].array.as_ref().unwrap();
        assert_eq!((tags.min, tags.max), (3, 3));
        assert_eq!(tags.element[0].key, "");
        assert_eq!(tags.element[0].random.as_ref().unwrap().kind, "string-all");

        let empty = object[1].array.as_ref().unwrap();
        assert_eq!((empty.min, empty.max), (0, 0));
        assert_eq!(empty.element.len(), 1);
    }

    #[test]
    fn test_output_compiles() {
        let input = json!({
            "id": 1,
            "user": {"name": "x", "roles": [{"name": "admin", "level": 2}]},
            "empty": []
        });
        let config = transform(&input, Some("/generated"), ResponseType::Dynamic);
        config.validate().unwrap();
        let compiled = Builder::new(".").build_all(&config).unwrap();
        assert!(matches!(compiled[0].handler, Handler::Dynamic(_)));
    }

    #[test]
    fn test_transform_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"a": 1}}"#).unwrap();

        let output = transform_file(file.path(), Some("/a"), "static").unwrap();
        let parsed: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["endpoints"][0]["url"], "/a");
        assert_eq!(parsed["endpoints"][0]["response"]["type"], "dynamic");
        assert_eq!(parsed["endpoints"][0]["response"]["object"][0], json!({"key": "a", "static": {"value": 1}}));

        assert!(matches!(
            transform_file(file.path(), None, "custom"),
            Err(TransformError::InvalidResponseType(_))
        ));
    }
}
