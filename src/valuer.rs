//! Compiled value generators.
//!
//! A [`Valuer`] is a node of an immutable tree built once per endpoint.
//! Evaluating it against a [`RequestContext`] either synthesizes data
//! (static, random, array, object) or extracts it from the inbound
//! request (body, query, url path). A keyed node wraps its value in a
//! single-entry object `{key: value}`.

use crate::error::{GenerateError, SpecError};
use crate::mapped::{BodyMapper, PathMapper, QueryMapper, RequestContext};
use rand::Rng;
use serde_json::{Map, Number, Value};
use std::fmt;
use std::str::FromStr;

const NUMBERS: &[u8] = b"0123456789";
const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const UPPERCASE_NUMBERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const LOWERCASE_NUMBERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ALL: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Arity of a valuer's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationType {
    /// One scalar or one keyed entry
    Single,
    /// A sequence, encoded as a repeated query parameter
    Multi,
    /// An object merged from children
    Complex,
}

/// The kind of value a param describes, used to restrict params per context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Static,
    Array,
    Random,
    Object,
    Mapped,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueType::Static => "static",
            ValueType::Array => "array",
            ValueType::Random => "random",
            ValueType::Object => "object",
            ValueType::Mapped => "mapped",
        })
    }
}

/// Supported random generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RandomKind {
    StringNumeric,
    StringUppercase,
    StringLowercase,
    StringUppercaseNumber,
    StringLowercaseNumber,
    StringAll,
    Integer,
    Float,
    Boolean,
}

impl FromStr for RandomKind {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string-numeric" => Ok(RandomKind::StringNumeric),
            "string-uppercase" => Ok(RandomKind::StringUppercase),
            "string-lowercase" => Ok(RandomKind::StringLowercase),
            "string-uppercase-number" => Ok(RandomKind::StringUppercaseNumber),
            "string-lowercase-number" => Ok(RandomKind::StringLowercaseNumber),
            "string-all" => Ok(RandomKind::StringAll),
            "integer" => Ok(RandomKind::Integer),
            "float" => Ok(RandomKind::Float),
            "boolean" => Ok(RandomKind::Boolean),
            other => Err(SpecError::UnsupportedKind(other.to_string())),
        }
    }
}

impl RandomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RandomKind::StringNumeric => "string-numeric",
            RandomKind::StringUppercase => "string-uppercase",
            RandomKind::StringLowercase => "string-lowercase",
            RandomKind::StringUppercaseNumber => "string-uppercase-number",
            RandomKind::StringLowercaseNumber => "string-lowercase-number",
            RandomKind::StringAll => "string-all",
            RandomKind::Integer => "integer",
            RandomKind::Float => "float",
            RandomKind::Boolean => "boolean",
        }
    }

    /// Alphabet for string kinds, `None` for the scalar kinds.
    fn alphabet(&self) -> Option<&'static [u8]> {
        match self {
            RandomKind::StringNumeric => Some(NUMBERS),
            RandomKind::StringUppercase => Some(UPPERCASE),
            RandomKind::StringLowercase => Some(LOWERCASE),
            RandomKind::StringUppercaseNumber => Some(UPPERCASE_NUMBERS),
            RandomKind::StringLowercaseNumber => Some(LOWERCASE_NUMBERS),
            RandomKind::StringAll => Some(ALL),
            RandomKind::Integer | RandomKind::Float | RandomKind::Boolean => None,
        }
    }
}

/// A compiled node: an optional output key plus the generator itself.
#[derive(Debug)]
pub struct Valuer {
    key: Option<String>,
    kind: ValuerKind,
}

/// The closed set of generators.
#[derive(Debug)]
pub enum ValuerKind {
    Static(Value),
    Random(RandomValuer),
    Array(ArrayValuer),
    Object(ObjectValuer),
    Body(BodyMapper),
    Query(QueryMapper),
    Path(PathMapper),
}

impl Valuer {
    /// An empty key leaves the value unwrapped.
    pub fn new(key: &str, kind: ValuerKind) -> Self {
        let key = (!key.is_empty()).then(|| key.to_string());
        Self { key, kind }
    }

    pub fn fixed(key: &str, value: Value) -> Self {
        Self::new(key, ValuerKind::Static(value))
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn kind(&self) -> &ValuerKind {
        &self.kind
    }

    pub fn generation_type(&self) -> GenerationType {
        match self.kind {
            ValuerKind::Array(_) => GenerationType::Multi,
            ValuerKind::Object(_) => GenerationType::Complex,
            ValuerKind::Static(_)
            | ValuerKind::Random(_)
            | ValuerKind::Body(_)
            | ValuerKind::Query(_)
            | ValuerKind::Path(_) => GenerationType::Single,
        }
    }

    /// Whether this node would contribute no output.
    pub fn is_nil(&self) -> bool {
        match &self.kind {
            ValuerKind::Array(array) => array.element.is_nil(),
            ValuerKind::Object(object) => object.children.iter().all(Valuer::is_nil),
            _ => false,
        }
    }

    /// Evaluate the node against a request.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        ctx: &RequestContext,
        rng: &mut R,
    ) -> Result<Value, GenerateError> {
        let value = match &self.kind {
            ValuerKind::Static(value) => value.clone(),
            ValuerKind::Random(random) => random.generate(rng),
            ValuerKind::Array(array) => array.generate(ctx, rng)?,
            ValuerKind::Object(object) => object.generate(ctx, rng)?,
            ValuerKind::Body(mapper) => mapper.extract(ctx)?,
            ValuerKind::Query(mapper) => mapper.extract(ctx)?,
            ValuerKind::Path(mapper) => mapper.extract(ctx)?,
        };

        Ok(match &self.key {
            Some(key) => {
                let mut entry = Map::with_capacity(1);
                entry.insert(key.clone(), value);
                Value::Object(entry)
            }
            None => value,
        })
    }
}

/// Nil check that also answers for an absent node.
pub fn is_nil(valuer: Option<&Valuer>) -> bool {
    valuer.map_or(true, Valuer::is_nil)
}

/// Draw a length in `[min, max]`, fixed when both bounds are equal.
fn draw_length<R: Rng + ?Sized>(min: usize, max: usize, rng: &mut R) -> usize {
    if min == max {
        min
    } else {
        rng.gen_range(min..=max)
    }
}

fn non_negative(what: &'static str, min: i64, max: i64) -> Result<(usize, usize), SpecError> {
    if min < 0 || max < min {
        return Err(SpecError::InvalidRange { what, min, max });
    }
    Ok((min as usize, max as usize))
}

#[derive(Debug)]
pub struct RandomValuer {
    kind: RandomKind,
    min: i64,
    max: i64,
}

impl RandomValuer {
    pub fn new(kind: RandomKind, min: i64, max: i64) -> Result<Self, SpecError> {
        match kind {
            RandomKind::Boolean => {}
            RandomKind::Integer | RandomKind::Float => {
                if max < min {
                    return Err(SpecError::InvalidRange { what: kind.as_str(), min, max });
                }
            }
            _ => {
                non_negative(kind.as_str(), min, max)?;
            }
        }
        Ok(Self { kind, min, max })
    }

    pub fn kind(&self) -> RandomKind {
        self.kind
    }

    fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Value {
        if let Some(alphabet) = self.kind.alphabet() {
            let length = draw_length(self.min as usize, self.max as usize, rng);
            let text: String = (0..length)
                .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
                .collect();
            return Value::String(text);
        }

        match self.kind {
            RandomKind::Integer => Value::Number(Number::from(rng.gen_range(self.min..=self.max))),
            RandomKind::Float => {
                let (min, max) = (self.min as f64, self.max as f64);
                let value = if min == max { min } else { rng.gen_range(min..max) };
                Number::from_f64(value).map_or(Value::Null, Value::Number)
            }
            _ => Value::Bool(rng.gen_bool(0.5)),
        }
    }
}

#[derive(Debug)]
pub struct ArrayValuer {
    min: usize,
    max: usize,
    element: Box<Valuer>,
}

impl ArrayValuer {
    pub fn new(min: i64, max: i64, element: Valuer) -> Result<Self, SpecError> {
        let (min, max) = non_negative("array length", min, max)?;
        Ok(Self {
            min,
            max,
            element: Box::new(element),
        })
    }

    fn generate<R: Rng + ?Sized>(
        &self,
        ctx: &RequestContext,
        rng: &mut R,
    ) -> Result<Value, GenerateError> {
        let length = draw_length(self.min, self.max, rng);
        let values = (0..length)
            .map(|_| self.element.generate(ctx, rng))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Array(values))
    }
}

#[derive(Debug)]
pub struct ObjectValuer {
    children: Vec<Valuer>,
}

impl ObjectValuer {
    /// Every child must be keyed, otherwise its output could not be merged.
    pub fn new(children: Vec<Valuer>) -> Result<Self, SpecError> {
        if let Some(child) = children.iter().find(|c| c.key.is_none()) {
            return Err(SpecError::UnkeyedChild {
                details: format!("{:?}", child.kind),
            });
        }
        Ok(Self { children })
    }

    fn generate<R: Rng + ?Sized>(
        &self,
        ctx: &RequestContext,
        rng: &mut R,
    ) -> Result<Value, GenerateError> {
        let mut merged = Map::new();
        for child in &self.children {
            // children are keyed, so the result is always an object; later keys win
            if let Value::Object(entries) = child.generate(ctx, rng)? {
                merged.extend(entries);
            }
        }
        Ok(Value::Object(merged))
    }
}
