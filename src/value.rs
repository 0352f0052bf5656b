//! Output value model: the tri-state field states assembled by a parse.
//!
//! `Unset` means the field was never seen, `Invalid` means it was seen but
//! its text does not (yet) coerce to the declared scalar type, `Valid`
//! carries the coerced value. The distinction between "not yet seen" and
//! "seen and empty" is deliberate and load-bearing for incremental UIs.

use serde_json::Value as Json;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldState {
    #[default]
    Unset,
    Invalid {
        raw: String,
        reason: String,
    },
    Valid(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// The matched enum variant literal.
    Enum(String),
    Object(ObjectValue),
    List(Vec<FieldState>),
    Union(UnionValue),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectValue {
    pub type_name: String,
    /// Declaration-ordered; every declared field is present, `Unset` when
    /// the input never produced it.
    pub fields: Vec<(String, FieldState)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnionValue {
    /// Tag of the committed alternative.
    pub tag: String,
    pub value: Box<FieldState>,
}

/// Result of one parse call. For partial parses `open_path` marks the
/// deepest construct that was still open when the input ran out
/// (e.g. `movies[1].director`); `None` for a fully closed document and in
/// Final mode.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    pub value: FieldState,
    pub open_path: Option<String>,
}

impl Parsed {
    /// The root object, when the root finalized at all.
    pub fn root(&self) -> Option<&ObjectValue> {
        self.value.as_object()
    }
}

static UNSET: FieldState = FieldState::Unset;

impl FieldState {
    pub fn is_set(&self) -> bool {
        !matches!(self, FieldState::Unset)
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, FieldState::Valid(_))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldState::Valid(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    pub fn as_int(&self) -> Option<i64> {
        self.as_value().and_then(Value::as_int)
    }

    pub fn as_float(&self) -> Option<f64> {
        self.as_value().and_then(Value::as_float)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_value().and_then(Value::as_bool)
    }

    pub fn as_object(&self) -> Option<&ObjectValue> {
        self.as_value().and_then(Value::as_object)
    }

    pub fn as_list(&self) -> Option<&[FieldState]> {
        self.as_value().and_then(Value::as_list)
    }

    pub fn as_union(&self) -> Option<&UnionValue> {
        self.as_value().and_then(Value::as_union)
    }

    /// Lossy interop view: `Unset` and `Invalid` map to JSON null.
    pub fn to_json(&self) -> Json {
        match self {
            FieldState::Unset | FieldState::Invalid { .. } => Json::Null,
            FieldState::Valid(v) => v.to_json(),
        }
    }
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectValue> {
        match self {
            Value::Object(o) => Some(o),
            Value::Union(u) => u.value.as_object(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldState]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_union(&self) -> Option<&UnionValue> {
        match self {
            Value::Union(u) => Some(u),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Value::String(s) | Value::Enum(s) => Json::String(s.clone()),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Bool(b) => Json::Bool(*b),
            Value::Object(o) => {
                let mut map = serde_json::Map::new();
                for (tag, state) in &o.fields {
                    map.insert(tag.clone(), state.to_json());
                }
                Json::Object(map)
            }
            Value::List(items) => Json::Array(items.iter().map(FieldState::to_json).collect()),
            Value::Union(u) => u.value.to_json(),
        }
    }
}

impl ObjectValue {
    /// Look a field up by tag; undeclared tags read as `Unset`.
    pub fn get(&self, tag: &str) -> &FieldState {
        self.fields
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, s)| s)
            .unwrap_or(&UNSET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ObjectValue {
        ObjectValue {
            type_name: "Movie".to_string(),
            fields: vec![
                (
                    "title".to_string(),
                    FieldState::Valid(Value::String("Avatar".to_string())),
                ),
                (
                    "year".to_string(),
                    FieldState::Invalid {
                        raw: "198x".to_string(),
                        reason: "expected an integer, got \"198x\"".to_string(),
                    },
                ),
                ("director".to_string(), FieldState::Unset),
            ],
        }
    }

    #[test]
    fn test_tri_state_accessors() {
        let obj = sample();
        assert_eq!(obj.get("title").as_str(), Some("Avatar"));
        assert!(obj.get("year").is_set());
        assert!(!obj.get("year").is_valid());
        assert!(!obj.get("director").is_set());
        assert!(!obj.get("nope").is_set());
    }

    #[test]
    fn test_to_json() {
        let state = FieldState::Valid(Value::Object(sample()));
        let json = state.to_json();
        assert_eq!(json["title"], Json::String("Avatar".to_string()));
        assert_eq!(json["year"], Json::Null);
        assert_eq!(json["director"], Json::Null);
    }

    #[test]
    fn test_union_flattens_in_json() {
        let state = FieldState::Valid(Value::Union(UnionValue {
            tag: "create_action".to_string(),
            value: Box::new(FieldState::Valid(Value::String("x".to_string()))),
        }));
        assert_eq!(state.to_json(), Json::String("x".to_string()));
    }

    #[test]
    fn test_float_json() {
        assert_eq!(Value::Float(0.5).to_json(), serde_json::json!(0.5));
        assert_eq!(Value::Float(f64::NAN).to_json(), Json::Null);
    }
}
