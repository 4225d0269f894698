//! Structural contracts for device answers.
//!
//! A small subset of JSON Schema, enough to describe what the supported
//! firmwares send. Object properties are required unless declared optional
//! and strings must contain a non-whitespace character unless declared
//! blank-allowed.

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

/// A value that failed validation, with the JSON pointer to it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at '{path}'")]
pub struct SchemaError {
    pub path: String,
    pub message: String,
}

#[derive(Debug)]
pub enum Schema {
    Any,
    Null,
    Integer,
    Number,
    /// Non-negative number of seconds since the epoch.
    Timestamp,
    Str { blank: bool },
    OneOf(&'static [&'static str]),
    Array(ArraySchema),
    Object(ObjectSchema),
}

#[derive(Debug)]
pub struct ArraySchema {
    items: Items,
    min: Option<usize>,
    max: Option<usize>,
}

#[derive(Debug)]
enum Items {
    Each(Box<Schema>),
    Tuple(Vec<Schema>),
}

#[derive(Debug, Default)]
pub struct ObjectSchema {
    properties: Vec<Property>,
    patterns: Vec<(Regex, Schema)>,
    closed: bool,
}

#[derive(Debug)]
struct Property {
    name: &'static str,
    schema: Schema,
    required: bool,
}

impl Schema {
    pub fn string() -> Self {
        Schema::Str { blank: false }
    }

    pub fn blank_string() -> Self {
        Schema::Str { blank: true }
    }

    pub fn array(items: Schema) -> ArraySchema {
        ArraySchema {
            items: Items::Each(Box::new(items)),
            min: None,
            max: None,
        }
    }

    /// An array whose n-th element must match the n-th schema.
    pub fn tuple(items: Vec<Schema>) -> ArraySchema {
        ArraySchema {
            items: Items::Tuple(items),
            min: None,
            max: None,
        }
    }

    pub fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        self.check(value, &mut String::new())
    }

    fn check(&self, value: &Value, path: &mut String) -> Result<(), SchemaError> {
        let fail = |path: &String, message: String| {
            Err(SchemaError {
                path: if path.is_empty() { "/".into() } else { path.clone() },
                message,
            })
        };

        match self {
            Schema::Any => Ok(()),
            Schema::Null if value.is_null() => Ok(()),
            Schema::Null => fail(path, format!("{} is not null", value)),
            Schema::Integer if value.is_i64() || value.is_u64() => Ok(()),
            Schema::Integer => fail(path, format!("{} is not an integer", value)),
            Schema::Number if value.is_number() => Ok(()),
            Schema::Number => fail(path, format!("{} is not a number", value)),
            Schema::Timestamp => match value.as_f64() {
                Some(t) if t >= 0.0 => Ok(()),
                _ => fail(path, format!("{} is not a timestamp", value)),
            },
            Schema::Str { blank } => match value.as_str() {
                Some(s) if *blank || !s.trim().is_empty() => Ok(()),
                Some(_) => fail(path, "blank string".into()),
                None => fail(path, format!("{} is not a string", value)),
            },
            Schema::OneOf(choices) => match value.as_str() {
                Some(s) if choices.contains(&s) => Ok(()),
                _ => fail(path, format!("{} is not one of {:?}", value, choices)),
            },
            Schema::Array(array) => {
                let Some(items) = value.as_array() else {
                    return fail(path, format!("{} is not an array", value));
                };
                if let Some(min) = array.min.filter(|&m| items.len() < m) {
                    return fail(path, format!("expected at least {} items, got {}", min, items.len()));
                }
                if let Some(max) = array.max.filter(|&m| items.len() > m) {
                    return fail(path, format!("expected at most {} items, got {}", max, items.len()));
                }
                for (i, item) in items.iter().enumerate() {
                    let schema = match &array.items {
                        Items::Each(schema) => Some(schema.as_ref()),
                        Items::Tuple(schemas) => schemas.get(i),
                    };
                    if let Some(schema) = schema {
                        descend(path, &i.to_string(), |path| schema.check(item, path))?;
                    }
                }
                Ok(())
            }
            Schema::Object(object) => {
                let Some(map) = value.as_object() else {
                    return fail(path, format!("{} is not an object", value));
                };
                for property in &object.properties {
                    match map.get(property.name) {
                        Some(v) => descend(path, property.name, |path| property.schema.check(v, path))?,
                        None if property.required => {
                            return fail(path, format!("'{}' is a required property", property.name));
                        }
                        None => {}
                    }
                }
                for (key, v) in map {
                    let mut known = object.properties.iter().any(|p| p.name == key.as_str());
                    for (pattern, schema) in &object.patterns {
                        if pattern.is_match(key) {
                            known = true;
                            descend(path, key, |path| schema.check(v, path))?;
                        }
                    }
                    if object.closed && !known {
                        return fail(path, format!("additional property '{}' is not allowed", key));
                    }
                }
                Ok(())
            }
        }
    }
}

fn descend<F>(path: &mut String, segment: &str, f: F) -> Result<(), SchemaError>
where
    F: FnOnce(&mut String) -> Result<(), SchemaError>,
{
    let len = path.len();
    path.push('/');
    path.push_str(segment);
    let result = f(path);
    path.truncate(len);
    result
}

impl ArraySchema {
    pub fn min_items(mut self, n: usize) -> Self {
        self.min = Some(n);
        self
    }

    pub fn max_items(mut self, n: usize) -> Self {
        self.max = Some(n);
        self
    }

    pub fn exactly(self, n: usize) -> Self {
        self.min_items(n).max_items(n)
    }
}

impl From<ArraySchema> for Schema {
    fn from(array: ArraySchema) -> Self {
        Schema::Array(array)
    }
}

impl ObjectSchema {
    /// An object that accepts properties beyond the declared ones.
    pub fn open() -> Self {
        Self::default()
    }

    /// An object that rejects undeclared properties.
    pub fn closed() -> Self {
        Self {
            closed: true,
            ..Self::default()
        }
    }

    pub fn field(mut self, name: &'static str, schema: impl Into<Schema>) -> Self {
        self.properties.push(Property {
            name,
            schema: schema.into(),
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: &'static str, schema: impl Into<Schema>) -> Self {
        self.properties.push(Property {
            name,
            schema: schema.into(),
            required: false,
        });
        self
    }

    /// Every property whose name matches `pattern` must match `schema`.
    ///
    /// Panics if `pattern` is not a valid regex; patterns are literals.
    pub fn pattern(mut self, pattern: &str, schema: impl Into<Schema>) -> Self {
        let regex = Regex::new(pattern).expect("schema pattern must be a valid regex");
        self.patterns.push((regex, schema.into()));
        self
    }
}

impl From<ObjectSchema> for Schema {
    fn from(object: ObjectSchema) -> Self {
        Schema::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    fn status() -> Schema {
        ObjectSchema::open()
            .field("STATUS", Schema::OneOf(&["W", "I", "S", "E", "F"]))
            .field("When", Schema::Timestamp)
            .field("Msg", Schema::string())
            .optional("Description", Schema::blank_string())
            .into()
    }

    #[test_case(json!({"STATUS": "S", "When": 1528285520, "Msg": "Summary"}); "minimal")]
    #[test_case(json!({"STATUS": "S", "When": 0, "Msg": "x", "Description": ""}); "blank optional")]
    #[test_case(json!({"STATUS": "S", "When": 1, "Msg": "x", "Extra": [1]}); "open object")]
    fn accepts(value: Value) {
        assert_eq!(status().validate(&value), Ok(()));
    }

    #[test_case(json!({"STATUS": "Q", "When": 1, "Msg": "x"}), "/STATUS"; "bad enum")]
    #[test_case(json!({"STATUS": "S", "When": -1, "Msg": "x"}), "/When"; "negative timestamp")]
    #[test_case(json!({"STATUS": "S", "When": 1, "Msg": "  "}), "/Msg"; "blank required string")]
    #[test_case(json!({"STATUS": "S", "When": 1}), "/"; "missing property")]
    #[test_case(json!([]), "/"; "not an object")]
    fn rejects(value: Value, path: &str) {
        assert_eq!(status().validate(&value).unwrap_err().path, path);
    }

    #[test]
    fn closed_objects_reject_unknown_keys() {
        let schema: Schema = ObjectSchema::closed().field("id", Schema::Integer).into();
        assert!(schema.validate(&json!({"id": 0})).is_ok());
        let err = schema.validate(&json!({"id": 0, "error": null})).unwrap_err();
        assert!(err.message.contains("'error'"));
    }

    #[test]
    fn patterns_cover_dynamic_keys() {
        let schema: Schema = ObjectSchema::closed()
            .pattern("^temp[0-9]+$", Schema::Integer)
            .into();
        assert!(schema.validate(&json!({"temp1": 60, "temp12": 61})).is_ok());
        assert_eq!(schema.validate(&json!({"temp3": "hot"})).unwrap_err().path, "/temp3");
        assert!(schema.validate(&json!({"fan1": 1})).is_err());
    }

    #[test]
    fn array_bounds_and_tuples() {
        let exact: Schema = Schema::array(Schema::string()).exactly(2).into();
        assert!(exact.validate(&json!(["a", "b"])).is_ok());
        assert!(exact.validate(&json!(["a"])).is_err());
        assert_eq!(exact.validate(&json!(["a", ""])).unwrap_err().path, "/1");

        let tuple: Schema = Schema::tuple(vec![Schema::Integer, Schema::Null]).into();
        assert!(tuple.validate(&json!([1, null])).is_ok());
        assert_eq!(tuple.validate(&json!([1, 2])).unwrap_err().path, "/1");
    }
}
