//! Avro JSON encoding of decoded values.
//!
//! Follows the Avro JSON encoding, so the text can be read back with the same
//! schema:
//!
//! - a non-null union branch is wrapped as `{"<branch type>": value}`, with
//!   named branches keyed by their full name
//! - `bytes` and `fixed` are strings with one code point per byte
//! - enums are their symbol

use crate::error::{KafkaTypesError, Result};
use apache_avro::schema::{Name, NamesRef, ResolvedSchema};
use apache_avro::types::Value;
use apache_avro::{Decimal, Schema};
use serde_json::{Map, Number, Value as JsonValue};

/// Render `value` as Avro JSON under its writer `schema`.
pub fn to_avro_json(value: &Value, schema: &Schema) -> Result<JsonValue> {
    let resolved = ResolvedSchema::try_from(schema)
        .map_err(|e| KafkaTypesError::Textual(format!("unresolvable schema: {e}")))?;

    Renderer {
        names: resolved.get_names(),
    }
    .render(value, schema)
}

struct Renderer<'a, 's> {
    names: &'a NamesRef<'s>,
}

impl Renderer<'_, '_> {
    fn render(&self, value: &Value, schema: &Schema) -> Result<JsonValue> {
        let schema = self.lookup(schema)?;

        match (value, schema) {
            (Value::Union(index, inner), Schema::Union(union)) => {
                let branch = union.variants().get(*index as usize).ok_or_else(|| {
                    mismatch(format!("union has no branch at index {index}"))
                })?;
                let branch = self.lookup(branch)?;

                if matches!(branch, Schema::Null) {
                    return Ok(JsonValue::Null);
                }

                let mut wrapped = Map::new();
                wrapped.insert(branch_name(branch), self.render(inner, branch)?);
                Ok(JsonValue::Object(wrapped))
            }
            (Value::Record(fields), Schema::Record(record)) => {
                let mut object = Map::new();
                for (name, field) in fields {
                    let field_schema = record
                        .fields
                        .iter()
                        .find(|f| &f.name == name)
                        .map(|f| &f.schema)
                        .ok_or_else(|| mismatch(format!("no field {name} in {}", record.name)))?;
                    object.insert(name.clone(), self.render(field, field_schema)?);
                }
                Ok(JsonValue::Object(object))
            }
            (Value::Array(items), Schema::Array(array)) => items
                .iter()
                .map(|item| self.render(item, &array.items))
                .collect::<Result<Vec<_>>>()
                .map(JsonValue::Array),
            (Value::Map(entries), Schema::Map(map)) => {
                // Sorted for stable output
                let mut keys: Vec<_> = entries.keys().collect();
                keys.sort();

                let mut object = Map::new();
                for key in keys {
                    object.insert(key.clone(), self.render(&entries[key], &map.types)?);
                }
                Ok(JsonValue::Object(object))
            }
            (Value::Bytes(bytes), _) | (Value::Fixed(_, bytes), _) => Ok(byte_string(bytes)),
            (Value::Decimal(decimal), _) => decimal_bytes(decimal).map(|b| byte_string(&b)),
            (Value::Duration(duration), _) => Ok(byte_string(&<[u8; 12]>::from(*duration))),
            (Value::Union(..), _)
            | (Value::Record(_), _)
            | (Value::Array(_), _)
            | (Value::Map(_), _) => Err(mismatch(format!("value {value:?} under {schema:?}"))),
            (scalar, _) => scalar_json(scalar),
        }
    }

    fn lookup<'a>(&'a self, schema: &'a Schema) -> Result<&'a Schema> {
        match schema {
            Schema::Ref { name } => self
                .names
                .get(name)
                .copied()
                .ok_or_else(|| mismatch(format!("unknown type {}", fullname(name)))),
            other => Ok(other),
        }
    }
}

/// Key of a union branch in Avro JSON.
fn branch_name(schema: &Schema) -> String {
    let name = match schema {
        Schema::Record(record) => return fullname(&record.name),
        Schema::Enum(enum_schema) => return fullname(&enum_schema.name),
        Schema::Fixed(fixed) => return fullname(&fixed.name),
        Schema::Ref { name } => return fullname(name),
        Schema::Decimal(decimal) => {
            return format!("{}.decimal", branch_name(&decimal.inner));
        }
        Schema::Null => "null",
        Schema::Boolean => "boolean",
        Schema::Int => "int",
        Schema::Long => "long",
        Schema::Float => "float",
        Schema::Double => "double",
        Schema::Bytes => "bytes",
        Schema::String => "string",
        Schema::Array(_) => "array",
        Schema::Map(_) => "map",
        Schema::Union(_) => "union",
        Schema::BigDecimal => "bytes.big-decimal",
        Schema::Uuid => "string.uuid",
        Schema::Date => "int.date",
        Schema::TimeMillis => "int.time-millis",
        Schema::TimeMicros => "long.time-micros",
        Schema::TimestampMillis => "long.timestamp-millis",
        Schema::TimestampMicros => "long.timestamp-micros",
        Schema::TimestampNanos => "long.timestamp-nanos",
        Schema::LocalTimestampMillis => "long.local-timestamp-millis",
        Schema::LocalTimestampMicros => "long.local-timestamp-micros",
        Schema::LocalTimestampNanos => "long.local-timestamp-nanos",
        Schema::Duration => "fixed.duration",
    };
    name.to_string()
}

fn fullname(name: &Name) -> String {
    name.fullname(None)
}

/// Bytes as a JSON string, each byte mapped to the code point of equal value.
fn byte_string(bytes: &[u8]) -> JsonValue {
    JsonValue::String(bytes.iter().map(|&b| char::from(b)).collect())
}

fn decimal_bytes(decimal: &Decimal) -> Result<Vec<u8>> {
    Vec::<u8>::try_from(decimal).map_err(|e| KafkaTypesError::Textual(e.to_string()))
}

fn scalar_json(value: &Value) -> Result<JsonValue> {
    match value {
        Value::Enum(_, symbol) => Ok(JsonValue::String(symbol.clone())),
        Value::Float(f) => float_json(f64::from(*f)),
        Value::Double(d) => float_json(*d),
        other => JsonValue::try_from(other.clone())
            .map_err(|e| KafkaTypesError::Textual(e.to_string())),
    }
}

fn float_json(value: f64) -> Result<JsonValue> {
    Number::from_f64(value)
        .map(JsonValue::Number)
        .ok_or_else(|| KafkaTypesError::Textual(format!("{value} has no JSON form")))
}

fn mismatch(detail: String) -> KafkaTypesError {
    KafkaTypesError::Textual(format!("value does not match schema: {detail}"))
}
