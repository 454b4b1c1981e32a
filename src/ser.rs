//! A `serde` serializer that builds [`Record`]s directly.
//!
//! Scalars keep their SQL type instead of passing through JSON. Fields wrapped by the
//! helpers in [`crate::typed`] reach the serializer as marker newtypes and come out as
//! dates, timestamps, UUIDs or decimals. Nested sequences and maps are handed to
//! `serde_json` and become [`Value::Json`].

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::ser::{self, Impossible, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{PgKitError, PgKitResult};
use crate::schema::parse_datetime;
use crate::value::{Record, Value};

pub(crate) const DATE: &str = "$pgkit::Date";
pub(crate) const DATETIME: &str = "$pgkit::DateTime";
pub(crate) const UUID: &str = "$pgkit::Uuid";
pub(crate) const DECIMAL: &str = "$pgkit::Decimal";

pub(crate) fn to_record<T: Serialize + ?Sized>(value: &T) -> PgKitResult<Record> {
    value.serialize(RecordSerializer)
}

fn to_value<T: Serialize + ?Sized>(value: &T) -> PgKitResult<Value> {
    value.serialize(ValueSerializer)
}

/// Parse the inner text of a marker newtype into its typed value.
fn typed<T: Serialize + ?Sized>(marker: &'static str, inner: &T) -> PgKitResult<Value> {
    let text = match to_value(inner)? {
        Value::Null => return Ok(Value::Null),
        other => other.to_string(),
    };
    let parsed = match marker {
        DATE => NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
            .ok()
            .map(Value::Date),
        DATETIME => parse_datetime(&text).map(Value::DateTime),
        UUID => Uuid::parse_str(text.trim()).ok().map(Value::Uuid),
        DECIMAL => Decimal::from_str(text.trim())
            .or_else(|_| Decimal::from_scientific(text.trim()))
            .ok()
            .map(Value::Decimal),
        _ => None,
    };
    parsed.ok_or_else(|| {
        PgKitError::InvalidParameters(format!(
            "'{}' is not a valid {}",
            text,
            marker.trim_start_matches("$pgkit::").to_ascii_lowercase()
        ))
    })
}

fn not_a_record(kind: &str) -> PgKitError {
    PgKitError::InvalidParameters(format!("expected a struct or map, got {}", kind))
}

use serde_json::value::Serializer as Json;

/// Top level: only structs and maps become records.
struct RecordSerializer;

impl ser::Serializer for RecordSerializer {
    type Ok = Record;
    type Error = PgKitError;
    type SerializeSeq = Impossible<Record, PgKitError>;
    type SerializeTuple = Impossible<Record, PgKitError>;
    type SerializeTupleStruct = Impossible<Record, PgKitError>;
    type SerializeTupleVariant = Impossible<Record, PgKitError>;
    type SerializeMap = RecordBuilder;
    type SerializeStruct = RecordBuilder;
    type SerializeStructVariant = Impossible<Record, PgKitError>;

    fn serialize_bool(self, _: bool) -> PgKitResult<Record> {
        Err(not_a_record("a boolean"))
    }

    fn serialize_i8(self, _: i8) -> PgKitResult<Record> {
        Err(not_a_record("a number"))
    }

    fn serialize_i16(self, _: i16) -> PgKitResult<Record> {
        Err(not_a_record("a number"))
    }

    fn serialize_i32(self, _: i32) -> PgKitResult<Record> {
        Err(not_a_record("a number"))
    }

    fn serialize_i64(self, _: i64) -> PgKitResult<Record> {
        Err(not_a_record("a number"))
    }

    fn serialize_u8(self, _: u8) -> PgKitResult<Record> {
        Err(not_a_record("a number"))
    }

    fn serialize_u16(self, _: u16) -> PgKitResult<Record> {
        Err(not_a_record("a number"))
    }

    fn serialize_u32(self, _: u32) -> PgKitResult<Record> {
        Err(not_a_record("a number"))
    }

    fn serialize_u64(self, _: u64) -> PgKitResult<Record> {
        Err(not_a_record("a number"))
    }

    fn serialize_f32(self, _: f32) -> PgKitResult<Record> {
        Err(not_a_record("a number"))
    }

    fn serialize_f64(self, _: f64) -> PgKitResult<Record> {
        Err(not_a_record("a number"))
    }

    fn serialize_char(self, _: char) -> PgKitResult<Record> {
        Err(not_a_record("a string"))
    }

    fn serialize_str(self, _: &str) -> PgKitResult<Record> {
        Err(not_a_record("a string"))
    }

    fn serialize_bytes(self, _: &[u8]) -> PgKitResult<Record> {
        Err(not_a_record("bytes"))
    }

    fn serialize_none(self) -> PgKitResult<Record> {
        Err(not_a_record("null"))
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> PgKitResult<Record> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> PgKitResult<Record> {
        Err(not_a_record("null"))
    }

    fn serialize_unit_struct(self, _: &'static str) -> PgKitResult<Record> {
        Err(not_a_record("a unit struct"))
    }

    fn serialize_unit_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
    ) -> PgKitResult<Record> {
        Err(not_a_record("an enum variant"))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        value: &T,
    ) -> PgKitResult<Record> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: &T,
    ) -> PgKitResult<Record> {
        Err(not_a_record("an enum variant"))
    }

    fn serialize_seq(self, _: Option<usize>) -> PgKitResult<Self::SerializeSeq> {
        Err(not_a_record("an array"))
    }

    fn serialize_tuple(self, _: usize) -> PgKitResult<Self::SerializeTuple> {
        Err(not_a_record("an array"))
    }

    fn serialize_tuple_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> PgKitResult<Self::SerializeTupleStruct> {
        Err(not_a_record("an array"))
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> PgKitResult<Self::SerializeTupleVariant> {
        Err(not_a_record("an enum variant"))
    }

    fn serialize_map(self, _: Option<usize>) -> PgKitResult<RecordBuilder> {
        Ok(RecordBuilder::default())
    }

    fn serialize_struct(self, _: &'static str, _: usize) -> PgKitResult<RecordBuilder> {
        Ok(RecordBuilder::default())
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> PgKitResult<Self::SerializeStructVariant> {
        Err(not_a_record("an enum variant"))
    }
}

#[derive(Default)]
struct RecordBuilder {
    record: Record,
    key: Option<String>,
}

impl ser::SerializeStruct for RecordBuilder {
    type Ok = Record;
    type Error = PgKitError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> PgKitResult<()> {
        self.record.set(key, to_value(value)?);
        Ok(())
    }

    fn end(self) -> PgKitResult<Record> {
        Ok(self.record)
    }
}

impl ser::SerializeMap for RecordBuilder {
    type Ok = Record;
    type Error = PgKitError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> PgKitResult<()> {
        self.key = Some(match to_value(key)? {
            Value::Text(name) => name,
            other => other.to_string(),
        });
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> PgKitResult<()> {
        let key = self.key.take().ok_or_else(|| {
            PgKitError::InvalidParameters("map value serialized without a key".into())
        })?;
        self.record.set(key, to_value(value)?);
        Ok(())
    }

    fn end(self) -> PgKitResult<Record> {
        Ok(self.record)
    }
}

/// One field value.
struct ValueSerializer;

impl ser::Serializer for ValueSerializer {
    type Ok = Value;
    type Error = PgKitError;
    type SerializeSeq = JsonCompound<<Json as ser::Serializer>::SerializeSeq>;
    type SerializeTuple = JsonCompound<<Json as ser::Serializer>::SerializeTuple>;
    type SerializeTupleStruct = JsonCompound<<Json as ser::Serializer>::SerializeTupleStruct>;
    type SerializeTupleVariant = JsonCompound<<Json as ser::Serializer>::SerializeTupleVariant>;
    type SerializeMap = JsonCompound<<Json as ser::Serializer>::SerializeMap>;
    type SerializeStruct = JsonCompound<<Json as ser::Serializer>::SerializeStruct>;
    type SerializeStructVariant = JsonCompound<<Json as ser::Serializer>::SerializeStructVariant>;

    fn serialize_bool(self, v: bool) -> PgKitResult<Value> {
        Ok(Value::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> PgKitResult<Value> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_i16(self, v: i16) -> PgKitResult<Value> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_i32(self, v: i32) -> PgKitResult<Value> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_i64(self, v: i64) -> PgKitResult<Value> {
        Ok(Value::Int(v))
    }

    fn serialize_u8(self, v: u8) -> PgKitResult<Value> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_u16(self, v: u16) -> PgKitResult<Value> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_u32(self, v: u32) -> PgKitResult<Value> {
        Ok(Value::Int(v.into()))
    }

    fn serialize_u64(self, v: u64) -> PgKitResult<Value> {
        i64::try_from(v).map(Value::Int).map_err(|_| {
            PgKitError::InvalidParameters(format!("{} does not fit in a BIGINT", v))
        })
    }

    fn serialize_f32(self, v: f32) -> PgKitResult<Value> {
        Ok(Value::Float(v.into()))
    }

    fn serialize_f64(self, v: f64) -> PgKitResult<Value> {
        Ok(Value::Float(v))
    }

    fn serialize_char(self, v: char) -> PgKitResult<Value> {
        Ok(Value::Text(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> PgKitResult<Value> {
        Ok(Value::Text(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> PgKitResult<Value> {
        Ok(Value::Json(ser::Serializer::serialize_bytes(Json, v)?))
    }

    fn serialize_none(self) -> PgKitResult<Value> {
        Ok(Value::Null)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> PgKitResult<Value> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> PgKitResult<Value> {
        Ok(Value::Null)
    }

    fn serialize_unit_struct(self, _: &'static str) -> PgKitResult<Value> {
        Ok(Value::Null)
    }

    fn serialize_unit_variant(
        self,
        _: &'static str,
        _: u32,
        variant: &'static str,
    ) -> PgKitResult<Value> {
        Ok(Value::Text(variant.to_string()))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        name: &'static str,
        value: &T,
    ) -> PgKitResult<Value> {
        match name {
            DATE | DATETIME | UUID | DECIMAL => typed(name, value),
            _ => value.serialize(self),
        }
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        name: &'static str,
        index: u32,
        variant: &'static str,
        value: &T,
    ) -> PgKitResult<Value> {
        let json = ser::Serializer::serialize_newtype_variant(Json, name, index, variant, value)?;
        Ok(Value::Json(json))
    }

    fn serialize_seq(self, len: Option<usize>) -> PgKitResult<Self::SerializeSeq> {
        Ok(JsonCompound(ser::Serializer::serialize_seq(Json, len)?))
    }

    fn serialize_tuple(self, len: usize) -> PgKitResult<Self::SerializeTuple> {
        Ok(JsonCompound(ser::Serializer::serialize_tuple(Json, len)?))
    }

    fn serialize_tuple_struct(
        self,
        name: &'static str,
        len: usize,
    ) -> PgKitResult<Self::SerializeTupleStruct> {
        Ok(JsonCompound(ser::Serializer::serialize_tuple_struct(
            Json, name, len,
        )?))
    }

    fn serialize_tuple_variant(
        self,
        name: &'static str,
        index: u32,
        variant: &'static str,
        len: usize,
    ) -> PgKitResult<Self::SerializeTupleVariant> {
        Ok(JsonCompound(ser::Serializer::serialize_tuple_variant(
            Json, name, index, variant, len,
        )?))
    }

    fn serialize_map(self, len: Option<usize>) -> PgKitResult<Self::SerializeMap> {
        Ok(JsonCompound(ser::Serializer::serialize_map(Json, len)?))
    }

    fn serialize_struct(
        self,
        name: &'static str,
        len: usize,
    ) -> PgKitResult<Self::SerializeStruct> {
        Ok(JsonCompound(ser::Serializer::serialize_struct(
            Json, name, len,
        )?))
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        index: u32,
        variant: &'static str,
        len: usize,
    ) -> PgKitResult<Self::SerializeStructVariant> {
        Ok(JsonCompound(ser::Serializer::serialize_struct_variant(
            Json, name, index, variant, len,
        )?))
    }
}

/// A nested sequence or map, built by `serde_json` and stored as one JSON document.
struct JsonCompound<S>(S);

macro_rules! json_compound {
    ($trait:ident, $($method:ident($($arg:ident: $ty:ty),*)),+) => {
        impl<S> ser::$trait for JsonCompound<S>
        where
            S: ser::$trait<Ok = serde_json::Value, Error = serde_json::Error>,
        {
            type Ok = Value;
            type Error = PgKitError;

            $(
                fn $method<T: Serialize + ?Sized>(
                    &mut self,
                    $($arg: $ty,)*
                    value: &T,
                ) -> PgKitResult<()> {
                    Ok(ser::$trait::$method(&mut self.0, $($arg,)* value)?)
                }
            )+

            fn end(self) -> PgKitResult<Value> {
                Ok(Value::Json(ser::$trait::end(self.0)?))
            }
        }
    };
}

json_compound!(SerializeSeq, serialize_element());
json_compound!(SerializeTuple, serialize_element());
json_compound!(SerializeTupleStruct, serialize_field());
json_compound!(SerializeTupleVariant, serialize_field());
json_compound!(SerializeMap, serialize_key(), serialize_value());
json_compound!(SerializeStruct, serialize_field(key: &'static str));
json_compound!(SerializeStructVariant, serialize_field(key: &'static str));
