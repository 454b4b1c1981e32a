//! `#[serde(with = "...")]` helpers that keep SQL types through [`Record::from_serialize`].
//!
//! Derived `Serialize` impls write dates, UUIDs and decimals as strings, which would bind
//! as TEXT. Fields annotated with these helpers bind as DATE, TIMESTAMP, UUID and NUMERIC:
//!
//! ```
//! use chrono::NaiveDate;
//! use pgkit::{Record, Value};
//!
//! #[derive(serde::Serialize)]
//! struct Person {
//!     id: i64,
//!     #[serde(with = "pgkit::typed::date")]
//!     born: NaiveDate,
//!     #[serde(with = "pgkit::typed::uuid::option")]
//!     key: Option<uuid::Uuid>,
//! }
//!
//! let born = NaiveDate::from_ymd_opt(1990, 5, 17).unwrap();
//! let record = Record::from_serialize(&Person { id: 1, born, key: None }).unwrap();
//! assert_eq!(record.get("born"), Some(&Value::Date(born)));
//! ```
//!
//! Any other serializer, `serde_json` included, sees the usual string form. Deserializing
//! is plain delegation.
//!
//! [`Record::from_serialize`]: crate::Record::from_serialize

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A value wrapped in a marker newtype that only the record serializer interprets.
struct Marked<'a, T: ?Sized>(&'static str, &'a T);

impl<T: Serialize + ?Sized> Serialize for Marked<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_newtype_struct(self.0, self.1)
    }
}

macro_rules! typed_field {
    ($(#[$doc:meta])* $module:ident, $ty:ty, $marker:path) => {
        $(#[$doc])*
        pub mod $module {
            use super::*;

            pub fn serialize<S: Serializer>(value: &$ty, serializer: S) -> Result<S::Ok, S::Error> {
                Marked($marker, value).serialize(serializer)
            }

            pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<$ty, D::Error> {
                <$ty as Deserialize<'de>>::deserialize(deserializer)
            }

            /// The same, for `Option` fields.
            pub mod option {
                use super::*;

                pub fn serialize<S: Serializer>(
                    value: &Option<$ty>,
                    serializer: S,
                ) -> Result<S::Ok, S::Error> {
                    match value {
                        Some(v) => serializer.serialize_some(&Marked($marker, v)),
                        None => serializer.serialize_none(),
                    }
                }

                pub fn deserialize<'de, D: Deserializer<'de>>(
                    deserializer: D,
                ) -> Result<Option<$ty>, D::Error> {
                    Option::<$ty>::deserialize(deserializer)
                }
            }
        }
    };
}

typed_field!(
    /// `chrono::NaiveDate` as DATE.
    date,
    ::chrono::NaiveDate,
    crate::ser::DATE
);
typed_field!(
    /// `chrono::NaiveDateTime` as TIMESTAMP.
    datetime,
    ::chrono::NaiveDateTime,
    crate::ser::DATETIME
);
typed_field!(
    /// `uuid::Uuid` as UUID.
    uuid,
    ::uuid::Uuid,
    crate::ser::UUID
);
typed_field!(
    /// `rust_decimal::Decimal` as NUMERIC.
    decimal,
    ::rust_decimal::Decimal,
    crate::ser::DECIMAL
);

#[cfg(test)]
mod tests {
    use crate::{Record, Value};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Event {
        #[serde(with = "crate::typed::datetime")]
        at: chrono::NaiveDateTime,
        #[serde(with = "crate::typed::date::option")]
        until: Option<NaiveDate>,
    }

    #[test]
    fn test_helpers_roundtrip_through_json() {
        let at = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_micro_opt(3, 4, 5, 600)
            .unwrap();
        let event = Event { at, until: None };

        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"at":"2024-01-02T03:04:05.000600","until":null}"#);
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);

        let record = Record::from_serialize(&event).unwrap();
        assert_eq!(record.get("at"), Some(&Value::DateTime(at)));
        assert_eq!(record.get("until"), Some(&Value::Null));
    }
}
