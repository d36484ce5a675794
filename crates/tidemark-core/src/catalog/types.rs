//! Column types and the lossiness of converting between them.

use super::error::SchemaError;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::fmt;
use std::str::FromStr;

/// Relational column types.
///
/// Serialized as their SQL spelling (`"varchar(10)"`, `"int"`) so that
/// declaration and migration files stay readable.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    /// Boolean value.
    Bool,
    /// 16-bit signed integer.
    SmallInt,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    BigInt,
    /// 32-bit floating point.
    Real,
    /// 64-bit floating point.
    Double,
    /// Fixed-precision decimal.
    Decimal {
        /// Total number of digits.
        precision: u8,
        /// Number of digits after the decimal point.
        scale: u8,
    },
    /// Bounded string.
    Varchar(u32),
    /// Unbounded string.
    Text,
    /// Binary data.
    Bytes,
    /// Calendar date.
    Date,
    /// Timestamp.
    Timestamp,
    /// UUID (128-bit identifier).
    Uuid,
}

/// How a value survives a change of column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Same type.
    Identical,
    /// Every value of the old type is representable in the new one.
    Widening,
    /// Some values of the old type may be truncated or rejected.
    Narrowing,
}

impl ColumnType {
    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::SmallInt
                | ColumnType::Int
                | ColumnType::BigInt
                | ColumnType::Real
                | ColumnType::Double
                | ColumnType::Decimal { .. }
        )
    }

    /// Check if this type is a string type.
    pub fn is_string_like(&self) -> bool {
        matches!(self, ColumnType::Varchar(_) | ColumnType::Text)
    }

    /// Number of decimal digits an integer type can hold.
    fn integer_digits(&self) -> Option<u8> {
        match self {
            ColumnType::SmallInt => Some(5),
            ColumnType::Int => Some(10),
            ColumnType::BigInt => Some(19),
            _ => None,
        }
    }

    /// Classify converting a column from `self` to `to`.
    pub fn conversion_to(&self, to: &ColumnType) -> Conversion {
        use ColumnType::*;

        if self == to {
            return Conversion::Identical;
        }

        let widening = match (self, to) {
            (SmallInt, Int | BigInt) | (Int, BigInt) => true,
            (SmallInt | Int, Double) => true,
            (SmallInt | Int | BigInt, Decimal { precision, scale }) => {
                let digits = self.integer_digits().unwrap_or(u8::MAX);
                precision.saturating_sub(*scale) >= digits
            }
            (Real, Double) => true,
            (
                Decimal {
                    precision: p1,
                    scale: s1,
                },
                Decimal {
                    precision: p2,
                    scale: s2,
                },
            ) => s2 >= s1 && p2.saturating_sub(*s2) >= p1.saturating_sub(*s1),
            (Varchar(from), Varchar(to)) => to >= from,
            (Varchar(_), Text) => true,
            (_, Text) => !matches!(self, Bytes),
            (Date, Timestamp) => true,
            _ => false,
        };

        if widening {
            Conversion::Widening
        } else {
            Conversion::Narrowing
        }
    }

    /// Check whether a JSON value can be stored in a column of this type.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;

        match (self, value) {
            (_, Value::Null) => true,
            (ColumnType::Bool, Value::Bool(_)) => true,
            (ColumnType::SmallInt, Value::Number(n)) => n
                .as_i64()
                .is_some_and(|v| i16::try_from(v).is_ok()),
            (ColumnType::Int, Value::Number(n)) => {
                n.as_i64().is_some_and(|v| i32::try_from(v).is_ok())
            }
            (ColumnType::BigInt, Value::Number(n)) => n.as_i64().is_some(),
            (ColumnType::Real | ColumnType::Double, Value::Number(_)) => true,
            (ColumnType::Decimal { precision, scale }, Value::Number(n)) => {
                let text = n.to_string();
                let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), ""));
                let int_digits = int_part.trim_start_matches('-').len();
                int_digits <= usize::from(precision.saturating_sub(*scale))
                    && frac_part.len() <= usize::from(*scale)
            }
            (ColumnType::Varchar(len), Value::String(s)) => s.chars().count() <= *len as usize,
            (
                ColumnType::Text
                | ColumnType::Bytes
                | ColumnType::Date
                | ColumnType::Timestamp
                | ColumnType::Uuid,
                Value::String(_),
            ) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Bool => write!(f, "boolean"),
            ColumnType::SmallInt => write!(f, "smallint"),
            ColumnType::Int => write!(f, "int"),
            ColumnType::BigInt => write!(f, "bigint"),
            ColumnType::Real => write!(f, "real"),
            ColumnType::Double => write!(f, "double"),
            ColumnType::Decimal { precision, scale } => write!(f, "decimal({precision},{scale})"),
            ColumnType::Varchar(len) => write!(f, "varchar({len})"),
            ColumnType::Text => write!(f, "text"),
            ColumnType::Bytes => write!(f, "bytes"),
            ColumnType::Date => write!(f, "date"),
            ColumnType::Timestamp => write!(f, "timestamp"),
            ColumnType::Uuid => write!(f, "uuid"),
        }
    }
}

impl FromStr for ColumnType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s.trim().to_ascii_lowercase().split_whitespace().collect();
        let invalid = || SchemaError::InvalidType(s.to_string());

        let (base, args) = match normalized.split_once('(') {
            Some((base, rest)) => {
                let args = rest.strip_suffix(')').ok_or_else(invalid)?;
                (base.to_string(), Some(args.to_string()))
            }
            None => (normalized.clone(), None),
        };

        let ty = match (base.as_str(), args) {
            ("bool" | "boolean" | "bit", None) => ColumnType::Bool,
            ("smallint" | "int2", None) => ColumnType::SmallInt,
            ("int" | "integer" | "int4", None) => ColumnType::Int,
            ("bigint" | "int8", None) => ColumnType::BigInt,
            ("real" | "float4", None) => ColumnType::Real,
            ("double" | "float" | "float8", None) => ColumnType::Double,
            ("decimal" | "numeric", None) => ColumnType::Decimal {
                precision: 18,
                scale: 2,
            },
            ("decimal" | "numeric", Some(args)) => {
                let (p, s) = args.split_once(',').unwrap_or((args.as_str(), "0"));
                let precision: u8 = p.parse().map_err(|_| invalid())?;
                let scale: u8 = s.parse().map_err(|_| invalid())?;
                if precision == 0 || scale > precision {
                    return Err(invalid());
                }
                ColumnType::Decimal { precision, scale }
            }
            ("varchar" | "nvarchar", Some(args)) => {
                let len: u32 = args.parse().map_err(|_| invalid())?;
                if len == 0 {
                    return Err(invalid());
                }
                ColumnType::Varchar(len)
            }
            ("varchar" | "nvarchar" | "text" | "string", None) => ColumnType::Text,
            ("bytes" | "blob" | "bytea" | "varbinary", None) => ColumnType::Bytes,
            ("date", None) => ColumnType::Date,
            ("timestamp" | "datetime" | "datetime2", None) => ColumnType::Timestamp,
            ("uuid" | "uniqueidentifier", None) => ColumnType::Uuid,
            _ => return Err(invalid()),
        };

        Ok(ty)
    }
}

impl TryFrom<String> for ColumnType {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_and_display() {
        assert_eq!("int".parse::<ColumnType>().unwrap(), ColumnType::Int);
        assert_eq!("INTEGER".parse::<ColumnType>().unwrap(), ColumnType::Int);
        assert_eq!(
            "varchar(10)".parse::<ColumnType>().unwrap(),
            ColumnType::Varchar(10)
        );
        assert_eq!(
            "Decimal(10, 2)".parse::<ColumnType>().unwrap(),
            ColumnType::Decimal {
                precision: 10,
                scale: 2
            }
        );
        assert_eq!(ColumnType::Varchar(20).to_string(), "varchar(20)");
        assert!("varchar(0)".parse::<ColumnType>().is_err());
        assert!("decimal(2,4)".parse::<ColumnType>().is_err());
        assert!("geometry".parse::<ColumnType>().is_err());
    }

    #[test]
    fn test_widening_conversions() {
        assert_eq!(
            ColumnType::Int.conversion_to(&ColumnType::BigInt),
            Conversion::Widening
        );
        assert_eq!(
            ColumnType::Varchar(10).conversion_to(&ColumnType::Varchar(20)),
            Conversion::Widening
        );
        assert_eq!(
            ColumnType::Varchar(10).conversion_to(&ColumnType::Text),
            Conversion::Widening
        );
        assert_eq!(
            ColumnType::Date.conversion_to(&ColumnType::Timestamp),
            Conversion::Widening
        );
        assert_eq!(
            ColumnType::Int.conversion_to(&ColumnType::Decimal {
                precision: 12,
                scale: 2
            }),
            Conversion::Widening
        );
    }

    #[test]
    fn test_narrowing_conversions() {
        assert_eq!(
            ColumnType::BigInt.conversion_to(&ColumnType::Int),
            Conversion::Narrowing
        );
        assert_eq!(
            ColumnType::Varchar(20).conversion_to(&ColumnType::Varchar(10)),
            Conversion::Narrowing
        );
        assert_eq!(
            ColumnType::Text.conversion_to(&ColumnType::Varchar(255)),
            Conversion::Narrowing
        );
        assert_eq!(
            ColumnType::Int.conversion_to(&ColumnType::Bool),
            Conversion::Narrowing
        );
        assert_eq!(
            ColumnType::Int.conversion_to(&ColumnType::Int),
            Conversion::Identical
        );
    }

    #[test]
    fn test_accepts_values() {
        assert!(ColumnType::Varchar(5).accepts(&json!("Paris")));
        assert!(!ColumnType::Varchar(4).accepts(&json!("Paris")));
        assert!(ColumnType::Int.accepts(&json!(42)));
        assert!(!ColumnType::Int.accepts(&json!(5_000_000_000i64)));
        assert!(!ColumnType::Int.accepts(&json!("42")));
        assert!(ColumnType::Decimal {
            precision: 5,
            scale: 2
        }
        .accepts(&json!(123.45)));
        assert!(ColumnType::Bool.accepts(&json!(null)));
    }

    #[test]
    fn test_serde_uses_sql_spelling() {
        let encoded = serde_json::to_string(&ColumnType::Varchar(10)).unwrap();
        assert_eq!(encoded, "\"varchar(10)\"");
        let decoded: ColumnType = serde_json::from_str("\"bigint\"").unwrap();
        assert_eq!(decoded, ColumnType::BigInt);
    }
}
