//! Cell values carried from a dataset into parameterized statements.

use std::borrow::Cow;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Value kind, used as the type hint of a NULL and as the coercion target
/// for text cells.
///
/// Drivers need the hint to bind a NULL with a concrete wire type, and the
/// PostgreSQL family needs it to cast placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlNullType {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    String,
    Bytes,
    Uuid,
    Decimal,
    DateTime,
    DateTimeOffset,
    Date,
    Time,
}

impl SqlNullType {
    /// Map a declared column type (as reported by a schema catalog) to a value kind.
    ///
    /// Unknown types map to `String`; the database performs the final
    /// assignment conversion.
    pub fn from_declared_type(declared: &str) -> Self {
        let t = declared.trim().to_ascii_lowercase();
        let base = t.split(['(', ' ']).next().unwrap_or("");

        match base {
            "bit" | "bool" | "boolean" => SqlNullType::Bool,
            "tinyint" | "smallint" | "int2" | "smallserial" => SqlNullType::I16,
            "int" | "integer" | "int4" | "mediumint" | "serial" => SqlNullType::I32,
            "bigint" | "int8" | "bigserial" => SqlNullType::I64,
            "real" | "float4" => SqlNullType::F32,
            "float" | "double" | "float8" => SqlNullType::F64,
            "decimal" | "numeric" | "money" | "smallmoney" | "number" => SqlNullType::Decimal,
            "uuid" | "uniqueidentifier" => SqlNullType::Uuid,
            "date" => SqlNullType::Date,
            "time" => SqlNullType::Time,
            "datetimeoffset" | "timestamptz" => SqlNullType::DateTimeOffset,
            "datetime" | "datetime2" | "smalldatetime" => SqlNullType::DateTime,
            "timestamp" => {
                if t.contains("with time zone") {
                    SqlNullType::DateTimeOffset
                } else {
                    SqlNullType::DateTime
                }
            }
            "bytea" | "blob" | "binary" | "varbinary" | "image" | "longblob" | "mediumblob" => {
                SqlNullType::Bytes
            }
            _ => SqlNullType::String,
        }
    }
}

/// SQL value enum for type-safe row handling.
///
/// Uses `Cow` for string and byte data so rows can borrow from a source
/// buffer; use [`SqlValue::into_owned`] to detach them.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue<'a> {
    /// NULL with type hint for binding.
    Null(SqlNullType),
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Text(Cow<'a, str>),
    Bytes(Cow<'a, [u8]>),
    Uuid(Uuid),
    Decimal(Decimal),
    /// Timestamp without timezone.
    DateTime(NaiveDateTime),
    /// Timestamp with timezone offset.
    DateTimeOffset(DateTime<FixedOffset>),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl<'a> SqlValue<'a> {
    /// Convert to a fully owned value with `'static` lifetime.
    #[must_use]
    pub fn into_owned(self) -> SqlValue<'static> {
        match self {
            SqlValue::Text(v) => SqlValue::Text(Cow::Owned(v.into_owned())),
            SqlValue::Bytes(v) => SqlValue::Bytes(Cow::Owned(v.into_owned())),
            SqlValue::Null(t) => SqlValue::Null(t),
            SqlValue::Bool(v) => SqlValue::Bool(v),
            SqlValue::I16(v) => SqlValue::I16(v),
            SqlValue::I32(v) => SqlValue::I32(v),
            SqlValue::I64(v) => SqlValue::I64(v),
            SqlValue::F32(v) => SqlValue::F32(v),
            SqlValue::F64(v) => SqlValue::F64(v),
            SqlValue::Uuid(v) => SqlValue::Uuid(v),
            SqlValue::Decimal(v) => SqlValue::Decimal(v),
            SqlValue::DateTime(v) => SqlValue::DateTime(v),
            SqlValue::DateTimeOffset(v) => SqlValue::DateTimeOffset(v),
            SqlValue::Date(v) => SqlValue::Date(v),
            SqlValue::Time(v) => SqlValue::Time(v),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// Borrow text and byte payloads instead of cloning them.
    #[must_use]
    pub fn reborrow(&self) -> SqlValue<'_> {
        match self {
            SqlValue::Text(v) => SqlValue::Text(Cow::Borrowed(v.as_ref())),
            SqlValue::Bytes(v) => SqlValue::Bytes(Cow::Borrowed(v.as_ref())),
            other => other.clone(),
        }
    }

    /// Kind of this value (the hint itself for NULL).
    #[must_use]
    pub fn kind(&self) -> SqlNullType {
        match self {
            SqlValue::Null(t) => *t,
            SqlValue::Bool(_) => SqlNullType::Bool,
            SqlValue::I16(_) => SqlNullType::I16,
            SqlValue::I32(_) => SqlNullType::I32,
            SqlValue::I64(_) => SqlNullType::I64,
            SqlValue::F32(_) => SqlNullType::F32,
            SqlValue::F64(_) => SqlNullType::F64,
            SqlValue::Text(_) => SqlNullType::String,
            SqlValue::Bytes(_) => SqlNullType::Bytes,
            SqlValue::Uuid(_) => SqlNullType::Uuid,
            SqlValue::Decimal(_) => SqlNullType::Decimal,
            SqlValue::DateTime(_) => SqlNullType::DateTime,
            SqlValue::DateTimeOffset(_) => SqlNullType::DateTimeOffset,
            SqlValue::Date(_) => SqlNullType::Date,
            SqlValue::Time(_) => SqlNullType::Time,
        }
    }

    /// Create a text value from an owned String.
    #[must_use]
    pub fn text(s: impl Into<String>) -> SqlValue<'static> {
        SqlValue::Text(Cow::Owned(s.into()))
    }

    /// Parse a text cell into a value of the requested kind.
    ///
    /// An empty cell is NULL for every kind except `String`. Returns `None`
    /// when the text cannot be read as that kind.
    pub fn parse_as(raw: &str, kind: SqlNullType) -> Option<SqlValue<'static>> {
        let s = raw.trim();
        if s.is_empty() && kind != SqlNullType::String {
            return Some(SqlValue::Null(kind));
        }

        let value = match kind {
            SqlNullType::String => SqlValue::text(raw),
            SqlNullType::Bool => match s.to_ascii_lowercase().as_str() {
                "1" | "true" | "t" | "yes" | "y" => SqlValue::Bool(true),
                "0" | "false" | "f" | "no" | "n" => SqlValue::Bool(false),
                _ => return None,
            },
            SqlNullType::I16 => SqlValue::I16(s.parse().ok()?),
            SqlNullType::I32 => SqlValue::I32(s.parse().ok()?),
            SqlNullType::I64 => SqlValue::I64(s.parse().ok()?),
            SqlNullType::F32 => SqlValue::F32(s.parse().ok()?),
            SqlNullType::F64 => SqlValue::F64(s.parse().ok()?),
            SqlNullType::Decimal => SqlValue::Decimal(s.parse().ok()?),
            SqlNullType::Uuid => SqlValue::Uuid(Uuid::parse_str(s).ok()?),
            SqlNullType::Date => SqlValue::Date(NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?),
            SqlNullType::Time => SqlValue::Time(NaiveTime::parse_from_str(s, "%H:%M:%S%.f").ok()?),
            SqlNullType::DateTime => SqlValue::DateTime(
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                    .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
                    .ok()?,
            ),
            SqlNullType::DateTimeOffset => {
                SqlValue::DateTimeOffset(DateTime::parse_from_rfc3339(s).ok()?)
            }
            SqlNullType::Bytes => SqlValue::Bytes(Cow::Owned(raw.as_bytes().to_vec())),
        };
        Some(value)
    }
}

macro_rules! impl_from_owned {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for SqlValue<'static> {
                fn from(v: $t) -> Self {
                    SqlValue::$variant(v)
                }
            }
        )*
    };
}

impl_from_owned!(
    bool => Bool,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    Uuid => Uuid,
    Decimal => Decimal,
    NaiveDateTime => DateTime,
    DateTime<FixedOffset> => DateTimeOffset,
    NaiveDate => Date,
    NaiveTime => Time,
);

impl From<String> for SqlValue<'static> {
    fn from(v: String) -> Self {
        SqlValue::Text(Cow::Owned(v))
    }
}

impl<'a> From<&'a str> for SqlValue<'a> {
    fn from(v: &'a str) -> Self {
        SqlValue::Text(Cow::Borrowed(v))
    }
}

impl From<Vec<u8>> for SqlValue<'static> {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(Cow::Owned(v))
    }
}

impl<'a, T> From<Option<T>> for SqlValue<'a>
where
    T: Into<SqlValue<'a>>,
{
    /// `None` becomes an untyped (text) NULL.
    fn from(v: Option<T>) -> Self {
        v.map(Into::into)
            .unwrap_or(SqlValue::Null(SqlNullType::String))
    }
}
