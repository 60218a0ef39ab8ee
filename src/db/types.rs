//! Row decoding.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies the column's type name
//! 2. A per-category decoder extracts the value as JSON
//!
//! CockroachDB reports PostgreSQL type names (`INT8`, `NUMERIC`, `TIMESTAMPTZ`, ...).
//! Prepared queries return binary values, unprepared ones return text. Any value
//! that arrives as text but has no dedicated decoder is passed through as a string.

use crate::models::Row as JsonRow;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::{Oid, PgInterval};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::{Column, Decode, Postgres, Row, Type, TypeInfo, ValueRef};
use tracing::warn;

/// Logical category for a column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Interval,
    Unknown,
}

/// Classify a type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Checked first, "numeric" would otherwise never reach the float arm.
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    match lower.as_str() {
        "int2" | "int4" | "int8" | "smallint" | "integer" | "int" | "bigint" | "oid" => {
            TypeCategory::Integer
        }
        "bool" | "boolean" => TypeCategory::Boolean,
        "float4" | "float8" | "real" | "double precision" | "float" => TypeCategory::Float,
        "json" | "jsonb" => TypeCategory::Json,
        "uuid" => TypeCategory::Uuid,
        "bytea" | "bytes" => TypeCategory::Binary,
        "timestamptz" => TypeCategory::TimestampTz,
        "timestamp" => TypeCategory::Timestamp,
        "date" => TypeCategory::Date,
        "time" => TypeCategory::Time,
        "interval" => TypeCategory::Interval,
        "text" | "varchar" | "bpchar" | "char" | "name" | "string" => TypeCategory::Text,
        _ => TypeCategory::Unknown,
    }
}

/// Raw NUMERIC value in the database's own text form.
///
/// Kept as a string so precision, `NaN` and the infinities survive.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => numeric_to_string(value.as_bytes()?).map(RawDecimal),
        }
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Render the binary NUMERIC wire format: a header of digit count, weight, sign
/// and display scale, followed by base-10000 digits.
fn numeric_to_string(buf: &[u8]) -> Result<String, BoxDynError> {
    if buf.len() < 8 {
        return Err(format!("NUMERIC value too short: {} bytes", buf.len()).into());
    }
    let word = |at: usize| u16::from_be_bytes([buf[at], buf[at + 1]]);

    let ndigits = word(0) as i16;
    let weight = i32::from(word(2) as i16);
    let sign = word(4);
    let dscale = usize::from(word(6));

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let ndigits = usize::try_from(ndigits).map_err(|_| "negative NUMERIC digit count")?;
    if buf.len() < 8 + ndigits * 2 {
        return Err(format!("NUMERIC value truncated: {} digits declared", ndigits).into());
    }
    let digit = |pos: i32| -> u16 {
        usize::try_from(pos)
            .ok()
            .filter(|&p| p < ndigits)
            .map(|p| word(8 + p * 2))
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&digit(0).to_string());
        for pos in 1..=weight {
            out.push_str(&format!("{:04}", digit(pos)));
        }
    }
    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut pos = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit(pos)));
            pos += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Ok(out)
}

/// Render an interval the way PostgreSQL prints it, e.g. `1 year 2 mons 3 days 04:05:06`.
fn format_interval(interval: &PgInterval) -> String {
    fn unit(value: i32, name: &str) -> String {
        let plural = if value == 1 { "" } else { "s" };
        format!("{} {}{}", value, name, plural)
    }

    let mut parts = Vec::new();
    let (years, months) = (interval.months / 12, interval.months % 12);
    if years != 0 {
        parts.push(unit(years, "year"));
    }
    if months != 0 {
        parts.push(unit(months, "mon"));
    }
    if interval.days != 0 {
        parts.push(unit(interval.days, "day"));
    }

    let micros = interval.microseconds;
    if micros != 0 || parts.is_empty() {
        let sign = if micros < 0 { "-" } else { "" };
        let abs = micros.unsigned_abs();
        let secs = abs / 1_000_000;
        let mut clock = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3600,
            secs / 60 % 60,
            secs % 60
        );
        let frac = abs % 1_000_000;
        if frac != 0 {
            let digits = format!("{:06}", frac);
            clock.push('.');
            clock.push_str(digits.trim_end_matches('0'));
        }
        parts.push(clock);
    }
    parts.join(" ")
}

/// Encode binary column data as base64.
pub fn decode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    JsonValue::String(STANDARD.encode(bytes))
}

/// Conversion of a database row to a JSON object keyed by column name.
pub trait RowToJson {
    fn to_json_map(&self) -> JsonRow;
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> JsonRow {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let value = decode_column(self, idx, categorize_type(type_name))
                    .or_else(|e| decode_text_format(self, idx).ok_or(e))
                    .unwrap_or_else(|e| {
                        warn!(
                            column = col.name(),
                            type_name,
                            error = %e,
                            "Cannot decode column, returning null"
                        );
                        JsonValue::Null
                    });
                (col.name().to_string(), value)
            })
            .collect()
    }
}

type Decoded = Result<JsonValue, sqlx::Error>;

fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> Decoded {
    match category {
        TypeCategory::Decimal => decode_with(row, idx, |v: RawDecimal| JsonValue::String(v.0)),
        TypeCategory::Integer => decode_with(row, idx, |v: i64| JsonValue::from(v))
            .or_else(|_| decode_with(row, idx, |v: i32| JsonValue::from(v)))
            .or_else(|_| decode_with(row, idx, |v: i16| JsonValue::from(v)))
            .or_else(|_| decode_with(row, idx, |v: Oid| JsonValue::from(v.0))),
        TypeCategory::Boolean => decode_with(row, idx, JsonValue::Bool),
        TypeCategory::Float => decode_with(row, idx, |v: f64| float_json(v))
            .or_else(|_| decode_with(row, idx, |v: f32| float_json(f64::from(v)))),
        TypeCategory::Binary => decode_with(row, idx, |v: Vec<u8>| decode_binary_value(&v)),
        TypeCategory::Json => decode_with(row, idx, |v: JsonValue| v),
        TypeCategory::Uuid => decode_with(row, idx, |v: uuid::Uuid| {
            JsonValue::String(v.to_string())
        }),
        TypeCategory::Timestamp => decode_with(row, idx, |v: NaiveDateTime| {
            JsonValue::String(v.format("%Y-%m-%d %H:%M:%S%.f").to_string())
        }),
        TypeCategory::TimestampTz => decode_with(row, idx, |v: DateTime<Utc>| {
            JsonValue::String(v.to_rfc3339())
        }),
        TypeCategory::Date => decode_with(row, idx, |v: NaiveDate| {
            JsonValue::String(v.format("%Y-%m-%d").to_string())
        }),
        TypeCategory::Time => decode_with(row, idx, |v: NaiveTime| {
            JsonValue::String(v.format("%H:%M:%S%.f").to_string())
        }),
        TypeCategory::Interval => decode_with(row, idx, |v: PgInterval| {
            JsonValue::String(format_interval(&v))
        }),
        TypeCategory::Text | TypeCategory::Unknown => decode_with(row, idx, JsonValue::String),
    }
}

/// Decode a nullable column as `T` and convert it to JSON.
fn decode_with<'r, T, F>(row: &'r PgRow, idx: usize, to_json: F) -> Decoded
where
    T: Decode<'r, Postgres> + Type<Postgres>,
    F: FnOnce(T) -> JsonValue,
{
    Ok(row
        .try_get::<Option<T>, _>(idx)?
        .map(to_json)
        .unwrap_or(JsonValue::Null))
}

/// Pass a text-format value through unchanged.
fn decode_text_format(row: &PgRow, idx: usize) -> Option<JsonValue> {
    let raw = row.try_get_raw(idx).ok()?;
    if raw.is_null() {
        return Some(JsonValue::Null);
    }
    if !matches!(raw.format(), PgValueFormat::Text) {
        return None;
    }
    raw.as_str().ok().map(|s| JsonValue::String(s.to_string()))
}

fn float_json(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(digits.len() as u16).to_be_bytes());
        buf.extend_from_slice(&weight.to_be_bytes());
        buf.extend_from_slice(&sign.to_be_bytes());
        buf.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            buf.extend_from_slice(&d.to_be_bytes());
        }
        buf
    }

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(categorize_type("INT8"), TypeCategory::Integer);
        assert_eq!(categorize_type("int4"), TypeCategory::Integer);
        assert_eq!(categorize_type("BIGINT"), TypeCategory::Integer);
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(categorize_type("NUMERIC"), TypeCategory::Decimal);
        assert_eq!(categorize_type("decimal"), TypeCategory::Decimal);
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(categorize_type("TIMESTAMPTZ"), TypeCategory::TimestampTz);
        assert_eq!(categorize_type("TIMESTAMP"), TypeCategory::Timestamp);
        assert_eq!(categorize_type("DATE"), TypeCategory::Date);
        assert_eq!(categorize_type("TIME"), TypeCategory::Time);
        assert_eq!(categorize_type("INTERVAL"), TypeCategory::Interval);
    }

    #[test]
    fn test_categorize_type_misc() {
        assert_eq!(categorize_type("jsonb"), TypeCategory::Json);
        assert_eq!(categorize_type("UUID"), TypeCategory::Uuid);
        assert_eq!(categorize_type("BYTEA"), TypeCategory::Binary);
        assert_eq!(categorize_type("VARCHAR"), TypeCategory::Text);
        assert_eq!(categorize_type("INET"), TypeCategory::Unknown);
    }

    #[test]
    fn test_numeric_binary_format() {
        assert_eq!(numeric_to_string(&numeric(0, 0, 1, &[1, 5000])).unwrap(), "1.5");
        assert_eq!(
            numeric_to_string(&numeric(1, 0, 3, &[1, 2345, 6780])).unwrap(),
            "12345.678"
        );
        assert_eq!(numeric_to_string(&numeric(-1, 0, 3, &[10])).unwrap(), "0.001");
        assert_eq!(numeric_to_string(&numeric(1, 0, 0, &[1])).unwrap(), "10000");
        assert_eq!(
            numeric_to_string(&numeric(0, NUMERIC_NEG, 2, &[42, 5000])).unwrap(),
            "-42.50"
        );
        assert_eq!(numeric_to_string(&numeric(0, 0, 0, &[])).unwrap(), "0");
    }

    #[test]
    fn test_numeric_special_values() {
        assert_eq!(numeric_to_string(&numeric(0, NUMERIC_NAN, 0, &[])).unwrap(), "NaN");
        assert_eq!(
            numeric_to_string(&numeric(0, NUMERIC_NINF, 0, &[])).unwrap(),
            "-Infinity"
        );
    }

    #[test]
    fn test_numeric_rejects_short_input() {
        assert!(numeric_to_string(&[0, 1, 0]).is_err());
        let mut truncated = numeric(0, 0, 0, &[1, 2]);
        truncated.pop();
        assert!(numeric_to_string(&truncated).is_err());
    }

    #[test]
    fn test_format_interval() {
        let interval = |months, days, microseconds| PgInterval {
            months,
            days,
            microseconds,
        };
        assert_eq!(format_interval(&interval(0, 1, 0)), "1 day");
        assert_eq!(
            format_interval(&interval(14, 3, 14_706_000_000)),
            "1 year 2 mons 3 days 04:05:06"
        );
        assert_eq!(format_interval(&interval(0, 0, 1_500_000)), "00:00:01.5");
        assert_eq!(format_interval(&interval(0, -2, -60_000_000)), "-2 days -00:01:00");
        assert_eq!(format_interval(&interval(0, 0, 0)), "00:00:00");
    }

    #[test]
    fn test_decode_binary_value() {
        assert_eq!(
            decode_binary_value(b"hello world"),
            JsonValue::String("aGVsbG8gd29ybGQ=".to_string())
        );
        assert_eq!(
            decode_binary_value(&[0xFF, 0xFE, 0x00, 0x01]),
            JsonValue::String("//4AAQ==".to_string())
        );
        assert_eq!(decode_binary_value(&[]), JsonValue::String(String::new()));
    }
}
