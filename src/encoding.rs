//! Pure line-protocol encoding: escaping, numeric suffixes, timestamp scaling.
//!
//! Output shape is `name[,tag=val,...] field=val[,field=val...][ timestamp]`,
//! tags and fields in ascending key order. No I/O happens here; a rendered
//! line is handed to the transport or the batch queue as-is.

use std::fmt::Write;
use std::time::UNIX_EPOCH;

use crate::error::InfluxError;
use crate::types::{Field, FieldValue, Measurement, ProtocolVersion, Tag, TimestampResolution};

/// Renders one measurement into a single line-protocol line (no trailing
/// newline).
///
/// Fails if the measurement has no fields, if its timestamp predates the Unix
/// epoch, or if an unsigned integer field is rendered under strict v1.
pub fn encode_measurement(
    measurement: &Measurement,
    version: ProtocolVersion,
    resolution: TimestampResolution,
) -> Result<String, InfluxError> {
    let fields = measurement.fields().to_sorted_vec();
    if fields.is_empty() {
        return Err(InfluxError::NoFields);
    }

    // Validate the timestamp up front, even when no timestamp column is
    // rendered: a pre-epoch instant is a caller error either way.
    let elapsed = measurement
        .timestamp()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| InfluxError::TimestampBeforeEpoch)?;

    let mut line = String::with_capacity(256);
    escape_name_into(&mut line, measurement.name());

    for tag in measurement.tags().to_sorted_vec() {
        line.push(',');
        line.push_str(&encode_tag(&tag));
    }

    line.push(' ');
    let mut first = true;
    for field in &fields {
        if !first {
            line.push(',');
        }
        first = false;
        line.push_str(&encode_field(field, version)?);
    }

    let nanos = elapsed.as_nanos();
    match resolution {
        TimestampResolution::None => {}
        TimestampResolution::Nanoseconds => {
            let _ = write!(line, " {}", nanos);
        }
        TimestampResolution::Microseconds => {
            let _ = write!(line, " {}", nanos / 1_000);
        }
        TimestampResolution::Milliseconds => {
            let _ = write!(line, " {}", nanos / 1_000_000);
        }
        TimestampResolution::Seconds => {
            let _ = write!(line, " {}", nanos / 1_000_000_000);
        }
    }

    Ok(line)
}

/// Renders `key=value` for one tag, escaping `,`, `=` and space in both the
/// key and the value. A literal backslash or quote is written through as-is.
pub fn encode_tag(tag: &Tag) -> String {
    let mut out = String::with_capacity(64);
    escape_token_into(&mut out, tag.key());
    out.push('=');
    escape_token_into(&mut out, tag.value());
    out
}

/// Renders `key=value` for one field.
///
/// The key escapes `,`, `=` and space. Value rendering depends on the type:
/// floats use the shortest round-trip decimal form, signed integers carry the
/// `i` suffix, unsigned integers carry `u` under v2 (clamped to `i64::MAX`
/// with an `i` suffix under lenient v1, rejected under strict v1), strings
/// are quoted with `\` and `"` escaped, booleans are literal `true`/`false`.
pub fn encode_field(field: &Field, version: ProtocolVersion) -> Result<String, InfluxError> {
    let mut out = String::with_capacity(64);
    escape_token_into(&mut out, field.key());
    out.push('=');
    match field.value() {
        FieldValue::Float(value) => {
            let _ = write!(out, "{}", value);
        }
        FieldValue::Integer(value) => {
            let _ = write!(out, "{}i", value);
        }
        FieldValue::UInteger(value) => match version {
            ProtocolVersion::V1Strict => return Err(InfluxError::UnsignedNotSupported),
            ProtocolVersion::V1 => {
                // Lossy compatibility shim: v1 has no unsigned type, so values
                // above i64::MAX are clamped to it.
                let clamped = (*value).min(i64::MAX as u64);
                let _ = write!(out, "{}i", clamped);
            }
            ProtocolVersion::V2 => {
                let _ = write!(out, "{}u", value);
            }
        },
        FieldValue::Text(value) => {
            out.push('"');
            for ch in value.chars() {
                if ch == '\\' || ch == '"' {
                    out.push('\\');
                }
                out.push(ch);
            }
            out.push('"');
        }
        FieldValue::Boolean(value) => {
            out.push_str(if *value { "true" } else { "false" });
        }
    }
    Ok(out)
}

// Measurement names escape only `,` and space; a bare `=` is legal there.
fn escape_name_into(out: &mut String, name: &str) {
    for ch in name.chars() {
        if ch == ',' || ch == ' ' {
            out.push('\\');
        }
        out.push(ch);
    }
}

fn escape_token_into(out: &mut String, token: &str) {
    for ch in token.chars() {
        if ch == ',' || ch == '=' || ch == ' ' {
            out.push('\\');
        }
        out.push(ch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn measurement(name: &str) -> Measurement {
        // Resolution::None tests ignore the timestamp entirely.
        Measurement::with_timestamp(name, UNIX_EPOCH).unwrap()
    }

    #[test]
    fn minimal_line_without_timestamp() {
        let m = measurement("cpu");
        m.add_field("usage", 0.64).unwrap();
        let line =
            encode_measurement(&m, ProtocolVersion::V2, TimestampResolution::None).unwrap();
        assert_eq!(line, "cpu usage=0.64");
    }

    #[test]
    fn tags_and_fields_are_sorted_by_key() {
        let m = measurement("cpu");
        m.add_tag("zone", "z1").unwrap();
        m.add_tag("host", "a").unwrap();
        m.add_field("user", 1i64).unwrap();
        m.add_field("idle", 2i64).unwrap();
        let line =
            encode_measurement(&m, ProtocolVersion::V2, TimestampResolution::None).unwrap();
        assert_eq!(line, "cpu,host=a,zone=z1 idle=2i,user=1i");
    }

    #[test]
    fn name_escapes_comma_and_space_but_not_equals() {
        let m = measurement("my measure,ment=x");
        m.add_field("v", 1i64).unwrap();
        let line =
            encode_measurement(&m, ProtocolVersion::V2, TimestampResolution::None).unwrap();
        assert_eq!(line, "my\\ measure\\,ment=x v=1i");
    }

    #[test]
    fn tag_escapes_comma_equals_and_space() {
        let tag = Tag::new("a key", "v=1, ok").unwrap();
        assert_eq!(encode_tag(&tag), "a\\ key=v\\=1\\,\\ ok");
    }

    #[test]
    fn tag_value_backslash_and_quote_pass_through() {
        // Escaping is idempotent for characters that never need escaping in
        // a tag position.
        let tag = Tag::new("path", r#"C:\data"dir"#).unwrap();
        assert_eq!(encode_tag(&tag), r#"path=C:\data"dir"#);
    }

    #[test]
    fn string_field_escapes_backslash_and_quote_only() {
        let field = Field::new("msg", r#"say "hi" \ bye, now"#).unwrap();
        assert_eq!(
            encode_field(&field, ProtocolVersion::V2).unwrap(),
            r#"msg="say \"hi\" \\ bye, now""#
        );
    }

    #[test]
    fn float_uses_round_trip_decimal_form() {
        assert_eq!(
            encode_field(&Field::new("v", 42.0f64).unwrap(), ProtocolVersion::V2).unwrap(),
            "v=42"
        );
        assert_eq!(
            encode_field(&Field::new("v", -0.5f64).unwrap(), ProtocolVersion::V2).unwrap(),
            "v=-0.5"
        );
    }

    #[test]
    fn signed_integer_gets_i_suffix() {
        let field = Field::new("Key", -42i64).unwrap();
        assert_eq!(
            encode_field(&field, ProtocolVersion::V2).unwrap(),
            "Key=-42i"
        );
        assert_eq!(
            encode_field(&field, ProtocolVersion::V1).unwrap(),
            "Key=-42i"
        );
    }

    #[test]
    fn unsigned_integer_per_protocol_version() {
        let field = Field::new("Key", 9_223_372_036_854_775_808u64).unwrap();
        assert_eq!(
            encode_field(&field, ProtocolVersion::V2).unwrap(),
            "Key=9223372036854775808u"
        );
        // Lenient v1 clamps to i64::MAX.
        assert_eq!(
            encode_field(&field, ProtocolVersion::V1).unwrap(),
            "Key=9223372036854775807i"
        );
        assert!(matches!(
            encode_field(&field, ProtocolVersion::V1Strict),
            Err(InfluxError::UnsignedNotSupported)
        ));
    }

    #[test]
    fn small_unsigned_is_not_clamped_under_lenient_v1() {
        let field = Field::new("Key", 42u64).unwrap();
        assert_eq!(
            encode_field(&field, ProtocolVersion::V1).unwrap(),
            "Key=42i"
        );
    }

    #[test]
    fn booleans_are_literal() {
        assert_eq!(
            encode_field(&Field::new("on", true).unwrap(), ProtocolVersion::V2).unwrap(),
            "on=true"
        );
        assert_eq!(
            encode_field(&Field::new("on", false).unwrap(), ProtocolVersion::V2).unwrap(),
            "on=false"
        );
    }

    #[test]
    fn no_fields_is_an_error() {
        let m = measurement("cpu");
        assert!(matches!(
            encode_measurement(&m, ProtocolVersion::V2, TimestampResolution::None),
            Err(InfluxError::NoFields)
        ));
    }

    #[test]
    fn pre_epoch_timestamp_is_an_error() {
        let before = UNIX_EPOCH.checked_sub(Duration::from_secs(1)).unwrap();
        let m = Measurement::with_timestamp("cpu", before).unwrap();
        m.add_field("v", 1i64).unwrap();
        assert!(matches!(
            encode_measurement(&m, ProtocolVersion::V2, TimestampResolution::Nanoseconds),
            Err(InfluxError::TimestampBeforeEpoch)
        ));
        // The timestamp is validated even when no column is rendered.
        assert!(matches!(
            encode_measurement(&m, ProtocolVersion::V2, TimestampResolution::None),
            Err(InfluxError::TimestampBeforeEpoch)
        ));
    }

    #[test]
    fn timestamp_scaling_truncates_toward_zero() {
        let instant = UNIX_EPOCH + Duration::new(1_700_000_123, 456_789_999);
        let m = Measurement::with_timestamp("t", instant).unwrap();
        m.add_field("v", 1i64).unwrap();

        let render = |resolution| {
            encode_measurement(&m, ProtocolVersion::V2, resolution)
                .unwrap()
                .rsplit(' ')
                .next()
                .unwrap()
                .parse::<u128>()
                .unwrap()
        };

        let ns = render(TimestampResolution::Nanoseconds);
        let us = render(TimestampResolution::Microseconds);
        let ms = render(TimestampResolution::Milliseconds);
        let s = render(TimestampResolution::Seconds);
        assert_eq!(ns, 1_700_000_123_456_789_999);
        assert_eq!(us, ns / 1_000);
        assert_eq!(ms, ns / 1_000_000);
        assert_eq!(s, ns / 1_000_000_000);
    }

    #[test]
    fn rendering_is_deterministic() {
        let m = measurement("cpu");
        m.add_tag("host", "a").unwrap();
        m.add_field("v", 1i64).unwrap();
        let a = encode_measurement(&m, ProtocolVersion::V2, TimestampResolution::Seconds).unwrap();
        let b = encode_measurement(&m, ProtocolVersion::V2, TimestampResolution::Seconds).unwrap();
        assert_eq!(a, b);
    }
}
