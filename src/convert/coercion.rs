use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::{
    error::CoercionError,
    geofile::{feature::AttributeValue, feature::FeatureId, schema::FieldType},
    geofile::DEFAULT_BLANK_SENTINEL,
};

use super::diagnostics::Warning;

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M",
];

const NAIVE_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

/// Convert a raw value to `target`.
///
/// Null, empty and whitespace-only input yields `AttributeValue::Null`, and so does the
/// import blank sentinel for every type but `String`. Strings are kept verbatim. Parsing
/// is culture invariant: `.` is the only decimal separator and dates are ISO 8601 or
/// `MM/dd/yyyy`, normalized to UTC. Any other parse failure is an error; callers null
/// the value and warn.
pub fn coerce(raw: Option<&str>, target: FieldType) -> Result<AttributeValue, CoercionError> {
    let raw = match raw {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Ok(AttributeValue::Null),
    };
    let trimmed = raw.trim();
    if target != FieldType::String && trimmed.eq_ignore_ascii_case(DEFAULT_BLANK_SENTINEL) {
        return Ok(AttributeValue::Null);
    }
    let fail = |message: String| CoercionError {
        raw: raw.to_string(),
        target,
        message,
    };

    match target {
        FieldType::String => Ok(AttributeValue::Text(raw.to_string())),
        FieldType::Int32 => trimmed
            .parse::<i32>()
            .map(|value| AttributeValue::Int(value as i64))
            .map_err(|err| fail(err.to_string())),
        FieldType::Int64 => trimmed
            .parse::<i64>()
            .map(AttributeValue::Int)
            .map_err(|err| fail(err.to_string())),
        FieldType::Double => trimmed
            .parse::<f64>()
            .map(AttributeValue::Float)
            .map_err(|err| fail(err.to_string())),
        FieldType::Single => {
            let value = trimmed.parse::<f64>().map_err(|err| fail(err.to_string()))?;
            if value.is_finite() && value.abs() > f32::MAX as f64 {
                return Err(fail("value is out of range for a single precision float".into()));
            }
            Ok(AttributeValue::Float(value))
        }
        FieldType::Decimal => {
            if !is_decimal_literal(trimmed) {
                return Err(fail("not a decimal number".into()));
            }
            trimmed
                .parse::<f64>()
                .map(AttributeValue::Float)
                .map_err(|err| fail(err.to_string()))
        }
        FieldType::Bool => {
            if trimmed.eq_ignore_ascii_case("true") {
                Ok(AttributeValue::Bool(true))
            } else if trimmed.eq_ignore_ascii_case("false") {
                Ok(AttributeValue::Bool(false))
            } else {
                Err(fail("expected 'True' or 'False'".into()))
            }
        }
        FieldType::DateTime => parse_datetime(trimmed)
            .map(AttributeValue::DateTime)
            .ok_or_else(|| fail("not a recognized date/time".into())),
    }
}

/// Convert an already built value to `target` through its text form.
pub fn coerce_value(
    value: &AttributeValue,
    target: FieldType,
) -> Result<AttributeValue, CoercionError> {
    match (value, target) {
        (AttributeValue::Int(_), FieldType::Int64)
        | (AttributeValue::Float(_), FieldType::Double)
        | (AttributeValue::Bool(_), FieldType::Bool)
        | (AttributeValue::DateTime(_), FieldType::DateTime) => Ok(value.clone()),
        (AttributeValue::Int(int), FieldType::Double) => Ok(AttributeValue::Float(*int as f64)),
        _ => coerce(value.to_raw().as_deref(), target),
    }
}

/// Coerce one attribute of one feature; failures become a null value plus a warning.
pub fn coerce_or_warn(
    value: &AttributeValue,
    field_name: &str,
    target: FieldType,
    feature: FeatureId,
) -> (AttributeValue, Option<Warning>) {
    match coerce_value(value, target) {
        Ok(coerced) => (coerced, None),
        Err(err) => {
            let warning = Warning::value(
                feature,
                field_name,
                format!(
                    "Field '{}' (feature {}) value '{}' failed to convert to {}: {}. Set to NULL.",
                    field_name, feature, err.raw, err.target, err.message
                ),
            );
            log::warn!("{}", warning.message);
            (AttributeValue::Null, Some(warning))
        }
    }
}

/// Esri JSON alias: the first 7 characters of names longer than 7, otherwise the name.
pub fn esri_alias(name: &str) -> String {
    if name.chars().count() > 7 {
        name.chars().take(7).collect()
    } else {
        name.to_string()
    }
}

fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(zoned) = DateTime::parse_from_rfc3339(text) {
        return Some(zoned.with_timezone(&Utc));
    }
    if let Ok(zoned) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(zoned.with_timezone(&Utc));
    }
    // Unzoned values are taken as UTC.
    let unzoned = text.strip_suffix('Z').unwrap_or(text);
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(unzoned, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for format in NAIVE_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(unzoned, format) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|naive| Utc.from_utc_datetime(&naive));
        }
    }
    None
}

/// Optional sign, digits with at most one `.`, no exponent.
fn is_decimal_literal(text: &str) -> bool {
    let unsigned = text.strip_prefix(&['+', '-'][..]).unwrap_or(text);
    let mut digits = 0;
    let mut dots = 0;
    for c in unsigned.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' => dots += 1,
            _ => return false,
        }
    }
    digits > 0 && dots <= 1
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_blank_input_is_null_for_every_type(
        #[values(None, Some(""), Some("   "))] raw: Option<&str>,
        #[values(
            FieldType::String,
            FieldType::Int32,
            FieldType::Int64,
            FieldType::Double,
            FieldType::Single,
            FieldType::Decimal,
            FieldType::Bool,
            FieldType::DateTime
        )]
        target: FieldType,
    ) {
        assert_eq!(coerce(raw, target).unwrap(), AttributeValue::Null);
    }

    #[rstest]
    #[case(FieldType::Int64, AttributeValue::Null)]
    #[case(FieldType::Int32, AttributeValue::Null)]
    #[case(FieldType::Double, AttributeValue::Null)]
    #[case(FieldType::Bool, AttributeValue::Null)]
    #[case(FieldType::DateTime, AttributeValue::Null)]
    #[case(FieldType::String, AttributeValue::Text("nan".into()))]
    fn test_blank_sentinel_is_null_for_typed_fields(
        #[case] target: FieldType,
        #[case] expected: AttributeValue,
    ) {
        assert_eq!(coerce(Some("nan"), target).unwrap(), expected);
        let (value, warning) =
            coerce_or_warn(&AttributeValue::Text("nan".into()), "rank", target, 1);
        assert_eq!(value, expected);
        assert!(warning.is_none());
    }

    #[rstest]
    #[case(" Pittsburgh  PA ", FieldType::String, AttributeValue::Text(" Pittsburgh  PA ".into()))]
    #[case("42", FieldType::Int32, AttributeValue::Int(42))]
    #[case(" -7 ", FieldType::Int32, AttributeValue::Int(-7))]
    #[case("9000000000", FieldType::Int64, AttributeValue::Int(9_000_000_000))]
    #[case("40.4", FieldType::Double, AttributeValue::Float(40.4))]
    #[case("1e3", FieldType::Double, AttributeValue::Float(1000.0))]
    #[case("0.5", FieldType::Single, AttributeValue::Float(0.5))]
    #[case("-12.25", FieldType::Decimal, AttributeValue::Float(-12.25))]
    #[case("TRUE", FieldType::Bool, AttributeValue::Bool(true))]
    #[case("false", FieldType::Bool, AttributeValue::Bool(false))]
    fn test_coerce_valid(
        #[case] raw: &str,
        #[case] target: FieldType,
        #[case] expected: AttributeValue,
    ) {
        assert_eq!(coerce(Some(raw), target).unwrap(), expected);
    }

    #[rstest]
    #[case("abc", FieldType::Double)]
    #[case("1,5", FieldType::Double)]
    #[case("3000000000", FieldType::Int32)]
    #[case("1.5", FieldType::Int64)]
    #[case("1e5", FieldType::Decimal)]
    #[case("1e39", FieldType::Single)]
    #[case("yes", FieldType::Bool)]
    #[case("31/31/2020", FieldType::DateTime)]
    fn test_coerce_invalid(#[case] raw: &str, #[case] target: FieldType) {
        let err = coerce(Some(raw), target).unwrap_err();
        assert_eq!(err.raw, raw);
        assert_eq!(err.target, target);
    }

    #[rstest]
    #[case("2020-03-04T05:06:07Z")]
    #[case("2020-03-04T05:06:07")]
    #[case("2020-03-04 05:06:07")]
    #[case("2020-03-04T07:06:07+02:00")]
    #[case("03/04/2020 05:06:07")]
    fn test_coerce_datetime_normalizes_to_utc(#[case] raw: &str) {
        let expected = Utc.with_ymd_and_hms(2020, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            coerce(Some(raw), FieldType::DateTime).unwrap(),
            AttributeValue::DateTime(expected)
        );
    }

    #[rstest]
    fn test_coerce_date_only_is_midnight_utc() {
        let expected = Utc.with_ymd_and_hms(2021, 12, 31, 0, 0, 0).unwrap();
        assert_eq!(
            coerce(Some("2021-12-31"), FieldType::DateTime).unwrap(),
            AttributeValue::DateTime(expected)
        );
    }

    #[rstest]
    fn test_coerce_value_goes_through_text() {
        assert_eq!(
            coerce_value(&AttributeValue::Int(3), FieldType::Double).unwrap(),
            AttributeValue::Float(3.0)
        );
        assert_eq!(
            coerce_value(&AttributeValue::Float(2.5), FieldType::String).unwrap(),
            AttributeValue::Text("2.5".into())
        );
        assert!(coerce_value(&AttributeValue::Float(2.5), FieldType::Int32).is_err());
    }

    #[rstest]
    fn test_coerce_or_warn_names_field_feature_and_value() {
        let (value, warning) =
            coerce_or_warn(&AttributeValue::Text("abc".into()), "area", FieldType::Double, 3);
        assert_eq!(value, AttributeValue::Null);
        let warning = warning.unwrap();
        assert_eq!(warning.feature, Some(3));
        assert_eq!(warning.field.as_deref(), Some("area"));
        assert!(warning.message.contains("'abc'"));
        assert!(warning.message.contains("Double"));
    }

    #[rstest]
    #[case("name", "name")]
    #[case("seven77", "seven77")]
    #[case("population", "populat")]
    #[case("", "")]
    fn test_esri_alias(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(esri_alias(name), expected);
    }
}
