use std::sync::OnceLock;

use regex::Regex;
use time::{Date, Month};

use crate::value::Value;

/// Fixed three-letter month table used by the `D-MMM-YY` pattern.
const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

fn cached(cell: &'static OnceLock<Regex>, pattern: &'static str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("built-in coercion pattern must compile"))
}

fn int_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"^[1-9]\d*$")
}

fn float_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"^(?:\d+\.\d*|\d*\.\d+)$")
}

fn month_name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"^([A-Za-z]{3}),?\s+(\d{1,2}),?\s+(\d{4})$")
}

fn day_month_year_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"^(\d{1,2})-([A-Za-z]{3})-(\d{2}|\d{4})$")
}

fn iso_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"^(\d{4})[-/](\d{1,2})[-/](\d{1,2})$")
}

fn day_first_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"^(\d{1,2})[-/](\d{1,2})[-/](\d{4})$")
}

/// Coerces one raw cell into a typed value.
///
/// Empty and all-whitespace cells are absent. Otherwise the first match
/// wins: integer (no leading zero, so zero-padded identifiers stay
/// strings), date, float, trimmed string.
#[must_use]
pub fn coerce(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if int_pattern().is_match(trimmed)
        && let Ok(v) = trimmed.parse::<i64>()
    {
        return Some(Value::Int(v));
    }
    if let Some(date) = coerce_date(trimmed) {
        return Some(Value::Date(date));
    }
    if float_pattern().is_match(trimmed)
        && let Ok(v) = trimmed.parse::<f64>()
    {
        return Some(Value::Float(v));
    }
    Some(Value::Str(trimmed.to_owned()))
}

/// Attempts every recognised date pattern against a trimmed cell.
///
/// Calendar-invalid matches (month 13, day 32) fall through to the
/// remaining coercion steps rather than failing the row.
#[must_use]
pub fn coerce_date(trimmed: &str) -> Option<Date> {
    if let Some(caps) = month_name_pattern().captures(trimmed) {
        let month = month_number(&caps[1])?;
        return calendar_date(parse_component(&caps[3])?, month, parse_component(&caps[2])?);
    }
    if let Some(caps) = day_month_year_pattern().captures(trimmed) {
        let month = month_number(&caps[2])?;
        let year = expand_year(parse_component(&caps[3])?);
        return calendar_date(year, month, parse_component(&caps[1])?);
    }
    if let Some(caps) = iso_pattern().captures(trimmed) {
        return calendar_date(
            parse_component(&caps[1])?,
            parse_component(&caps[2])?,
            parse_component(&caps[3])?,
        );
    }
    if let Some(caps) = day_first_pattern().captures(trimmed) {
        return calendar_date(
            parse_component(&caps[3])?,
            parse_component(&caps[2])?,
            parse_component(&caps[1])?,
        );
    }
    None
}

fn parse_component(s: &str) -> Option<i32> {
    s.parse::<i32>().ok()
}

fn month_number(name: &str) -> Option<i32> {
    let lowered = name.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == lowered)
        .map(|index| index as i32 + 1)
}

/// Two-digit years pivot at 70: `<70` lands in the 2000s.
fn expand_year(year: i32) -> i32 {
    if year >= 100 {
        year
    } else if year < 70 {
        2000 + year
    } else {
        1900 + year
    }
}

fn calendar_date(year: i32, month: i32, day: i32) -> Option<Date> {
    let month = u8::try_from(month).ok().and_then(|m| Month::try_from(m).ok())?;
    let day = u8::try_from(day).ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u8, day: u8) -> Date {
        Date::from_calendar_date(year, Month::try_from(month).expect("month"), day).expect("date")
    }

    #[test]
    fn empty_cells_are_absent() {
        assert_eq!(coerce(""), None);
        assert_eq!(coerce("   "), None);
    }

    #[test]
    fn integers_require_nonzero_leading_digit() {
        assert_eq!(coerce("42"), Some(Value::Int(42)));
        assert_eq!(coerce("007"), Some(Value::Str("007".into())));
        assert_eq!(coerce("0"), Some(Value::Str("0".into())));
    }

    #[test]
    fn floats_need_a_decimal_point() {
        assert_eq!(coerce("3.25"), Some(Value::Float(3.25)));
        assert_eq!(coerce(".5"), Some(Value::Float(0.5)));
        assert_eq!(coerce("2."), Some(Value::Float(2.0)));
        assert_eq!(coerce("."), Some(Value::Str(".".into())));
    }

    #[test]
    fn month_name_dates_allow_optional_commas() {
        assert_eq!(coerce("Apr 29, 2020"), Some(Value::Date(date(2020, 4, 29))));
        assert_eq!(coerce("apr 29 2020"), Some(Value::Date(date(2020, 4, 29))));
    }

    #[test]
    fn dashed_month_dates_expand_two_digit_years() {
        assert_eq!(coerce("5-Jan-20"), Some(Value::Date(date(2020, 1, 5))));
        assert_eq!(coerce("5-Jan-85"), Some(Value::Date(date(1985, 1, 5))));
        assert_eq!(coerce("5-Jan-1999"), Some(Value::Date(date(1999, 1, 5))));
    }

    #[test]
    fn numeric_dates_cover_both_orders() {
        assert_eq!(coerce("2020-4-9"), Some(Value::Date(date(2020, 4, 9))));
        assert_eq!(coerce("2020/04/09"), Some(Value::Date(date(2020, 4, 9))));
        assert_eq!(coerce("9/4/2020"), Some(Value::Date(date(2020, 4, 9))));
        assert_eq!(coerce("9-4-2020"), Some(Value::Date(date(2020, 4, 9))));
    }

    #[test]
    fn invalid_calendar_dates_fall_through() {
        // Month 13 matches the day-first pattern but is not a date.
        assert_eq!(coerce("9/13/2020"), Some(Value::Str("9/13/2020".into())));
    }

    #[test]
    fn everything_else_is_a_trimmed_string() {
        assert_eq!(coerce("  hello  "), Some(Value::Str("hello".into())));
        assert_eq!(coerce("-3"), Some(Value::Str("-3".into())));
    }
}
