//! Strict parsing helpers shared by the rules.

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;

/// Canadian postal code: letter-digit-letter digit-letter-digit, no space.
/// First letters D, F, I, O, Q, U, W, Z are never issued.
const POSTAL_CODE_PATTERN: &str = r"(?i)^[ABCEGHJ-NPRSTVXY]\d[ABCEGHJ-NPRSTV-Z]\d[ABCEGHJ-NPRSTV-Z]\d$";

static POSTAL_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(POSTAL_CODE_PATTERN).expect("valid regex"));

/// Earliest course session year the registry accepts.
pub const MIN_SESSION_YEAR: i32 = 1984;

fn all_digits(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_digit())
}

/// Parse a `yyyyMMdd` date with strict calendar resolution.
///
/// `20230230` is rejected rather than rolled over into March.
pub fn parse_yyyymmdd(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if !all_digits(s, 8) {
        return None;
    }
    let year: i32 = s[0..4].parse().ok()?;
    let month: u32 = s[4..6].parse().ok()?;
    let day: u32 = s[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// First day of a `yyyyMM` session.
pub fn parse_yyyymm(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if !all_digits(s, 6) {
        return None;
    }
    let year: i32 = s[0..4].parse().ok()?;
    let month: u32 = s[4..6].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, 1)
}

/// Age in completed years on `on`.
pub fn age_in_years(birthdate: NaiveDate, on: NaiveDate) -> i32 {
    let mut age = on.year() - birthdate.year();
    if (on.month(), on.day()) < (birthdate.month(), birthdate.day()) {
        age -= 1;
    }
    age
}

pub fn is_canadian_postal_code(s: &str) -> bool {
    POSTAL_CODE_RE.is_match(s.trim())
}

/// Exactly two ASCII letters, any case.
pub fn is_country_code(s: &str) -> bool {
    let s = s.trim();
    s.len() == 2 && s.bytes().all(|b| b.is_ascii_alphabetic())
}

/// Whole-number percentage in `0..=100`.
pub fn parse_percent(s: &str) -> Option<u8> {
    let s = s.trim();
    if s.is_empty() || s.len() > 3 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<u8>().ok().filter(|p| *p <= 100)
}

/// Whole number of credits in `0..=4`.
pub fn parse_credits(s: &str) -> Option<u8> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<u8>().ok().filter(|c| *c <= 4)
}

/// Validate a nine-digit PEN against its mod-10 check digit.
///
/// Digits in odd positions (1st, 3rd, 5th, 7th) are summed. Digits in even
/// positions form a number that is doubled; the digits of the product are
/// added to the sum. The check digit is `(10 - sum % 10) % 10`.
pub fn pen_check_digit_valid(pen: &str) -> bool {
    let pen = pen.trim();
    if !all_digits(pen, 9) {
        return false;
    }
    let digits: Vec<u32> = pen.bytes().map(|b| u32::from(b - b'0')).collect();

    let odd_sum: u32 = digits[..8].iter().step_by(2).sum();
    let even_number: u64 = digits[1..8]
        .iter()
        .step_by(2)
        .fold(0u64, |acc, d| acc * 10 + u64::from(*d));
    let doubled_digit_sum: u32 = (even_number * 2)
        .to_string()
        .bytes()
        .map(|b| u32::from(b - b'0'))
        .sum();

    let check = (10 - (odd_sum + doubled_digit_sum) % 10) % 10;
    check == digits[8]
}

/// Escape a user-submitted value before echoing it into a message.
pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            _ => out.push(c),
        }
    }
    out
}

/// Case-insensitive comparison of two optional submitted values, treating
/// surrounding whitespace and blank-vs-missing as equal.
pub fn same_text(a: Option<&str>, b: Option<&str>) -> bool {
    let a = a.map(str::trim).unwrap_or("");
    let b = b.map(str::trim).unwrap_or("");
    a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_date_rejects_impossible_days() {
        assert!(parse_yyyymmdd("20230230").is_none());
        assert!(parse_yyyymmdd("20231301").is_none());
        assert!(parse_yyyymmdd("2023-01-01").is_none());
        assert!(parse_yyyymmdd("2023011").is_none());
        assert_eq!(
            parse_yyyymmdd("20240229"),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
    }

    #[test]
    fn session_parses_first_of_month() {
        assert_eq!(parse_yyyymm("202406"), NaiveDate::from_ymd_opt(2024, 6, 1));
        assert!(parse_yyyymm("202413").is_none());
        assert!(parse_yyyymm("2024").is_none());
    }

    #[test]
    fn age_counts_completed_years() {
        let born = NaiveDate::from_ymd_opt(2006, 9, 15).unwrap();
        assert_eq!(age_in_years(born, NaiveDate::from_ymd_opt(2024, 9, 14).unwrap()), 17);
        assert_eq!(age_in_years(born, NaiveDate::from_ymd_opt(2024, 9, 15).unwrap()), 18);
    }

    #[test]
    fn postal_code_pattern() {
        assert!(is_canadian_postal_code("V8W2Y2"));
        assert!(is_canadian_postal_code("v8w2y2"));
        assert!(!is_canadian_postal_code("V8W 2Y2"));
        assert!(!is_canadian_postal_code("D8W2Y2"));
        assert!(!is_canadian_postal_code("90210"));
    }

    #[test]
    fn country_code_is_two_letters() {
        assert!(is_country_code("CA"));
        assert!(is_country_code("us"));
        assert!(!is_country_code("CAN"));
        assert!(!is_country_code("C1"));
    }

    #[test]
    fn percent_bounds() {
        assert_eq!(parse_percent("100"), Some(100));
        assert_eq!(parse_percent("0"), Some(0));
        assert_eq!(parse_percent("101"), None);
        assert_eq!(parse_percent("8.5"), None);
        assert_eq!(parse_percent("-1"), None);
    }

    #[test]
    fn pen_check_digit() {
        assert!(pen_check_digit_valid("120164447"));
        assert!(!pen_check_digit_valid("120164448"));
        assert!(!pen_check_digit_valid("12016444"));
        assert!(!pen_check_digit_valid("12016444A"));
    }

    #[test]
    fn html_is_escaped() {
        assert_eq!(escape_html("a<b>&\"c'"), "a&lt;b&gt;&amp;&quot;c&#x27;");
    }

    #[test]
    fn same_text_ignores_case_and_blank() {
        assert!(same_text(Some(" Smith"), Some("SMITH ")));
        assert!(same_text(None, Some("  ")));
        assert!(!same_text(Some("Smith"), Some("Smyth")));
    }
}
