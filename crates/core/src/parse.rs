//! Numeric parsing of raw OCR text.
//!
//! OCR output mixes up grouping and fraction separators across locales, so a
//! lone `,` or `.` is resolved by shape: digit groups of exactly three are
//! thousands, one or two trailing digits are a fraction.

use std::sync::OnceLock;

use regex::Regex;

const WHITESPACE: &[char] = &[' ', '\u{00A0}', '\u{202F}', '\n', '\r', '\t'];
const APOSTROPHES: &[char] = &['\'', '\u{2019}'];

struct Patterns {
    token: Regex,
    comma_groups: Regex,
    dot_groups: Regex,
    comma_fraction: Regex,
    dot_fraction: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        token: Regex::new(r"[\d.,'\x{2019}]+").expect("static regex"),
        comma_groups: Regex::new(r"^\d+(,\d{3})+$").expect("static regex"),
        dot_groups: Regex::new(r"^\d+(\.\d{3})+$").expect("static regex"),
        comma_fraction: Regex::new(r",\d{1,2}$").expect("static regex"),
        dot_fraction: Regex::new(r"\.\d{1,2}$").expect("static regex"),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Separators {
    None,
    Thousands(char),
    Decimal(char),
    Both { thousands: char, decimal: char },
}

fn classify(token: &str) -> Separators {
    let p = patterns();
    match (token.rfind(','), token.rfind('.')) {
        (Some(comma), Some(dot)) => {
            if comma > dot {
                Separators::Both { thousands: '.', decimal: ',' }
            } else {
                Separators::Both { thousands: ',', decimal: '.' }
            }
        }
        (Some(_), None) => single(token, ',', &p.comma_groups, &p.comma_fraction),
        (None, Some(_)) => single(token, '.', &p.dot_groups, &p.dot_fraction),
        (None, None) => Separators::None,
    }
}

fn single(token: &str, sep: char, groups: &Regex, fraction: &Regex) -> Separators {
    if groups.is_match(token) {
        Separators::Thousands(sep)
    } else if fraction.is_match(token) {
        Separators::Decimal(sep)
    } else {
        Separators::Thousands(sep)
    }
}

/// Parse the first numeric run in `text`. Returns `None` when no digits are
/// found or the cleaned token does not convert.
pub fn parse_numeric(text: &str) -> Option<f64> {
    let cleaned: String = text.chars().filter(|c| !WHITESPACE.contains(c)).collect();
    let found = patterns().token.find(&cleaned)?;
    let token: String = found.as_str().chars().filter(|c| !APOSTROPHES.contains(c)).collect();

    let normalized: String = match classify(&token) {
        Separators::None => token,
        Separators::Thousands(_) => token.replace([',', '.'], ""),
        Separators::Decimal(sep) => token.replace(sep, "."),
        Separators::Both { thousands, decimal } => {
            token.replace(thousands, "").replace(decimal, ".")
        }
    };

    normalized.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grouped_thousands() {
        assert_eq!(parse_numeric("1,234,567"), Some(1_234_567.0));
        assert_eq!(parse_numeric("12.345.678"), Some(12_345_678.0));
        assert_eq!(parse_numeric("1,234"), Some(1234.0));
        assert_eq!(parse_numeric("987.000"), Some(987_000.0));
    }

    #[test]
    fn test_last_separator_is_decimal() {
        assert_eq!(parse_numeric("1.234,56"), Some(1234.56));
        assert_eq!(parse_numeric("1,234.56"), Some(1234.56));
    }

    #[test]
    fn test_short_trailing_group_is_decimal() {
        assert_eq!(parse_numeric("1234,5"), Some(1234.5));
        assert_eq!(parse_numeric("99.95"), Some(99.95));
    }

    #[test]
    fn test_irregular_groups_default_to_thousands() {
        assert_eq!(parse_numeric("12,3456"), Some(123_456.0));
        assert_eq!(parse_numeric("1.2345"), Some(12_345.0));
    }

    #[test]
    fn test_no_numeric_content() {
        assert_eq!(parse_numeric("K K K"), None);
        assert_eq!(parse_numeric(""), None);
        assert_eq!(parse_numeric(",,"), None);
    }

    #[test]
    fn test_whitespace_and_apostrophes_are_ignored() {
        assert_eq!(parse_numeric(" 1 234\u{00A0}567 "), Some(1_234_567.0));
        assert_eq!(parse_numeric("1'234'567"), Some(1_234_567.0));
        assert_eq!(parse_numeric("12\u{2019}500"), Some(12_500.0));
        assert_eq!(parse_numeric("4\u{202F}800\n"), Some(4800.0));
    }

    #[test]
    fn test_first_run_wins() {
        assert_eq!(parse_numeric("K1,500K"), Some(1500.0));
        assert_eq!(parse_numeric("abc 42 def 7"), Some(42.0));
    }

    #[test]
    fn test_unconvertible_token() {
        assert_eq!(parse_numeric("12,34,5"), None);
    }
}
