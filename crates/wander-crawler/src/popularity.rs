//! Lenient parsing of free-text popularity signals such as `"1.2M views"`.

const SENTINELS: &[&str] = &["unknown", "n/a", "na", "none", "-", "неизвестно"];

// Matched against the whole token following the number, case-folded.
const MULTIPLIERS: &[(&str, f64)] = &[
    ("k", 1e3),
    ("thousand", 1e3),
    ("tsd", 1e3),
    ("тыс", 1e3),
    ("m", 1e6),
    ("mn", 1e6),
    ("million", 1e6),
    ("millions", 1e6),
    ("mio", 1e6),
    ("млн", 1e6),
    ("b", 1e9),
    ("bn", 1e9),
    ("billion", 1e9),
    ("billions", 1e9),
    ("mrd", 1e9),
    ("млрд", 1e9),
];

/// Parses a popularity string into a plain count.
///
/// Thumbnail URLs, sentinels and anything without digits parse to `0`.
pub fn parse_popularity(raw: &str) -> u64 {
    let text = raw.trim().to_lowercase();
    if text.is_empty() || SENTINELS.contains(&text.as_str()) || is_url(&text) {
        return 0;
    }

    let start = match text.find(|c: char| c.is_ascii_digit()) {
        Some(start) => start,
        None => return 0,
    };
    let rest = &text[start..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || is_separator(c)))
        .unwrap_or(rest.len());
    let (number, suffix) = rest.split_at(end);

    let token = suffix
        .trim_start()
        .split(|c: char| c.is_whitespace())
        .next()
        .unwrap_or("")
        .trim_end_matches(['.', ',']);

    match multiplier(token) {
        Some(mult) => {
            let normalized = number
                .chars()
                .filter(|c| !c.is_whitespace())
                .map(|c| if c == ',' { '.' } else { c })
                .collect::<String>();
            match normalized.trim_end_matches('.').parse::<f64>() {
                Ok(value) if value.is_finite() && value >= 0.0 => (value * mult).round() as u64,
                _ => 0,
            }
        }
        None => number
            .chars()
            .filter(char::is_ascii_digit)
            .collect::<String>()
            .parse()
            .unwrap_or(0),
    }
}

fn is_separator(c: char) -> bool {
    matches!(c, '.' | ',' | ' ' | '\u{a0}' | '\u{202f}')
}

fn is_url(text: &str) -> bool {
    text.starts_with("http") || text.starts_with("//") || text.contains("://") || text.starts_with("data:")
}

fn multiplier(token: &str) -> Option<f64> {
    MULTIPLIERS
        .iter()
        .find(|(name, _)| *name == token)
        .map(|(_, mult)| *mult)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffixed_values() {
        assert_eq!(1_200_000, parse_popularity("1.2M"));
        assert_eq!(15_000, parse_popularity("15K"));
        assert_eq!(15_000, parse_popularity("15k views"));
        assert_eq!(3_000_000_000, parse_popularity("3B"));
        assert_eq!(2_500, parse_popularity("2.5 thousand"));
    }

    #[test]
    fn localized_values() {
        assert_eq!(1_200_000, parse_popularity("1,2 млн просмотров"));
        assert_eq!(45_000, parse_popularity("45 тыс. просмотров"));
        assert_eq!(2_000_000_000, parse_popularity("2 млрд"));
        assert_eq!(3_400_000, parse_popularity("3,4 Mio. Aufrufe"));
    }

    #[test]
    fn plain_digits_with_grouping() {
        assert_eq!(42, parse_popularity("42"));
        assert_eq!(1_234_567, parse_popularity("1,234,567 views"));
        assert_eq!(12_345, parse_popularity("12\u{a0}345 просмотров"));
    }

    #[test]
    fn words_after_number_are_not_multipliers() {
        assert_eq!(3, parse_popularity("3 months ago"));
        assert_eq!(7, parse_popularity("7 bananas"));
    }

    #[test]
    fn garbage_parses_to_zero() {
        assert_eq!(0, parse_popularity(""));
        assert_eq!(0, parse_popularity("abc"));
        assert_eq!(0, parse_popularity("Unknown"));
        assert_eq!(0, parse_popularity("https://i.ytimg.com/vi/x1/hq720.jpg"));
        assert_eq!(0, parse_popularity("1.2.3M"));
    }
}
