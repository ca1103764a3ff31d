use std::str::FromStr;
use tokio::time::Duration;

/// Parses a duration string in the format "500ms", "30s", "10m", "5h", "3d".
///
/// Supported units:
/// - `ms` for milliseconds
/// - `s` for seconds
/// - `m` for minutes
/// - `h` for hours
/// - `d` for days
pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration string cannot be empty".to_string());
    }

    let (value_str, unit) = match s.strip_suffix("ms") {
        Some(rest) => (rest, "ms"),
        None => s.split_at(s.len() - s.chars().last().map_or(0, char::len_utf8)),
    };

    let value = u64::from_str(value_str)
        .map_err(|_| format!("Invalid numeric value in duration: '{}'", value_str))?;

    let seconds_per_unit: u64 = match unit {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => {
            return Err(format!(
                "Unknown duration unit: '{}'. Use 'ms', 's', 'm', 'h', or 'd'.",
                unit
            ))
        }
    };

    value
        .checked_mul(seconds_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("Duration '{}' is too large", s))
}

/// Renders a body for log output, cut to at most `limit` bytes.
///
/// Invalid UTF-8 is replaced and the cut never splits a character.
/// Truncated output is marked with a trailing `...`.
pub fn truncate_for_log(body: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= limit {
        return text.into_owned();
    }

    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    mod duration {
        use super::*;

        #[test]
        fn parse_milliseconds() {
            assert_eq!(
                parse_duration_string("250ms").unwrap(),
                Duration::from_millis(250)
            );
        }

        #[test]
        fn parse_seconds() {
            assert_eq!(
                parse_duration_string("30s").unwrap(),
                Duration::from_secs(30)
            );
        }

        #[test]
        fn parse_minutes() {
            assert_eq!(
                parse_duration_string("10m").unwrap(),
                Duration::from_secs(600)
            );
        }

        #[test]
        fn parse_hours_and_days() {
            assert_eq!(
                parse_duration_string("5h").unwrap(),
                Duration::from_secs(18000)
            );
            assert_eq!(
                parse_duration_string("3d").unwrap(),
                Duration::from_secs(259200)
            );
        }

        #[test]
        fn trims_whitespace() {
            assert_eq!(
                parse_duration_string("  10m  ").unwrap(),
                Duration::from_secs(600)
            );
        }

        #[test]
        fn empty_string_errors() {
            let err = parse_duration_string("   ").unwrap_err();
            assert!(err.contains("empty"), "error was: {}", err);
        }

        #[test]
        fn unknown_suffix_errors() {
            let err = parse_duration_string("10x").unwrap_err();
            assert!(err.contains("Unknown duration unit"), "error was: {}", err);
        }

        #[test]
        fn no_suffix_errors() {
            let err = parse_duration_string("10").unwrap_err();
            assert!(err.contains("Unknown duration unit"), "error was: {}", err);
        }

        #[test]
        fn bad_numbers_error() {
            for input in ["m", "5.5h", "-5m", "abcms"] {
                let err = parse_duration_string(input).unwrap_err();
                assert!(err.contains("Invalid numeric"), "{}: {}", input, err);
            }
        }

        #[test]
        fn overflowing_values_error() {
            for input in ["18446744073709551615d", "307445734561825861h", "307445734561825861m"] {
                let err = parse_duration_string(input).unwrap_err();
                assert!(err.contains("too large"), "{}: {}", input, err);
            }
            assert_eq!(
                parse_duration_string("18446744073709551615s").unwrap(),
                Duration::from_secs(u64::MAX)
            );
        }
    }

    mod truncate {
        use super::*;

        #[test]
        fn short_bodies_are_unchanged() {
            assert_eq!(truncate_for_log(b"{\"ok\":true}", 64), "{\"ok\":true}");
        }

        #[test]
        fn long_bodies_are_cut() {
            assert_eq!(truncate_for_log(b"abcdefgh", 3), "abc...");
        }

        #[test]
        fn cut_respects_char_boundaries() {
            let body = "ééé".as_bytes();
            assert_eq!(truncate_for_log(body, 3), "é...");
        }
    }
}
