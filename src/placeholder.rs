//! Placeholder expansion for template string values.
//!
//! A template string is either a literal, returned unchanged, or one of the
//! directives below, which is resolved to a fresh concrete value on every call:
//!
//! | Directive | Result |
//! |---|---|
//! | `RANDOM_INT(min,max)` | integer in `[min, max]` |
//! | `RANDOM_FLOAT(min,max)` | float in `[min, max)` |
//! | `RANDOM_STRING(a,b,c)` | one of the options |
//! | `RANDOM_BOOL` | `true` or `false` |
//! | `RANDOM_DATE(2024-01-01,2024-12-31)` | `YYYY-MM-DD` date in the inclusive range |
//! | `RANDOM_COMBO((a,b),(c,d))` | one option from each list joined by a space |
//! | `COUNTER_<directive or literal>` | the wrapped string value followed by `_<n>` |
//!
//! The counter sequence is owned by a [`SequenceCounter`] shared between all
//! expanders of a run, so values are unique and dense across workers.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Days, NaiveDate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

const COUNTER_PREFIX: &str = "COUNTER_";
const DATE_FORMAT: &str = "%Y-%m-%d";

lazy_static::lazy_static! {
    static ref COMBO_RE: Regex =
        Regex::new(r"^RANDOM_COMBO\(\(([^()]*)\),\s*\(([^()]*)\)\)$").unwrap();
    static ref INT_RE: Regex =
        Regex::new(r"^RANDOM_INT\(\s*(\d+)\s*,\s*(\d+)\s*\)$").unwrap();
    static ref STRING_RE: Regex =
        Regex::new(r"^RANDOM_STRING\(([^()]*)\)$").unwrap();
    static ref FLOAT_RE: Regex =
        Regex::new(r"^RANDOM_FLOAT\(([^,()]+),([^,()]+)\)$").unwrap();
    static ref DATE_RE: Regex =
        Regex::new(r"^RANDOM_DATE\(([^,()]*),([^,()]*)\)$").unwrap();
}

/// Errors produced while expanding a single placeholder string.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaceholderError {
    #[error("invalid {directive} format: '{input}'")]
    InvalidFormat {
        directive: &'static str,
        input: String,
    },

    #[error("{directive} has an empty option list")]
    EmptyOptionList { directive: &'static str },

    #[error("invalid date '{value}', use YYYY-MM-DD")]
    InvalidDateFormat { value: String },

    #[error("COUNTER_ supports only string values, got {found}")]
    UnsupportedCounterBase { found: &'static str },

    #[error("invalid {directive} range: min {min} is greater than max {max}")]
    InvalidRange {
        directive: &'static str,
        min: String,
        max: String,
    },
}

/// Monotonic sequence used by `COUNTER_` directives.
///
/// Values start at 1 and every call to [`next_value`](Self::next_value)
/// returns a value no other caller has seen. The lock is held only for the
/// increment itself.
#[derive(Debug)]
pub struct SequenceCounter {
    next: Mutex<u64>,
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: Mutex::new(first),
        }
    }

    /// Returns the current value and advances the sequence by one.
    pub fn next_value(&self) -> u64 {
        let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
        let value = *next;
        *next += 1;
        value
    }

    /// The value the next successful expansion will receive.
    pub fn peek(&self) -> u64 {
        *self.next.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reset(&self) {
        *self.next.lock().unwrap_or_else(PoisonError::into_inner) = 1;
    }
}

/// Resolves placeholder strings into concrete JSON values.
///
/// Each expander owns its random source, so one expander per worker needs no
/// synchronisation. Tests inject a seeded generator through
/// [`with_rng`](Self::with_rng).
pub struct Expander<R = StdRng> {
    counter: Arc<SequenceCounter>,
    rng: R,
}

impl Expander<StdRng> {
    /// Creates an expander backed by an entropy-seeded generator.
    pub fn new(counter: Arc<SequenceCounter>) -> Self {
        Self::with_rng(counter, StdRng::from_entropy())
    }

    /// Creates an expander with a deterministic generator.
    pub fn seeded(counter: Arc<SequenceCounter>, seed: u64) -> Self {
        Self::with_rng(counter, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> Expander<R> {
    pub fn with_rng(counter: Arc<SequenceCounter>, rng: R) -> Self {
        Self { counter, rng }
    }

    pub fn counter(&self) -> &Arc<SequenceCounter> {
        &self.counter
    }

    /// Expands one template string.
    ///
    /// Strings that carry no recognised directive are returned unchanged as
    /// JSON strings.
    pub fn expand(&mut self, raw: &str) -> Result<Value, PlaceholderError> {
        let mut base = raw;
        let mut depth = 0usize;
        while let Some(rest) = base.strip_prefix(COUNTER_PREFIX) {
            base = rest;
            depth += 1;
        }

        let value = self.expand_directive(base)?;
        if depth == 0 {
            return Ok(value);
        }
        self.append_counters(value, depth)
    }

    /// Appends one `_<n>` per `COUNTER_` level, innermost first.
    ///
    /// The sequence only advances once the base expanded to a string.
    fn append_counters(&mut self, value: Value, depth: usize) -> Result<Value, PlaceholderError> {
        let mut text = match value {
            Value::String(text) => text,
            other => {
                return Err(PlaceholderError::UnsupportedCounterBase {
                    found: value_kind(&other),
                })
            }
        };
        for _ in 0..depth {
            text.push('_');
            text.push_str(&self.counter.next_value().to_string());
        }
        Ok(Value::String(text))
    }

    fn expand_directive(&mut self, raw: &str) -> Result<Value, PlaceholderError> {
        if raw.starts_with("RANDOM_COMBO") {
            return self.random_combo(raw);
        }
        if raw.starts_with("RANDOM_INT") {
            return self.random_int(raw);
        }
        if raw.starts_with("RANDOM_STRING") {
            return self.random_string(raw);
        }
        if raw == "RANDOM_BOOL" {
            return Ok(Value::Bool(self.rng.gen()));
        }
        if raw.starts_with("RANDOM_FLOAT") {
            return self.random_float(raw);
        }
        if raw.starts_with("RANDOM_DATE") {
            return self.random_date(raw);
        }
        Ok(Value::String(raw.to_string()))
    }

    fn random_combo(&mut self, raw: &str) -> Result<Value, PlaceholderError> {
        const DIRECTIVE: &str = "RANDOM_COMBO";
        let caps = COMBO_RE
            .captures(raw)
            .ok_or_else(|| invalid_format(DIRECTIVE, raw))?;

        let first = split_options(&caps[1]);
        let second = split_options(&caps[2]);
        let empty = PlaceholderError::EmptyOptionList {
            directive: DIRECTIVE,
        };
        let left = first.choose(&mut self.rng).ok_or_else(|| empty.clone())?;
        let right = second.choose(&mut self.rng).ok_or(empty)?;

        Ok(Value::String(format!("{} {}", left, right)))
    }

    fn random_int(&mut self, raw: &str) -> Result<Value, PlaceholderError> {
        const DIRECTIVE: &str = "RANDOM_INT";
        let caps = INT_RE
            .captures(raw)
            .ok_or_else(|| invalid_format(DIRECTIVE, raw))?;

        let min: u64 = caps[1]
            .parse()
            .map_err(|_| invalid_format(DIRECTIVE, raw))?;
        let max: u64 = caps[2]
            .parse()
            .map_err(|_| invalid_format(DIRECTIVE, raw))?;
        if min > max {
            return Err(invalid_range(DIRECTIVE, min, max));
        }

        Ok(Value::from(self.rng.gen_range(min..=max)))
    }

    fn random_string(&mut self, raw: &str) -> Result<Value, PlaceholderError> {
        const DIRECTIVE: &str = "RANDOM_STRING";
        let caps = STRING_RE
            .captures(raw)
            .ok_or_else(|| invalid_format(DIRECTIVE, raw))?;

        split_options(&caps[1])
            .choose(&mut self.rng)
            .map(|option| Value::String(option.to_string()))
            .ok_or(PlaceholderError::EmptyOptionList {
                directive: DIRECTIVE,
            })
    }

    fn random_float(&mut self, raw: &str) -> Result<Value, PlaceholderError> {
        const DIRECTIVE: &str = "RANDOM_FLOAT";
        let caps = FLOAT_RE
            .captures(raw)
            .ok_or_else(|| invalid_format(DIRECTIVE, raw))?;

        let parse = |text: &str| {
            text.trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| invalid_format(DIRECTIVE, raw))
        };
        let min = parse(&caps[1])?;
        let max = parse(&caps[2])?;

        if min > max {
            return Err(invalid_range(DIRECTIVE, min, max));
        }
        // gen_range panics on an empty half-open range.
        if min == max {
            return Ok(Value::from(min));
        }
        if (max - min).is_finite() {
            return Ok(Value::from(self.rng.gen_range(min..max)));
        }

        // Width overflows f64 (opposite signs near the limits), which
        // gen_range rejects with a panic. Interpolate instead; both terms
        // stay finite.
        let t: f64 = self.rng.gen();
        let value = min * (1.0 - t) + max * t;
        Ok(Value::from(if value < max { value } else { min }))
    }

    fn random_date(&mut self, raw: &str) -> Result<Value, PlaceholderError> {
        const DIRECTIVE: &str = "RANDOM_DATE";
        let caps = DATE_RE
            .captures(raw)
            .ok_or_else(|| invalid_format(DIRECTIVE, raw))?;

        let start = parse_date(&caps[1])?;
        let end = parse_date(&caps[2])?;
        if end < start {
            return Err(invalid_range(DIRECTIVE, start, end));
        }

        let span = (end - start).num_days() as u64;
        let offset = self.rng.gen_range(0..=span);
        let date = start
            .checked_add_days(Days::new(offset))
            .ok_or_else(|| invalid_range(DIRECTIVE, start, end))?;

        Ok(Value::String(date.format(DATE_FORMAT).to_string()))
    }
}

fn split_options(list: &str) -> Vec<&str> {
    list.split(',')
        .map(str::trim)
        .filter(|option| !option.is_empty())
        .collect()
}

fn parse_date(text: &str) -> Result<NaiveDate, PlaceholderError> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, DATE_FORMAT).map_err(|_| PlaceholderError::InvalidDateFormat {
        value: text.to_string(),
    })
}

fn invalid_format(directive: &'static str, raw: &str) -> PlaceholderError {
    PlaceholderError::InvalidFormat {
        directive,
        input: raw.to_string(),
    }
}

fn invalid_range(
    directive: &'static str,
    min: impl ToString,
    max: impl ToString,
) -> PlaceholderError {
    PlaceholderError::InvalidRange {
        directive,
        min: min.to_string(),
        max: max.to_string(),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    fn expander() -> Expander {
        Expander::seeded(Arc::new(SequenceCounter::new()), 42)
    }

    #[test]
    fn literal_strings_pass_through() {
        let mut exp = expander();
        assert_eq!(exp.expand("hello").unwrap(), Value::from("hello"));
        assert_eq!(exp.expand("").unwrap(), Value::from(""));
        assert_eq!(exp.expand("RANDOM_BOOLEAN").unwrap(), Value::from("RANDOM_BOOLEAN"));
    }

    #[test]
    fn random_int_stays_within_bounds() {
        let mut exp = expander();
        let mut lowest = u64::MAX;
        let mut highest = 0;
        for _ in 0..10_000 {
            let v = exp.expand("RANDOM_INT(5,15)").unwrap().as_u64().unwrap();
            lowest = lowest.min(v);
            highest = highest.max(v);
        }
        assert!(lowest >= 5, "lowest was {}", lowest);
        assert!(highest <= 15, "highest was {}", highest);
    }

    #[test]
    fn random_int_single_value_range() {
        let mut exp = expander();
        assert_eq!(exp.expand("RANDOM_INT(7,7)").unwrap(), Value::from(7u64));
    }

    #[test]
    fn random_int_rejects_non_numeric_bounds() {
        let mut exp = expander();
        let err = exp.expand("RANDOM_INT(abc,10)").unwrap_err();
        assert!(matches!(
            err,
            PlaceholderError::InvalidFormat {
                directive: "RANDOM_INT",
                ..
            }
        ));
    }

    #[test]
    fn random_int_rejects_inverted_range() {
        let mut exp = expander();
        let err = exp.expand("RANDOM_INT(10,1)").unwrap_err();
        assert_eq!(
            err,
            PlaceholderError::InvalidRange {
                directive: "RANDOM_INT",
                min: "10".to_string(),
                max: "1".to_string(),
            }
        );
    }

    #[test]
    fn random_string_picks_an_option() {
        let mut exp = expander();
        let allowed: HashSet<&str> = ["a", "b", "c"].into_iter().collect();
        let mut seen = HashSet::new();
        for _ in 0..500 {
            let v = exp.expand("RANDOM_STRING(a,b,c)").unwrap();
            let s = v.as_str().unwrap().to_string();
            assert!(allowed.contains(s.as_str()), "unexpected option {}", s);
            seen.insert(s);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn random_string_empty_options() {
        let mut exp = expander();
        assert_eq!(
            exp.expand("RANDOM_STRING()").unwrap_err(),
            PlaceholderError::EmptyOptionList {
                directive: "RANDOM_STRING"
            }
        );
        assert_eq!(
            exp.expand("RANDOM_STRING(, ,)").unwrap_err(),
            PlaceholderError::EmptyOptionList {
                directive: "RANDOM_STRING"
            }
        );
    }

    #[test]
    fn random_bool_yields_both_values() {
        let mut exp = expander();
        let values: HashSet<bool> = (0..200)
            .map(|_| exp.expand("RANDOM_BOOL").unwrap().as_bool().unwrap())
            .collect();
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn random_float_half_open_range() {
        let mut exp = expander();
        for _ in 0..2_000 {
            let v = exp.expand("RANDOM_FLOAT(1.5,2.5)").unwrap().as_f64().unwrap();
            assert!((1.5..2.5).contains(&v), "value {} out of range", v);
        }
    }

    #[test]
    fn random_float_degenerate_range_returns_min() {
        let mut exp = expander();
        assert_eq!(
            exp.expand("RANDOM_FLOAT(3.0,3.0)").unwrap().as_f64(),
            Some(3.0)
        );
        assert!(matches!(
            exp.expand("RANDOM_FLOAT(4,3)").unwrap_err(),
            PlaceholderError::InvalidRange { .. }
        ));
        assert!(matches!(
            exp.expand("RANDOM_FLOAT(x,3)").unwrap_err(),
            PlaceholderError::InvalidFormat { .. }
        ));
    }

    #[test]
    fn random_float_range_wider_than_f64() {
        let mut exp = expander();
        for _ in 0..2_000 {
            let v = exp
                .expand("RANDOM_FLOAT(-1e308,1e308)")
                .unwrap()
                .as_f64()
                .unwrap();
            assert!(v.is_finite());
            assert!((-1e308..1e308).contains(&v), "value {} out of range", v);
        }
        let v = exp
            .expand("RANDOM_FLOAT(-1.7976931348623157e308,1.7976931348623157e308)")
            .unwrap()
            .as_f64()
            .unwrap();
        assert!(v.is_finite());
    }

    #[test]
    fn random_date_inclusive_range() {
        let mut exp = expander();
        let allowed = ["2024-01-01", "2024-01-02", "2024-01-03"];
        let mut seen = HashSet::new();
        for _ in 0..500 {
            let v = exp.expand("RANDOM_DATE(2024-01-01,2024-01-03)").unwrap();
            let s = v.as_str().unwrap().to_string();
            assert!(allowed.contains(&s.as_str()), "unexpected date {}", s);
            seen.insert(s);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn random_date_errors() {
        let mut exp = expander();
        assert_eq!(
            exp.expand("RANDOM_DATE(2024-13-01,2024-12-31)").unwrap_err(),
            PlaceholderError::InvalidDateFormat {
                value: "2024-13-01".to_string()
            }
        );
        assert!(matches!(
            exp.expand("RANDOM_DATE(2024-02-01,2024-01-01)").unwrap_err(),
            PlaceholderError::InvalidRange { .. }
        ));
        assert!(matches!(
            exp.expand("RANDOM_DATE(2024-01-01)").unwrap_err(),
            PlaceholderError::InvalidFormat { .. }
        ));
    }

    #[test]
    fn random_combo_joins_one_from_each_list() {
        let mut exp = expander();
        for _ in 0..200 {
            let v = exp
                .expand("RANDOM_COMBO((John,Jane),(Smith,Doe))")
                .unwrap();
            let s = v.as_str().unwrap();
            let (first, last) = s.split_once(' ').unwrap();
            assert!(["John", "Jane"].contains(&first));
            assert!(["Smith", "Doe"].contains(&last));
        }
    }

    #[test]
    fn random_combo_errors() {
        let mut exp = expander();
        assert_eq!(
            exp.expand("RANDOM_COMBO((),(a))").unwrap_err(),
            PlaceholderError::EmptyOptionList {
                directive: "RANDOM_COMBO"
            }
        );
        assert!(matches!(
            exp.expand("RANDOM_COMBO(a,b)").unwrap_err(),
            PlaceholderError::InvalidFormat { .. }
        ));
    }

    #[test]
    fn counter_appends_dense_sequence() {
        let mut exp = expander();
        for n in 1..=5 {
            assert_eq!(
                exp.expand("COUNTER_user").unwrap(),
                Value::String(format!("user_{}", n))
            );
        }
    }

    #[test]
    fn counter_wraps_string_directive() {
        let mut exp = expander();
        let v = exp.expand("COUNTER_RANDOM_STRING(alpha)").unwrap();
        assert_eq!(v, Value::from("alpha_1"));
    }

    #[test]
    fn counter_rejects_non_string_base_without_consuming() {
        let mut exp = expander();
        assert_eq!(
            exp.expand("COUNTER_RANDOM_INT(1,2)").unwrap_err(),
            PlaceholderError::UnsupportedCounterBase { found: "number" }
        );
        assert_eq!(
            exp.expand("COUNTER_RANDOM_BOOL").unwrap_err(),
            PlaceholderError::UnsupportedCounterBase { found: "bool" }
        );
        assert_eq!(exp.counter().peek(), 1);
        assert_eq!(exp.expand("COUNTER_id").unwrap(), Value::from("id_1"));
    }

    #[test]
    fn nested_counters_append_innermost_first() {
        let mut exp = expander();
        assert_eq!(
            exp.expand("COUNTER_COUNTER_id").unwrap(),
            Value::from("id_1_2")
        );
        assert_eq!(exp.counter().peek(), 3);
    }

    #[test]
    fn deeply_nested_counters_do_not_recurse() {
        let mut exp = expander();
        let depth = 100_000;
        let raw = format!("{}x", COUNTER_PREFIX.repeat(depth));

        let v = exp.expand(&raw).unwrap();
        let s = v.as_str().unwrap();
        assert!(s.starts_with("x_1_2_3_"));
        assert!(s.ends_with(&format!("_{}", depth)));
        assert_eq!(exp.counter().peek(), depth as u64 + 1);

        let nested_bool = format!("{}RANDOM_BOOL", COUNTER_PREFIX.repeat(depth));
        assert_eq!(
            exp.expand(&nested_bool).unwrap_err(),
            PlaceholderError::UnsupportedCounterBase { found: "bool" }
        );
        assert_eq!(exp.counter().peek(), depth as u64 + 1);
    }

    #[test]
    fn counter_is_unique_across_threads() {
        let counter = Arc::new(SequenceCounter::new());
        let threads = 8;
        let per_thread = 250;

        let mut suffixes: Vec<u64> = thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|i| {
                    let counter = counter.clone();
                    scope.spawn(move || {
                        let mut exp = Expander::seeded(counter, i);
                        (0..per_thread)
                            .map(|_| {
                                let v = exp.expand("COUNTER_X").unwrap();
                                let s = v.as_str().unwrap().to_string();
                                s.trim_start_matches("X_").parse::<u64>().unwrap()
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        suffixes.sort_unstable();
        let expected: Vec<u64> = (1..=(threads * per_thread)).collect();
        assert_eq!(suffixes, expected);
    }

    #[test]
    fn seeded_expanders_are_reproducible() {
        let mut a = Expander::seeded(Arc::new(SequenceCounter::new()), 7);
        let mut b = Expander::seeded(Arc::new(SequenceCounter::new()), 7);
        for _ in 0..20 {
            assert_eq!(
                a.expand("RANDOM_INT(0,1000000)").unwrap(),
                b.expand("RANDOM_INT(0,1000000)").unwrap()
            );
        }
    }

    #[test]
    fn counter_reset_restarts_sequence() {
        let counter = SequenceCounter::starting_at(10);
        assert_eq!(counter.next_value(), 10);
        assert_eq!(counter.next_value(), 11);
        counter.reset();
        assert_eq!(counter.next_value(), 1);
    }
}
