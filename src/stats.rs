//! Decoder for the stats mini-language and the multi-way aggregation fold.
//!
//! `OK <n>` responses carry a blob of either `key: value` pairs or `- item`
//! list entries, optionally led by a `---` document marker. Values made of
//! digits (with an optional sign and at most one decimal point) are coerced
//! to numbers; everything else stays a string, including the empty string.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::{CommandError, Error, Result};
use crate::util::bytes_to_human_str;

/// Identity/descriptive keys: differing values concatenate comma-separated
/// when maps are merged.
const LIST_KEYS: &[&str] = &[
    "pid",
    "version",
    "uptime",
    "binlog-current-index",
    "draining",
    "id",
    "hostname",
    "os",
    "platform",
    "name",
];

/// Capacity-style keys: merging keeps the larger value.
const MAX_KEYS: &[&str] = &["max-job-size", "binlog-max-size", "binlog-oldest-index"];

/// A decoded stats scalar.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl StatValue {
    fn as_i64(&self) -> Option<i64> {
        match self {
            StatValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            StatValue::Int(v) => Some(*v as f64),
            StatValue::Float(v) => Some(*v),
            StatValue::Str(_) => None,
        }
    }
}

impl fmt::Display for StatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatValue::Int(v) => write!(f, "{v}"),
            StatValue::Float(v) => write!(f, "{v}"),
            StatValue::Str(v) => f.write_str(v),
        }
    }
}

/// Coerces a trimmed value token: all-digit tokens (with an optional
/// leading sign and at most one decimal point) become numbers, everything
/// else stays a string. Empty values decode to the empty string.
fn parse_scalar(s: &str) -> StatValue {
    let unsigned = s
        .strip_prefix('-')
        .or_else(|| s.strip_prefix('+'))
        .unwrap_or(s);

    let numeric = !unsigned.is_empty()
        && unsigned.bytes().all(|c| c.is_ascii_digit() || c == b'.')
        && unsigned.bytes().filter(|c| *c == b'.').count() <= 1
        && unsigned.bytes().any(|c| c.is_ascii_digit());

    if numeric {
        if unsigned.contains('.') {
            if let Ok(v) = s.parse::<f64>() {
                return StatValue::Float(v);
            }
        } else if let Ok(v) = s.parse::<i64>() {
            return StatValue::Int(v);
        }
    }

    StatValue::Str(s.to_string())
}

/// A decoded stats map. Never contains duplicate keys; later occurrences of
/// a key overwrite earlier ones.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Stats(BTreeMap<String, StatValue>);

impl Stats {
    /// Decodes a `key: value` stats blob.
    pub fn parse(blob: &[u8]) -> Result<Self> {
        let mut map = BTreeMap::new();

        for line in lines(blob)? {
            let (key, value) = line.split_once(':').ok_or_else(|| {
                Error::Command(CommandError::Unexpected {
                    line: bytes_to_human_str(line.as_bytes()),
                })
            })?;

            map.insert(
                key.trim().to_string(),
                parse_scalar(value.trim()),
            );
        }

        Ok(Stats(map))
    }

    pub fn get(&self, key: &str) -> Option<&StatValue> {
        self.0.get(key)
    }

    /// The value for `key` as an integer, if present and numeric.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(StatValue::as_i64)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StatValue)> {
        self.0.iter()
    }

    /// Merges `next` into a copy of `self` key-by-key: identity keys
    /// concatenate distinct values, capacity keys keep the larger value,
    /// everything else sums. Both inputs are left untouched.
    pub fn aggregate(&self, next: &Stats) -> Stats {
        let mut merged = self.0.clone();

        for (key, incoming) in &next.0 {
            let value = match merged.get(key) {
                None => incoming.clone(),
                Some(current) => {
                    if LIST_KEYS.contains(&key.as_str()) {
                        concat_distinct(current, incoming)
                    } else if MAX_KEYS.contains(&key.as_str()) {
                        max_value(current, incoming)
                    } else {
                        sum_value(current, incoming)
                    }
                },
            };
            merged.insert(key.clone(), value);
        }

        Stats(merged)
    }
}

/// Equal values stay as-is; differing values append comma-separated.
fn concat_distinct(current: &StatValue, incoming: &StatValue) -> StatValue {
    let (a, b) = (current.to_string(), incoming.to_string());

    if a == b {
        current.clone()
    } else {
        StatValue::Str(format!("{a},{b}"))
    }
}

fn max_value(current: &StatValue, incoming: &StatValue) -> StatValue {
    match (current.as_f64(), incoming.as_f64()) {
        (Some(a), Some(b)) if b > a => incoming.clone(),
        (Some(_), Some(_)) => current.clone(),
        // Non-numeric values fall back to the identity-key rule.
        _ => concat_distinct(current, incoming),
    }
}

fn sum_value(current: &StatValue, incoming: &StatValue) -> StatValue {
    match (current, incoming) {
        (StatValue::Int(a), StatValue::Int(b)) => StatValue::Int(a + b),
        _ => match (current.as_f64(), incoming.as_f64()) {
            (Some(a), Some(b)) => StatValue::Float(a + b),
            // Non-numeric values fall back to the identity-key rule.
            _ => concat_distinct(current, incoming),
        },
    }
}

/// Decodes a `- item` stats blob into its items, in order.
pub fn parse_name_list(blob: &[u8]) -> Result<Vec<String>> {
    let mut items = Vec::new();

    for line in lines(blob)? {
        let item = line.strip_prefix("- ").or_else(|| line.strip_prefix('-'));

        match item {
            Some(item) => items.push(item.trim().to_string()),
            None => {
                return Err(Error::Command(CommandError::Unexpected {
                    line: bytes_to_human_str(line.as_bytes()),
                }))
            },
        }
    }

    Ok(items)
}

/// Splits a blob into content lines, discarding the leading document marker
/// if present, blank lines, and trailing CR.
fn lines(blob: &[u8]) -> Result<impl Iterator<Item = &str>> {
    let text = std::str::from_utf8(blob).map_err(|_| {
        Error::Command(CommandError::Unexpected {
            line: bytes_to_human_str(blob),
        })
    })?;

    Ok(text
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .filter(|l| !l.trim().is_empty() && l.trim() != "---"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dict() {
        let stats = Stats::parse(
            b"---\ncurrent-jobs-ready: 2\nversion: 1.10\nhostname: worker-a\n",
        )
        .unwrap();

        assert_eq!(stats.get_i64("current-jobs-ready"), Some(2));
        assert_eq!(stats.get("version"), Some(&StatValue::Float(1.10)));
        assert_eq!(
            stats.get("hostname"),
            Some(&StatValue::Str("worker-a".into()))
        );
    }

    #[test]
    fn test_parse_empty_values() {
        // An empty value decodes to an empty string, not an absent key.
        let stats =
            Stats::parse(b"key1: value1\r\nkey2: \r\nkey3: value3").unwrap();

        assert_eq!(stats.len(), 3);
        assert_eq!(stats.get("key1"), Some(&StatValue::Str("value1".into())));
        assert_eq!(stats.get("key2"), Some(&StatValue::Str("".into())));
        assert_eq!(stats.get("key3"), Some(&StatValue::Str("value3".into())));
    }

    #[test]
    fn test_parse_scalar_coercion() {
        #[track_caller]
        fn scalar(s: &str, expect: StatValue) {
            assert_eq!(parse_scalar(s), expect);
        }

        scalar("123", StatValue::Int(123));
        scalar("-5", StatValue::Int(-5));
        scalar("1.5", StatValue::Float(1.5));
        scalar("", StatValue::Str("".into()));
        scalar("12a", StatValue::Str("12a".into()));
        scalar("1.2.3", StatValue::Str("1.2.3".into()));
        scalar("-", StatValue::Str("-".into()));
    }

    #[test]
    fn test_parse_list() {
        let tubes = parse_name_list(b"---\n- default\n- imports\n").unwrap();
        assert_eq!(tubes, vec!["default".to_string(), "imports".to_string()]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Stats::parse(b"no delimiter here").is_err());
        assert!(parse_name_list(b"---\nnot a list item\n").is_err());
    }

    #[test]
    fn test_aggregate_sums() {
        let member = Stats::parse(b"current-jobs-ready: 2\nother: 8").unwrap();

        // Three members with identical maps: counters sum.
        let total = member.aggregate(&member).aggregate(&member);

        assert_eq!(total.get_i64("current-jobs-ready"), Some(6));
        assert_eq!(total.get_i64("other"), Some(24));
    }

    #[test]
    fn test_aggregate_identity_and_max_keys() {
        let a =
            Stats::parse(b"hostname: alpha\nmax-job-size: 65535\npid: 100")
                .unwrap();
        let b =
            Stats::parse(b"hostname: beta\nmax-job-size: 131072\npid: 100")
                .unwrap();

        let merged = a.aggregate(&b);

        // Distinct identity values concatenate; equal ones don't duplicate.
        assert_eq!(
            merged.get("hostname"),
            Some(&StatValue::Str("alpha,beta".into()))
        );
        assert_eq!(merged.get_i64("pid"), Some(100));
        // Capacity keys keep the larger value.
        assert_eq!(merged.get_i64("max-job-size"), Some(131072));
    }

    #[test]
    fn test_aggregate_leaves_inputs_untouched() {
        let a = Stats::parse(b"total-jobs: 5").unwrap();
        let b = Stats::parse(b"total-jobs: 7").unwrap();

        let merged = a.aggregate(&b);

        assert_eq!(merged.get_i64("total-jobs"), Some(12));
        assert_eq!(a.get_i64("total-jobs"), Some(5));
        assert_eq!(b.get_i64("total-jobs"), Some(7));
    }

    #[test]
    fn test_aggregate_takes_missing_keys_as_is() {
        let a = Stats::parse(b"current-jobs-ready: 1").unwrap();
        let b = Stats::parse(b"current-jobs-buried: 4").unwrap();

        let merged = a.aggregate(&b);

        assert_eq!(merged.get_i64("current-jobs-ready"), Some(1));
        assert_eq!(merged.get_i64("current-jobs-buried"), Some(4));
    }
}
