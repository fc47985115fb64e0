//! The `(pulse, beat, stepIndex)` logical clock.
//!
//! No wall-clock time participates in ordering anywhere in this crate.
//! Components are derived from a [`Payload`](crate::payload::Payload) by
//! coercing whatever JSON scalar is present into an integer, never by
//! failing — malformed input degrades to `0` rather than rejecting the
//! artifact.

use crate::payload::Payload;
use serde_json::Value;
use std::cmp::Ordering;

/// The ordered triple used for "newer vs older" decisions and for EXHALE
/// ordering. Higher is newer; ordering is the natural lexicographic order
/// on the tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct LogicalTime {
    pub pulse: i64,
    pub beat: i64,
    pub step_index: i64,
}

impl LogicalTime {
    pub const ZERO: LogicalTime = LogicalTime {
        pulse: 0,
        beat: 0,
        step_index: 0,
    };

    pub fn as_tuple(&self) -> (i64, i64, i64) {
        (self.pulse, self.beat, self.step_index)
    }
}

/// Coerces an arbitrary JSON value into an integer per the total coercion
/// surface: bool → 0, NaN float → 0, float → truncated, numeric string →
/// parsed (else 0), anything else → 0.
pub fn coerce_int(v: Option<&Value>) -> i64 {
    match v {
        None => 0,
        Some(Value::Bool(_)) => 0,
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                i
            } else if let Some(f) = n.as_f64() {
                if f.is_nan() {
                    0
                } else {
                    f as i64
                }
            } else {
                0
            }
        }
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return 0;
            }
            if let Ok(i) = s.parse::<i64>() {
                return i;
            }
            match s.parse::<f64>() {
                Ok(f) if !f.is_nan() => f as i64,
                _ => 0,
            }
        }
        Some(_) => 0,
    }
}

/// Derives the logical-time tuple from a payload's fields only.
pub fn from_payload(p: &Payload) -> LogicalTime {
    LogicalTime {
        pulse: coerce_int(p.pulse.as_ref()),
        beat: coerce_int(p.beat.as_ref()),
        step_index: coerce_int(p.step_index.as_ref()),
    }
}

/// `true` if `a` is strictly newer than `b`.
pub fn is_newer(a: &Payload, b: &Payload) -> bool {
    from_payload(a).cmp(&from_payload(b)) == Ordering::Greater
}

/// The componentwise maximum logical time across payloads, or zero if empty.
pub fn latest<'a>(payloads: impl Iterator<Item = &'a Payload>) -> LogicalTime {
    let mut latest = LogicalTime::ZERO;
    for p in payloads {
        let t = from_payload(p);
        if t > latest {
            latest = t;
        }
    }
    latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coercion_rules() {
        assert_eq!(coerce_int(None), 0);
        assert_eq!(coerce_int(Some(&json!(true))), 0);
        assert_eq!(coerce_int(Some(&json!(false))), 0);
        assert_eq!(coerce_int(Some(&json!(f64::NAN))), 0);
        assert_eq!(coerce_int(Some(&json!(5.9))), 5);
        assert_eq!(coerce_int(Some(&json!(-5.9))), -5);
        assert_eq!(coerce_int(Some(&json!("123"))), 123);
        assert_eq!(coerce_int(Some(&json!("123.7"))), 123);
        assert_eq!(coerce_int(Some(&json!("  "))), 0);
        assert_eq!(coerce_int(Some(&json!("nope"))), 0);
        assert_eq!(coerce_int(Some(&json!([1, 2]))), 0);
        assert_eq!(coerce_int(Some(&json!(42))), 42);
    }

    #[test]
    fn total_order_lexicographic() {
        let a = LogicalTime { pulse: 1, beat: 0, step_index: 9 };
        let b = LogicalTime { pulse: 1, beat: 1, step_index: 0 };
        assert!(b > a);
    }

    #[test]
    fn latest_is_componentwise_max_and_zero_when_empty() {
        let empty: Vec<Payload> = vec![];
        assert_eq!(latest(empty.iter()), LogicalTime::ZERO);
    }
}
