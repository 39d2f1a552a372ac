//! Phase events and the wire formats they arrive in.
//!
//! Execution log entries come in three shapes:
//!   `step|phase|status|outcome|timestamp`                 (5 fields)
//!   `step|phase|status|outcome|timestamp|turns|tokens`    (7 fields)
//!   `{sid, p, s, d, t, tu?, tk?}`                          (structured)
//!
//! Each entry is classified on its own. A log may mix all three. Entries
//! that fit none of them parse to `None` and are dropped by `parse_all`.

use crate::types::PhaseStatus;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

// ---------------------------------------------------------------------------
// PhaseEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseEvent {
    pub step_id: String,
    pub phase_name: String,
    pub status: PhaseStatus,
    pub outcome: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turns_used: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
}

impl PhaseEvent {
    pub fn new(
        step_id: impl Into<String>,
        phase_name: impl Into<String>,
        status: PhaseStatus,
        outcome: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            phase_name: phase_name.into(),
            status,
            outcome: outcome.into(),
            timestamp: timestamp.into(),
            turns_used: None,
            tokens_used: None,
        }
    }

    pub fn with_stats(mut self, turns_used: u32, tokens_used: u64) -> Self {
        self.turns_used = Some(turns_used);
        self.tokens_used = Some(tokens_used);
        self
    }

    /// Parsed timestamp, if it is RFC 3339 or a naive ISO-8601 datetime
    /// (interpreted as UTC).
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }

    /// Pipe-delimited form. Stats are appended only when both are known.
    pub fn to_line(&self) -> String {
        let mut line = format!(
            "{}|{}|{}|{}|{}",
            self.step_id, self.phase_name, self.status, self.outcome, self.timestamp
        );
        if let (Some(turns), Some(tokens)) = (self.turns_used, self.tokens_used) {
            line.push_str(&format!("|{turns}|{tokens}"));
        }
        line
    }

    /// Structured short-key form used by current execution logs.
    pub fn to_record(&self) -> Value {
        let mut map = Mapping::new();
        map.insert("sid".into(), self.step_id.clone().into());
        map.insert("p".into(), self.phase_name.clone().into());
        map.insert("s".into(), self.status.as_str().into());
        map.insert("d".into(), self.outcome.clone().into());
        map.insert("t".into(), self.timestamp.clone().into());
        if let Some(turns) = self.turns_used {
            map.insert("tu".into(), Value::from(turns));
        }
        if let Some(tokens) = self.tokens_used {
            map.insert("tk".into(), Value::from(tokens));
        }
        Value::Mapping(map)
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

// ---------------------------------------------------------------------------
// RawEvent
// ---------------------------------------------------------------------------

/// The closed set of entry shapes an execution log may contain.
#[derive(Debug, Clone, Copy)]
pub enum RawEvent<'a> {
    Line(&'a str),
    Record(&'a Mapping),
}

impl<'a> RawEvent<'a> {
    /// Classify a YAML node. Anything other than a string or mapping is not
    /// an event.
    pub fn classify(value: &'a Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(RawEvent::Line(s)),
            Value::Mapping(m) => Some(RawEvent::Record(m)),
            Value::Tagged(tagged) => RawEvent::classify(&tagged.value),
            _ => None,
        }
    }

    pub fn parse(self) -> Option<PhaseEvent> {
        match self {
            RawEvent::Line(line) => parse(line),
            RawEvent::Record(map) => parse_structured(map),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------------------

/// Parse a pipe-delimited entry. Exactly 5 or 7 fields; anything else,
/// an unknown status, or non-integer stats yields `None`.
pub fn parse(raw: &str) -> Option<PhaseEvent> {
    let fields: Vec<&str> = raw.trim().split('|').map(str::trim).collect();
    let (turns_used, tokens_used) = match fields.len() {
        5 => (None, None),
        7 => (
            Some(fields[5].parse::<u32>().ok()?),
            Some(fields[6].parse::<u64>().ok()?),
        ),
        _ => return None,
    };
    let status = fields[2].parse::<PhaseStatus>().ok()?;
    Some(PhaseEvent {
        step_id: fields[0].to_string(),
        phase_name: fields[1].to_string(),
        status,
        outcome: fields[3].to_string(),
        timestamp: fields[4].to_string(),
        turns_used,
        tokens_used,
    })
}

/// Parse a structured entry. `sid, p, s, d, t` are required; `tu, tk` are
/// optional but must be non-negative integers when present.
pub fn parse_structured(raw: &Mapping) -> Option<PhaseEvent> {
    let step_id = scalar(raw, "sid")?;
    let phase_name = scalar(raw, "p")?;
    let status = scalar(raw, "s")?.parse::<PhaseStatus>().ok()?;
    let outcome = scalar(raw, "d")?;
    let timestamp = scalar(raw, "t")?;
    let turns_used = match raw.get("tu") {
        None | Some(Value::Null) => None,
        Some(v) => Some(u32::try_from(v.as_u64()?).ok()?),
    };
    let tokens_used = match raw.get("tk") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_u64()?),
    };
    Some(PhaseEvent {
        step_id,
        phase_name,
        status,
        outcome,
        timestamp,
        turns_used,
        tokens_used,
    })
}

/// Dispatch on the entry's shape.
pub fn parse_auto(raw: &Value) -> Option<PhaseEvent> {
    RawEvent::classify(raw)?.parse()
}

/// Parse every entry, dropping the ones that do not parse. Order is kept.
pub fn parse_all(raws: &[Value]) -> Vec<PhaseEvent> {
    raws.iter()
        .enumerate()
        .filter_map(|(i, raw)| {
            let parsed = parse_auto(raw);
            if parsed.is_none() {
                tracing::debug!(index = i, "dropping malformed execution log entry");
            }
            parsed
        })
        .collect()
}

fn scalar(map: &Mapping, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = "01-01|GREEN|EXECUTED|PASS|2026-02-09T10:00:00Z";

    fn record(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn five_field_line_has_no_stats() {
        let event = parse_auto(&Value::from(LINE)).unwrap();
        assert_eq!(event.step_id, "01-01");
        assert_eq!(event.phase_name, "GREEN");
        assert_eq!(event.status, PhaseStatus::Executed);
        assert_eq!(event.outcome, "PASS");
        assert_eq!(event.turns_used, None);
        assert_eq!(event.tokens_used, None);
    }

    #[test]
    fn seven_field_line_carries_stats() {
        let line = format!("{LINE}|12|45000");
        let event = parse_auto(&Value::from(line)).unwrap();
        assert_eq!(event.turns_used, Some(12));
        assert_eq!(event.tokens_used, Some(45000));
    }

    #[test]
    fn wrong_field_counts_are_rejected() {
        assert!(parse("01-01|GREEN|EXECUTED|PASS").is_none());
        assert!(parse("01-01|GREEN|EXECUTED|PASS|2026-02-09T10:00:00Z|12").is_none());
        assert!(parse("").is_none());
    }

    #[test]
    fn non_integer_stats_are_rejected() {
        assert!(parse(&format!("{LINE}|twelve|45000")).is_none());
        assert!(parse(&format!("{LINE}|12|-5")).is_none());
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!(parse("01-01|GREEN|DONE|PASS|2026-02-09T10:00:00Z").is_none());
    }

    #[test]
    fn structured_record_with_stats() {
        let value = record(
            "{sid: '01-02', p: RED_UNIT, s: EXECUTED, d: FAIL, t: '2026-02-09T10:05:00Z', tu: 3, tk: 900}",
        );
        let event = parse_auto(&value).unwrap();
        assert_eq!(event.step_id, "01-02");
        assert_eq!(event.outcome, "FAIL");
        assert_eq!(event.turns_used, Some(3));
        assert_eq!(event.tokens_used, Some(900));
    }

    #[test]
    fn structured_record_missing_required_key() {
        let value = record("{sid: '01-02', p: RED_UNIT, s: EXECUTED, t: '2026-02-09T10:05:00Z'}");
        assert!(parse_auto(&value).is_none());
    }

    #[test]
    fn structured_record_bad_stats_rejected() {
        let value = record(
            "{sid: '01-02', p: GREEN, s: EXECUTED, d: PASS, t: '2026-02-09T10:05:00Z', tu: many}",
        );
        assert!(parse_auto(&value).is_none());
    }

    #[test]
    fn other_node_types_are_not_events() {
        assert!(parse_auto(&Value::from(42)).is_none());
        assert!(parse_auto(&Value::Null).is_none());
        assert!(parse_auto(&record("[a, b]")).is_none());
    }

    #[test]
    fn parse_all_drops_malformed_and_keeps_order() {
        let raws = vec![
            Value::from("01-01|PREPARE|EXECUTED|PASS|2026-02-09T09:00:00Z"),
            Value::from("garbage"),
            record(
                "{sid: '01-01', p: RED_ACCEPTANCE, s: EXECUTED, d: PASS, t: '2026-02-09T09:10:00Z'}",
            ),
            Value::from(7),
            Value::from("01-01|RED_UNIT|EXECUTED|PASS|2026-02-09T09:20:00Z|4|1000"),
        ];
        let events = parse_all(&raws);
        let phases: Vec<&str> = events.iter().map(|e| e.phase_name.as_str()).collect();
        assert_eq!(phases, vec!["PREPARE", "RED_ACCEPTANCE", "RED_UNIT"]);
    }

    #[test]
    fn parse_all_empty_input() {
        assert!(parse_all(&[]).is_empty());
    }

    #[test]
    fn line_and_record_rendering() {
        let event = PhaseEvent::new(
            "01-01",
            "COMMIT",
            PhaseStatus::Executed,
            "PASS",
            "2026-02-09T11:00:00Z",
        );
        assert_eq!(event.to_line(), "01-01|COMMIT|EXECUTED|PASS|2026-02-09T11:00:00Z");
        let with_stats = event.clone().with_stats(5, 2000);
        assert!(with_stats.to_line().ends_with("|5|2000"));
        assert_eq!(parse_auto(&with_stats.to_record()), Some(with_stats));
    }

    #[test]
    fn timestamp_parsing_accepts_naive_iso() {
        let event =
            PhaseEvent::new("01-01", "GREEN", PhaseStatus::Executed, "PASS", "2026-02-09T10:00:00");
        assert!(event.timestamp_utc().is_some());
        let bad = PhaseEvent::new("01-01", "GREEN", PhaseStatus::Executed, "PASS", "yesterday");
        assert!(bad.timestamp_utc().is_none());
    }
}
