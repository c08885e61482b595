//! Console output
//!
//! One line per decoded event while running, and a snapshot table of the last
//! known values at the end of a run.

use anyhow::Result;
use can_telemetry::{DecodedEvent, PollerStats, StoredValue};
use clap::ValueEnum;
use serde_json::json;

/// How events and the final report are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

/// Render one decoded event
pub fn format_event(event: &DecodedEvent, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(format!(
            "{} {:<34} {}",
            event.observed_at.format("%H:%M:%S%.3f"),
            event.signal_name,
            event.value
        )),
        OutputFormat::Json => Ok(serde_json::to_string(event)?),
    }
}

/// Render the end-of-run snapshot and poller counters
pub fn format_snapshot(
    snapshot: &[(String, StoredValue)],
    stats: &PollerStats,
    format: OutputFormat,
) -> Result<String> {
    match format {
        OutputFormat::Text => {
            let mut out = String::new();
            out.push_str("═══════════════════════════════════════════════\n");
            out.push_str("  Last known values\n");
            out.push_str("═══════════════════════════════════════════════\n");
            if snapshot.is_empty() {
                out.push_str("  (no signals observed)\n");
            }
            for (name, stored) in snapshot {
                out.push_str(&format!(
                    "  {:<34} {:<24} {}\n",
                    name,
                    stored.value.to_string(),
                    stored.observed_at.format("%H:%M:%S%.3f")
                ));
            }
            out.push_str("───────────────────────────────────────────────\n");
            out.push_str(&format!(
                "  Queries sent: {}  answered: {}  timed out: {}  malformed: {}  negative: {}\n",
                stats.queries_sent,
                stats.responses_matched,
                stats.timeouts,
                stats.malformed_responses,
                stats.negative_responses
            ));
            Ok(out)
        }
        OutputFormat::Json => {
            let values: serde_json::Map<String, serde_json::Value> = snapshot
                .iter()
                .map(|(name, stored)| {
                    (
                        name.clone(),
                        json!({ "value": stored.value, "observed_at": stored.observed_at }),
                    )
                })
                .collect();
            let report = json!({
                "snapshot": values,
                "poller": {
                    "queries_sent": stats.queries_sent,
                    "responses_matched": stats.responses_matched,
                    "timeouts": stats.timeouts,
                    "malformed_responses": stats.malformed_responses,
                    "negative_responses": stats.negative_responses,
                }
            });
            Ok(serde_json::to_string_pretty(&report)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use can_telemetry::SignalValue;
    use chrono::{TimeZone, Utc};

    fn timestamp() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap()
    }

    #[test]
    fn test_text_event() {
        let event = DecodedEvent::new("rpm", SignalValue::Integer(3000), timestamp());
        let line = format_event(&event, OutputFormat::Text).unwrap();
        assert!(line.starts_with("12:30:15.000 rpm"));
        assert!(line.ends_with("3000"));
    }

    #[test]
    fn test_json_event() {
        let event = DecodedEvent::new("handbrake_switch", SignalValue::Boolean(true), timestamp());
        let line = format_event(&event, OutputFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["signal_name"], "handbrake_switch");
        assert_eq!(parsed["value"], true);
    }

    #[test]
    fn test_snapshot_formats() {
        let snapshot = vec![(
            "gear".to_string(),
            StoredValue {
                value: SignalValue::Integer(4),
                observed_at: timestamp(),
            },
        )];
        let stats = PollerStats {
            queries_sent: 10,
            responses_matched: 8,
            timeouts: 2,
            ..PollerStats::default()
        };

        let text = format_snapshot(&snapshot, &stats, OutputFormat::Text).unwrap();
        assert!(text.contains("gear"));
        assert!(text.contains("timed out: 2"));

        let json = format_snapshot(&snapshot, &stats, OutputFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["snapshot"]["gear"]["value"], 4);
        assert_eq!(parsed["poller"]["queries_sent"], 10);
    }

    #[test]
    fn test_empty_snapshot() {
        let text = format_snapshot(&[], &PollerStats::default(), OutputFormat::Text).unwrap();
        assert!(text.contains("no signals observed"));
    }
}
