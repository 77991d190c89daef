//! Replay command implementation.
//!
//! Seeds a live query from a file of rows and feeds it a change log, one
//! frame per line, the way a client would receive them from a single
//! channel session.

use super::{CliError, QueryArgs};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use stratus_codec::Row;
use stratus_protocol::{ChangeDecoder, DecoderConfig, RawMessage};
use stratus_query::FetchResponse;
use stratus_realtime::{ApplyOutcome, LiveQueryState, Snapshot};

/// Inputs of the replay command.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// JSON array of seed rows.
    pub seed: PathBuf,
    /// Change frames, one per line.
    pub events: PathBuf,
    /// Sequence the seed reflects.
    pub sequence: u64,
    /// Primary-key column.
    pub primary_key: String,
    /// Emit JSON lines instead of text.
    pub json: bool,
}

/// Outcome of a replay.
#[derive(Debug, Default)]
pub struct ReplayReport {
    /// Output lines: the seeded snapshot, then one per emitted snapshot.
    pub lines: Vec<String>,
    /// Events that changed the result.
    pub applied: usize,
    /// Events that were decoded but left the result unchanged.
    pub ignored: usize,
    /// Lines that could not be decoded.
    pub rejected: usize,
}

/// Runs the replay command.
pub fn run(args: &QueryArgs, options: &ReplayOptions) -> Result<ReplayReport, Box<dyn std::error::Error>> {
    let query = args.to_builder()?.build()?;
    let seed = read_seed(options)?;
    let log = fs::read_to_string(&options.events)?;

    let mut state = LiveQueryState::new(Arc::clone(query.predicate()), 0)
        .with_primary_key(options.primary_key.as_str());
    state.install_baseline(FetchResponse::new(seed).with_sequence(options.sequence));

    let mut report = ReplayReport::default();
    report.lines.push(render("seed", &state.snapshot(), options.json));

    let decoder = ChangeDecoder::new(DecoderConfig::default().with_primary_key(options.primary_key.as_str()));
    for (index, line) in log.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event = match decoder.decode(&RawMessage::from(line), 0) {
            Ok(event) => event,
            Err(e) if e.is_control_frame() => continue,
            Err(e) => {
                tracing::warn!(line = index + 1, error = %e, "skipping undecodable frame");
                report.rejected += 1;
                continue;
            }
        };

        let label = format!("{} {} {}", event.sequence, event.kind.as_str(), event.id.to_json());
        match state.apply_event(event) {
            outcome @ ApplyOutcome::Applied { .. } if outcome.changed() => {
                report.applied += 1;
                if outcome.gap() {
                    tracing::info!(line = index + 1, "window has a gap; a live client would re-fetch");
                }
                report.lines.push(render(&label, &state.snapshot(), options.json));
            }
            outcome => {
                tracing::debug!(line = index + 1, ?outcome, "event left the result unchanged");
                report.ignored += 1;
            }
        }
    }

    Ok(report)
}

fn read_seed(options: &ReplayOptions) -> Result<Vec<Row>, Box<dyn std::error::Error>> {
    let invalid = |message: String| CliError::InvalidInput {
        path: options.seed.display().to_string(),
        message,
    };

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&options.seed)?)?;
    let entries = json
        .as_array()
        .ok_or_else(|| invalid("expected a JSON array of rows".into()))?;

    let mut rows = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let row = Row::from_json(&options.primary_key, entry)
            .map_err(|e| invalid(format!("row {}: {}", index, e)))?;
        rows.push(row);
    }
    Ok(rows)
}

fn render(label: &str, snapshot: &Snapshot, json: bool) -> String {
    if json {
        let rows: Vec<serde_json::Value> = snapshot.rows().iter().map(Row::to_json).collect();
        let output = serde_json::json!({
            "event": label,
            "sequence": snapshot.sequence,
            "rows": rows,
            "error": snapshot.error.as_ref().map(|e| e.to_string()),
        });
        return output.to_string();
    }

    let ids: Vec<String> = snapshot
        .rows()
        .iter()
        .map(|r| r.id().to_json().to_string())
        .collect();
    match &snapshot.error {
        Some(error) => format!("{:<24} [{}] ({})", label, ids.join(", "), error),
        None => format!("{:<24} [{}]", label, ids.join(", ")),
    }
}
