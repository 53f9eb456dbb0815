//! Run history and reporting.
//!
//! Stores one JSONL record per completed pipeline run in daily files under
//! ~/.tts-studio-history/. Failures here are logged and never interrupt a run.

use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::pipeline::RunOutcome;
use crate::script::Prompt;

/// Directory for history JSONL files.
pub fn default_history_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tts-studio-history")
}

fn resolve_date(date: &str) -> String {
    if date == "today" {
        Local::now().format("%Y-%m-%d").to_string()
    } else {
        date.to_string()
    }
}

fn history_file(dir: &Path, date: &str) -> PathBuf {
    dir.join(format!("{}.jsonl", resolve_date(date)))
}

/// Record of a single prompt-to-audio run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub timestamp: String,
    pub prompt_chars: usize,
    pub script_chars: usize,
    pub audio_path: String,
    pub audio_bytes: u64,
    pub generate_latency_ms: i64,
    pub synthesize_latency_ms: i64,
    pub playback_duration_ms: i64,
    pub total_latency_ms: i64,
}

impl RunRecord {
    pub fn new(prompt: &Prompt, outcome: &RunOutcome) -> Self {
        Self {
            timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
            prompt_chars: prompt.as_str().chars().count(),
            script_chars: outcome.script.chars().count(),
            audio_path: outcome.audio_path.display().to_string(),
            audio_bytes: outcome.audio_bytes,
            generate_latency_ms: outcome.generate_ms,
            synthesize_latency_ms: outcome.synthesize_ms,
            playback_duration_ms: outcome.playback_ms,
            total_latency_ms: outcome.generate_ms + outcome.synthesize_ms + outcome.playback_ms,
        }
    }
}

/// Append a run record to today's history file in `dir`.
pub fn save_record(dir: &Path, record: &RunRecord) {
    if let Err(e) = fs::create_dir_all(dir) {
        error!("Failed to create history dir: {e}");
        return;
    }

    let path = history_file(dir, "today");
    match fs::OpenOptions::new().create(true).append(true).open(&path) {
        Ok(mut file) => match serde_json::to_string(record) {
            Ok(json) => {
                if let Err(e) = writeln!(file, "{json}") {
                    error!("Failed to write history record: {e}");
                } else {
                    debug!("Saved run record to {}", path.display());
                }
            }
            Err(e) => error!("Failed to serialize record: {e}"),
        },
        Err(e) => error!("Failed to open history file: {e}"),
    }
}

/// Load all run records for a given date ("today" or YYYY-MM-DD).
pub fn load_records(dir: &Path, date: &str) -> Vec<RunRecord> {
    let path = history_file(dir, date);
    let file = match fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            error!("Failed to load history records: {e}");
            return Vec::new();
        }
    };

    std::io::BufReader::new(file)
        .lines()
        .map_while(|line| line.ok())
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<RunRecord>(line.trim()) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Skipping malformed history line: {e}");
                None
            }
        })
        .collect()
}

fn average(values: impl Iterator<Item = i64>) -> f64 {
    let (sum, count) = values.fold((0i64, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

/// Generate a Markdown report for a given date.
pub fn generate_report(dir: &Path, date: &str) -> String {
    let records = load_records(dir, date);
    let display_date = resolve_date(date);

    if records.is_empty() {
        return format!("# TTS Studio Report - {display_date}\n\nNo runs recorded.");
    }

    let script_chars: usize = records.iter().map(|r| r.script_chars).sum();
    let audio_bytes: u64 = records.iter().map(|r| r.audio_bytes).sum();
    let avg_generate = average(records.iter().map(|r| r.generate_latency_ms));
    let avg_synthesize = average(records.iter().map(|r| r.synthesize_latency_ms));
    let avg_playback = average(records.iter().map(|r| r.playback_duration_ms));

    let mut lines = vec![
        format!("# TTS Studio Report - {display_date}"),
        String::new(),
        "## Summary".to_string(),
        format!("- **Runs**: {}", records.len()),
        format!("- **Script characters**: {script_chars}"),
        format!("- **Audio bytes**: {audio_bytes}"),
        String::new(),
        "## Latency Averages".to_string(),
        format!("- Script generation: {avg_generate:.0}ms"),
        format!("- Speech synthesis: {avg_synthesize:.0}ms"),
        format!("- Playback: {avg_playback:.0}ms"),
        String::new(),
        "## Run Log".to_string(),
        String::new(),
        "| Time | Prompt | Script | Audio | Total |".to_string(),
        "|------|--------|--------|-------|-------|".to_string(),
    ];

    for r in &records {
        // HH:MM:SS from the ISO 8601 timestamp
        let time_str = r.timestamp.get(11..19).unwrap_or(&r.timestamp);
        lines.push(format!(
            "| {time_str} | {} | {} | {} | {}ms |",
            r.prompt_chars, r.script_chars, r.audio_bytes, r.total_latency_ms
        ));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_outcome(script: &str, generate_ms: i64) -> RunOutcome {
        RunOutcome {
            script: script.to_string(),
            audio_path: PathBuf::from("/tmp/output_x.mp3"),
            audio_bytes: 2048,
            generate_ms,
            synthesize_ms: 300,
            playback_ms: 1500,
        }
    }

    #[test]
    fn records_round_trip_through_daily_file() {
        let dir = TempDir::new().unwrap();
        let prompt = Prompt::new("Tell me about the ocean").unwrap();

        save_record(dir.path(), &RunRecord::new(&prompt, &sample_outcome("Waves.", 100)));
        save_record(dir.path(), &RunRecord::new(&prompt, &sample_outcome("Tides.", 300)));

        let records = load_records(dir.path(), "today");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].prompt_chars, 23);
        assert_eq!(records[0].script_chars, 6);
        assert_eq!(records[1].total_latency_ms, 300 + 300 + 1500);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let prompt = Prompt::new("hi").unwrap();
        save_record(dir.path(), &RunRecord::new(&prompt, &sample_outcome("x", 1)));

        let path = history_file(dir.path(), "today");
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file).unwrap();

        assert_eq!(load_records(dir.path(), "today").len(), 1);
    }

    #[test]
    fn report_summarises_runs() {
        let dir = TempDir::new().unwrap();
        let prompt = Prompt::new("hi").unwrap();
        save_record(dir.path(), &RunRecord::new(&prompt, &sample_outcome("abc", 100)));
        save_record(dir.path(), &RunRecord::new(&prompt, &sample_outcome("defg", 300)));

        let report = generate_report(dir.path(), "today");

        assert!(report.contains("- **Runs**: 2"));
        assert!(report.contains("- **Script characters**: 7"));
        assert!(report.contains("- Script generation: 200ms"));
        assert_eq!(report.lines().filter(|l| l.starts_with("| ") && l.ends_with("ms |")).count(), 2);
    }

    #[test]
    fn empty_day_reports_no_runs() {
        let dir = TempDir::new().unwrap();
        let report = generate_report(dir.path(), "2020-01-01");
        assert_eq!(report, "# TTS Studio Report - 2020-01-01\n\nNo runs recorded.");
    }
}
