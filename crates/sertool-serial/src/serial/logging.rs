//! RX/TX traffic capture.
//!
//! Records every received block and every transmitted payload with a
//! timestamp and a source tag, and exports the capture as plain text
//! (one line per entry), CSV, or JSON.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};

use super::error::{SerialError, SerialResult};
use super::types::{ChannelIndex, SequenceIndex};

/// Default number of entries kept before the oldest are dropped.
pub const DEFAULT_MAX_ENTRIES: usize = 100_000;

/// Prefix of exported RX lines; padded to line up with `CH1--> `.
pub const EXPORT_RX_TAG: &str = "   <-- ";
/// Suffix of the source tag on exported TX lines.
pub const EXPORT_TX_TAG: &str = "--> ";

/// File layout used when exporting a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    /// One `format_plain` line per entry.
    #[default]
    Plain,
    Csv,
    Json,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" | "txt" | "log" => Ok(Self::Plain),
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "`{}` is not a valid export format. Must be any of: plain, csv, json",
                other
            )),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Direction marker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DataDirection {
    Tx,
    Rx,
}

impl DataDirection {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Tx => "TX",
            Self::Rx => "RX",
        }
    }

    pub fn arrow(&self) -> &'static str {
        match self {
            Self::Tx => EXPORT_TX_TAG,
            Self::Rx => EXPORT_RX_TAG,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tag for a manual send from data channel `ch`, e.g. `CH3`.
pub fn channel_tag(ch: ChannelIndex) -> String {
    format!("CH{}", ch)
}

/// Tag for a send made by a sequence player, e.g. `SEQ1_CH3`.
pub fn sequence_tag(seq: SequenceIndex, ch: ChannelIndex) -> String {
    format!("SEQ{}_CH{}", seq, ch)
}

/// One captured transfer.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficEntry {
    pub timestamp: DateTime<Utc>,
    pub direction: DataDirection,
    /// Source tag for TX entries; `None` for RX.
    pub tag: Option<String>,
    pub data: Vec<u8>,
}

impl TrafficEntry {
    pub fn rx(data: Vec<u8>) -> Self {
        Self {
            timestamp: Utc::now(),
            direction: DataDirection::Rx,
            tag: None,
            data,
        }
    }

    pub fn tx(tag: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            timestamp: Utc::now(),
            direction: DataDirection::Tx,
            tag: Some(tag.into()),
            data,
        }
    }
}

/// Bytes as a bracketed decimal list, e.g. `[1, 2, 255]`.
pub fn format_byte_list(data: &[u8]) -> String {
    let items: Vec<String> = data.iter().map(|b| b.to_string()).collect();
    format!("[{}]", items.join(", "))
}

/// Bytes as space-separated upper-case hex, e.g. `01 2A FF`.
pub fn bytes_to_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, b) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02X}", b);
    }
    out
}

/// Export line: `   <-- [..]` for RX, `<tag>--> [..]` for TX.
pub fn format_plain(entry: &TrafficEntry) -> String {
    match entry.direction {
        DataDirection::Rx => format!("{}{}", EXPORT_RX_TAG, format_byte_list(&entry.data)),
        DataDirection::Tx => format!(
            "{}{}{}",
            entry.tag.as_deref().unwrap_or(""),
            EXPORT_TX_TAG,
            format_byte_list(&entry.data)
        ),
    }
}

pub fn format_csv(entry: &TrafficEntry) -> String {
    format!(
        "{},{},{},{}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
        entry.direction.label(),
        entry.tag.as_deref().unwrap_or(""),
        bytes_to_hex(&entry.data)
    )
}

pub fn csv_header() -> &'static str {
    "Timestamp,Direction,Tag,Hex"
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Capture
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bounded in-memory RX/TX capture.
#[derive(Debug, Clone)]
pub struct TrafficLog {
    entries: VecDeque<TrafficEntry>,
    max_entries: usize,
    dropped: u64,
}

impl Default for TrafficLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl TrafficLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries: max_entries.max(1),
            dropped: 0,
        }
    }

    pub fn record(&mut self, entry: TrafficEntry) {
        if self.entries.len() >= self.max_entries {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(entry);
    }

    pub fn record_rx(&mut self, data: &[u8]) {
        self.record(TrafficEntry::rx(data.to_vec()));
    }

    pub fn record_tx(&mut self, tag: impl Into<String>, data: &[u8]) {
        self.record(TrafficEntry::tx(tag, data.to_vec()));
    }

    pub fn entries(&self) -> impl Iterator<Item = &TrafficEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries discarded because the capture was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.dropped = 0;
    }

    /// One line per entry; empties the capture.
    pub fn export_plain(&mut self) -> String {
        let out = self.plain_text();
        self.clear();
        out
    }

    fn plain_text(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&format_plain(entry));
            out.push('\n');
        }
        out
    }

    pub fn export_csv(&self) -> String {
        let mut out = String::new();
        out.push_str(csv_header());
        out.push('\n');
        for entry in &self.entries {
            out.push_str(&format_csv(entry));
            out.push('\n');
        }
        out
    }

    pub fn export_json(&self) -> SerialResult<String> {
        let entries: Vec<&TrafficEntry> = self.entries.iter().collect();
        serde_json::to_string_pretty(&entries)
            .map_err(|e| SerialError::io(format!("unable to serialize capture: {}", e)))
    }

    /// The capture in `format`, leaving it untouched.
    pub fn render(&self, format: ExportFormat) -> SerialResult<String> {
        match format {
            ExportFormat::Plain => Ok(self.plain_text()),
            ExportFormat::Csv => Ok(self.export_csv()),
            ExportFormat::Json => self.export_json(),
        }
    }

    /// Write the capture to `path` in `format`, replacing the file.
    ///
    /// The capture is cleared only once the file was written; on error
    /// every entry is kept.
    pub fn write_to_file(&mut self, path: &Path, format: ExportFormat) -> SerialResult<usize> {
        let count = self.entries.len();
        let text = self.render(format)?;
        let mut file = std::fs::File::create(path).map_err(|e| {
            SerialError::io(format!("unable to create {}: {}", path.display(), e))
        })?;
        file.write_all(text.as_bytes()).map_err(|e| {
            SerialError::io(format!("unable to write {}: {}", path.display(), e))
        })?;
        self.clear();
        log::info!("Exported {} RX/TX entries to {}", count, path.display());
        Ok(count)
    }
}
