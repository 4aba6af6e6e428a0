//! Rendering of RX/TX bytes for the log window.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Separator placed after every item of the list representations.
pub const DATA_LIST_SEPARATOR: &str = "; ";

/// How bytes are rendered. Stored in the configuration document as 0..=3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OutputRepresentation {
    /// Bytes as characters, no separator.
    #[default]
    String,
    /// `1; 2; `
    IntList,
    /// `0x01; 0xff; `
    HexList,
    /// `'a'; 'b'; `
    AsciiList,
}

impl OutputRepresentation {
    pub fn index(&self) -> u8 {
        match self {
            Self::String => 0,
            Self::IntList => 1,
            Self::HexList => 2,
            Self::AsciiList => 3,
        }
    }

    pub fn from_index(idx: u8) -> Option<Self> {
        match idx {
            0 => Some(Self::String),
            1 => Some(Self::IntList),
            2 => Some(Self::HexList),
            3 => Some(Self::AsciiList),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::IntList => "INT_LIST",
            Self::HexList => "HEX_LIST",
            Self::AsciiList => "ASCII_LIST",
        }
    }

    /// Render `data` in this representation.
    pub fn format(&self, data: &[u8]) -> String {
        match self {
            Self::String => data.iter().map(|b| *b as char).collect(),
            Self::IntList => join_items(data, |b| b.to_string()),
            Self::HexList => join_items(data, |b| format!("{:#04x}", b)),
            Self::AsciiList => join_items(data, |b| format!("'{}'", b as char)),
        }
    }
}

impl TryFrom<u8> for OutputRepresentation {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Self::from_index(v).ok_or_else(|| format!("invalid output representation: {} (expected 0-3)", v))
    }
}

impl From<OutputRepresentation> for u8 {
    fn from(r: OutputRepresentation) -> Self {
        r.index()
    }
}

impl std::str::FromStr for OutputRepresentation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "STRING" => Ok(Self::String),
            "INT_LIST" | "INT" => Ok(Self::IntList),
            "HEX_LIST" | "HEX" => Ok(Self::HexList),
            "ASCII_LIST" | "ASCII" => Ok(Self::AsciiList),
            other => Err(format!(
                "`{}` is not a valid output representation. Must be any of: STRING, INT_LIST, HEX_LIST, ASCII_LIST",
                other
            )),
        }
    }
}

fn join_items(data: &[u8], item: impl Fn(u8) -> String) -> String {
    if data.is_empty() {
        return String::new();
    }
    let mut out: String = data
        .iter()
        .map(|b| item(*b))
        .collect::<Vec<_>>()
        .join(DATA_LIST_SEPARATOR);
    out.push_str(DATA_LIST_SEPARATOR);
    out
}

// ── RX line breaks ───────────────────────────────────────────────────

/// Decides whether a received block starts on a new line.
///
/// Consecutive RX blocks are glued together unless more than `timeout`
/// passed since the previous one, or something else was printed between.
#[derive(Debug, Clone)]
pub struct RxLineBreaker {
    enabled: bool,
    timeout: Duration,
    last_rx: Option<Instant>,
}

impl RxLineBreaker {
    pub fn new(enabled: bool, timeout: Duration) -> Self {
        Self {
            enabled,
            timeout,
            last_rx: None,
        }
    }

    /// Prefix to print before an RX block arriving at `now`.
    pub fn prefix(&mut self, now: Instant) -> &'static str {
        let prefix = match self.last_rx {
            Some(last) if self.enabled && now.duration_since(last) > self.timeout => "\n",
            _ => "",
        };
        self.last_rx = Some(now);
        prefix
    }

    /// RX data was printed and no line break followed it yet.
    pub fn mid_line(&self) -> bool {
        self.last_rx.is_some()
    }

    /// Something other than RX data was printed.
    pub fn interrupt(&mut self) {
        self.last_rx = None;
    }
}
