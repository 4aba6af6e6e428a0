//! Text grammars for channel payloads and playback sequences.
//!
//! Channel data: `;`-separated tokens, each a decimal byte in
//! `[-128, 255]` (negatives stored as two's complement), a `0x` hex
//! literal expanding to one byte per digit pair, or a `"quoted"` string
//! contributing one byte per character.
//!
//! Sequences: `;`-separated `(channel, delay_ms[, repeat])` blocks with a
//! 1-based channel index.
//!
//! Both parsers are pure and never fail outright: the outcome carries a
//! [`TextFieldStatus`] so a front end can colour the input field and gate
//! its send control.

use serde::{Deserialize, Serialize};

use super::error::{SerialError, SerialResult};
use super::types::{ChannelData, ChannelIndex, ParsedSequence, SequenceBlock};

pub const DATA_BYTES_SEPARATOR: char = ';';
pub const SEQ_BLOCK_SEPARATOR: char = ';';
pub const SEQ_BLOCK_START: char = '(';
pub const SEQ_BLOCK_END: char = ')';
pub const SEQ_FIELD_SEPARATOR: char = ',';

const BYTE_MIN: i64 = -128;
const BYTE_MAX: i64 = 255;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validity of a text field after parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextFieldStatus {
    Ok,
    /// Nothing but whitespace; not an error.
    Empty,
    Bad,
}

impl TextFieldStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ok => "valid",
            Self::Empty => "no content",
            Self::Bad => "invalid",
        }
    }
}

/// Result of parsing one text field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome<T> {
    status: TextFieldStatus,
    message: String,
    data: Option<T>,
}

impl<T> ParseOutcome<T> {
    fn ok(data: T) -> Self {
        Self {
            status: TextFieldStatus::Ok,
            message: String::new(),
            data: Some(data),
        }
    }

    fn empty() -> Self {
        Self {
            status: TextFieldStatus::Empty,
            message: String::new(),
            data: None,
        }
    }

    fn bad(message: impl Into<String>) -> Self {
        Self {
            status: TextFieldStatus::Bad,
            message: message.into(),
            data: None,
        }
    }

    pub fn status(&self) -> TextFieldStatus {
        self.status
    }

    pub fn is_ok(&self) -> bool {
        self.status == TextFieldStatus::Ok
    }

    /// Human-readable reason; empty unless the status is `Bad`.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }

    /// `Ok(Some)` for valid input, `Ok(None)` for empty input, and a
    /// `Parse` error carrying the message otherwise.
    pub fn into_result(self) -> SerialResult<Option<T>> {
        match self.status {
            TextFieldStatus::Ok => Ok(self.data),
            TextFieldStatus::Empty => Ok(None),
            TextFieldStatus::Bad => Err(SerialError::parse(self.message)),
        }
    }
}

pub type ChannelParseResult = ParseOutcome<ChannelData>;
pub type SequenceParseResult = ParseOutcome<ParsedSequence>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Channel data
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum TokenError {
    /// Token matches none of the accepted shapes.
    Shape,
    /// `0x` with nothing after it.
    EmptyHex,
    /// Token has a recognised shape but an unusable value.
    Value(String),
}

/// Parse a channel data field into the exact bytes to send.
pub fn parse_channel_data(text: &str) -> ChannelParseResult {
    let text = text.trim();
    if text.is_empty() {
        return ParseOutcome::empty();
    }

    let mut data = Vec::new();
    for part in text
        .trim_matches(DATA_BYTES_SEPARATOR)
        .split(DATA_BYTES_SEPARATOR)
    {
        match parse_token(part.trim(), &mut data) {
            Ok(()) => {}
            Err(TokenError::Shape) => {
                return ParseOutcome::bad(format!("Channel data format/values not valid: {}", text));
            }
            Err(TokenError::EmptyHex) => {
                return ParseOutcome::bad(format!(
                    "HEX data format detected, but no value specified: {}",
                    text
                ));
            }
            Err(TokenError::Value(reason)) => {
                return ParseOutcome::bad(format!(
                    "Unable to parse given channel data: {}\n{}",
                    text, reason
                ));
            }
        }
    }

    ParseOutcome::ok(data)
}

fn parse_token(part: &str, out: &mut Vec<u8>) -> Result<(), TokenError> {
    if let Some(digits) = strip_hex_prefix(part) {
        return parse_hex(digits, out);
    }

    if part.starts_with('"') && part.ends_with('"') {
        for c in part.trim_matches('"').chars() {
            out.push(check_byte_range(c as u32 as i64)?);
        }
        return Ok(());
    }

    let is_decimal = !part.is_empty() && part.chars().all(|c| c.is_ascii_digit());
    if is_decimal || part.starts_with('-') {
        let value: i64 = part
            .parse()
            .map_err(|_| TokenError::Value(format!("invalid literal for integer: '{}'", part)))?;
        out.push(check_byte_range(value)?);
        return Ok(());
    }

    Err(TokenError::Shape)
}

fn strip_hex_prefix(part: &str) -> Option<&str> {
    match part.get(..2) {
        Some(prefix) if prefix.eq_ignore_ascii_case("0x") => Some(&part[2..]),
        _ => None,
    }
}

fn parse_hex(digits: &str, out: &mut Vec<u8>) -> Result<(), TokenError> {
    if digits.is_empty() {
        return Err(TokenError::EmptyHex);
    }
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(TokenError::Value(format!(
            "non-hexadecimal number found in: 0x{}",
            digits
        )));
    }

    let padded;
    let digits = if digits.len() % 2 == 1 {
        padded = format!("0{}", digits);
        padded.as_str()
    } else {
        digits
    };

    for pair in digits.as_bytes().chunks(2) {
        // All-ASCII input, so every pair is valid UTF-8 and valid hex.
        let pair = std::str::from_utf8(pair).map_err(|e| TokenError::Value(e.to_string()))?;
        let byte = u8::from_str_radix(pair, 16).map_err(|e| TokenError::Value(e.to_string()))?;
        out.push(byte);
    }
    Ok(())
}

/// Map a value in `[-128, 255]` to its byte, two's complement for negatives.
fn check_byte_range(value: i64) -> Result<u8, TokenError> {
    if !(BYTE_MIN..=BYTE_MAX).contains(&value) {
        return Err(TokenError::Value(format!(
            "Number {} is not within allowed range ({} ... {}).",
            value, BYTE_MIN, BYTE_MAX
        )));
    }
    if value < 0 {
        Ok(value as i8 as u8)
    } else {
        Ok(value as u8)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Sequences
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse a sequence field into an ordered playback plan.
pub fn parse_seq_data(text: &str) -> SequenceParseResult {
    let text = text.trim();
    if text.is_empty() {
        return ParseOutcome::empty();
    }

    let mut blocks = Vec::new();
    for block in text
        .trim_matches(SEQ_BLOCK_SEPARATOR)
        .split(SEQ_BLOCK_SEPARATOR)
    {
        match parse_block(block.trim()) {
            Ok(parsed) => blocks.push(parsed),
            Err(msg) => return ParseOutcome::bad(msg),
        }
    }

    ParseOutcome::ok(blocks)
}

fn parse_block(block: &str) -> Result<SequenceBlock, String> {
    if !(block.starts_with(SEQ_BLOCK_START) && block.ends_with(SEQ_BLOCK_END)) {
        return Err(format!(
            "Invalid format, expecting '{}' and '{}' separators in block: {}",
            SEQ_BLOCK_START, SEQ_BLOCK_END, block
        ));
    }

    let inner = block
        .trim_matches(SEQ_BLOCK_START)
        .trim_matches(SEQ_BLOCK_END);
    let fields: Vec<&str> = inner
        .split(SEQ_FIELD_SEPARATOR)
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect();

    // repeat is optional
    if !(2..=3).contains(&fields.len()) {
        return Err(format!(
            "Invalid format, expecting two or three fields: channel index, delay[, repeat]. Block: {}",
            block
        ));
    }

    let ch_num = parse_int_field(fields[0], block)?;
    let channel = ChannelIndex::from_one_based(ch_num).ok_or_else(|| {
        format!("Invalid data channel index in sequence: {}, block: {}", ch_num, block)
    })?;

    let delay = parse_int_field(fields[1], block)?;
    if delay < 0 {
        return Err(format!(
            "Invalid delay, must be a positive number: {}, block: {}",
            delay, block
        ));
    }

    let mut parsed = SequenceBlock::new(channel, delay as u64);
    if let Some(field) = fields.get(2) {
        let repeat = parse_int_field(field, block)?;
        if repeat < 1 {
            return Err(format!(
                "Invalid 'repeat' number, must be a positive number: {}, block: {}",
                repeat, block
            ));
        }
        let repeat = u32::try_from(repeat)
            .map_err(|_| format!("'repeat' number too large: {}, block: {}", repeat, block))?;
        parsed = parsed.with_repeat(repeat);
    }

    Ok(parsed)
}

fn parse_int_field(field: &str, block: &str) -> Result<i64, String> {
    field.parse::<i64>().map_err(|_| {
        format!(
            "Unable to parse given field as sequence data: '{}' is not an integer, block: {}",
            field, block
        )
    })
}
