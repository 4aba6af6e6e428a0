//! Persisted application configuration.
//!
//! A versioned JSON document holding serial settings, the raw text of every
//! data / note / sequence field, and log window preferences. The serial
//! core never sees the document; it only receives [`SerialSettings`] and
//! the results of parsing the field texts.
//!
//! Loading is lenient below the version check: a missing or malformed
//! section falls back to its defaults and is reported as a warning.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sertool_serial::serial::parser::{ChannelParseResult, SequenceParseResult};
use sertool_serial::serial::{
    parse_channel_data, parse_seq_data, BaudRate, ChannelIndex, ChannelTable, DataBits, Parity,
    SequenceIndex, SerialSettings, StopBits, NUM_DATA_CHANNELS, NUM_SEQ_CHANNELS,
};

use crate::display::OutputRepresentation;
use crate::error::{ConfigError, ConfigResult};

/// Format version of the configuration document (not the program version).
pub const CFG_FORMAT_VERSION: f64 = 2.0;

pub const DEFAULT_RX_NEWLINE_TIMEOUT_MS: u64 = 10;

const KEY_FILE_VER: &str = "version";
const KEY_SER_CFG: &str = "serialSettings";
const KEY_DATA_FIELDS: &str = "dataFields";
const KEY_NOTE_FIELDS: &str = "noteFields";
const KEY_SEQ_FIELDS: &str = "sequenceFields";
const KEY_RX_LOG: &str = "rxToLog";
const KEY_TX_LOG: &str = "txToLog";
const KEY_OUT_REPRESENTATION: &str = "outputDataRepresentation";
const KEY_RX_NEWLINE: &str = "newLineOnRxData";
const KEY_RX_NEWLINE_TIMEOUT: &str = "newLineOnRxTimeout";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Runtime configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the front end persists between runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// `port_name` is empty when no port was chosen.
    pub serial: SerialSettings,
    pub data_fields: [String; NUM_DATA_CHANNELS],
    pub note_fields: [String; NUM_DATA_CHANNELS],
    pub seq_fields: [String; NUM_SEQ_CHANNELS],
    pub rx_to_log: bool,
    pub tx_to_log: bool,
    pub output_representation: OutputRepresentation,
    pub new_line_on_rx: bool,
    pub new_line_on_rx_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            data_fields: Default::default(),
            note_fields: Default::default(),
            seq_fields: Default::default(),
            rx_to_log: true,
            tx_to_log: true,
            output_representation: OutputRepresentation::String,
            new_line_on_rx: false,
            new_line_on_rx_timeout_ms: DEFAULT_RX_NEWLINE_TIMEOUT_MS,
        }
    }
}

/// Result of a successful load.
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub config: AppConfig,
    /// One human-readable line per section that fell back to defaults.
    pub warnings: Vec<String>,
}

impl AppConfig {
    // ── Load / save ──────────────────────────────────────────────

    /// Parse a configuration document.
    pub fn parse(text: &str) -> ConfigResult<LoadReport> {
        let doc: Value = serde_json::from_str(text)?;
        if !doc.is_object() {
            return Err(ConfigError::malformed("configuration document must be a JSON object"));
        }
        check_version(&doc)?;

        let mut config = AppConfig::default();
        let mut warnings = Vec::new();

        match section::<SerialSection>(&doc, KEY_SER_CFG).and_then(SerialSection::into_settings) {
            Ok(settings) => config.serial = settings,
            Err(e) => warnings.push(format!(
                "Unable to set serial settings from a configuration file: {}",
                e
            )),
        }

        load_fields(&doc, KEY_DATA_FIELDS, &mut config.data_fields, &mut warnings);
        load_fields(&doc, KEY_NOTE_FIELDS, &mut config.note_fields, &mut warnings);
        load_fields(&doc, KEY_SEQ_FIELDS, &mut config.seq_fields, &mut warnings);

        load_value(&doc, KEY_RX_LOG, &mut config.rx_to_log, &mut warnings);
        load_value(&doc, KEY_TX_LOG, &mut config.tx_to_log, &mut warnings);
        load_value(
            &doc,
            KEY_OUT_REPRESENTATION,
            &mut config.output_representation,
            &mut warnings,
        );
        load_value(&doc, KEY_RX_NEWLINE, &mut config.new_line_on_rx, &mut warnings);
        load_value(
            &doc,
            KEY_RX_NEWLINE_TIMEOUT,
            &mut config.new_line_on_rx_timeout_ms,
            &mut warnings,
        );

        for w in &warnings {
            log::warn!("{}", w);
        }
        Ok(LoadReport { config, warnings })
    }

    /// Read and parse the document at `path`.
    pub fn load(path: &Path) -> ConfigResult<LoadReport> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::from(e).with_path(path))?;
        let report = Self::parse(&text).map_err(|e| e.with_path(path))?;
        log::info!("Configuration loaded: {}", path.display());
        Ok(report)
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        let doc = ConfigDocument {
            version: CFG_FORMAT_VERSION,
            serial_settings: SerialSection::from_settings(&self.serial),
            data_fields: indexed(&self.data_fields),
            note_fields: indexed(&self.note_fields),
            sequence_fields: indexed(&self.seq_fields),
            rx_to_log: self.rx_to_log,
            tx_to_log: self.tx_to_log,
            output_data_representation: self.output_representation,
            new_line_on_rx_data: self.new_line_on_rx,
            new_line_on_rx_timeout: self.new_line_on_rx_timeout_ms,
        };
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    /// Write the document to `path`, replacing it.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let text = self.to_json()?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| ConfigError::from(e).with_path(path))?;
        }
        fs::write(path, text).map_err(|e| ConfigError::from(e).with_path(path))?;
        log::info!("Configuration saved: {}", path.display());
        Ok(())
    }

    // ── Field access ─────────────────────────────────────────────

    pub fn set_data_field(&mut self, ch: ChannelIndex, text: impl Into<String>) {
        self.data_fields[ch.get()] = text.into();
    }

    pub fn set_note_field(&mut self, ch: ChannelIndex, text: impl Into<String>) {
        self.note_fields[ch.get()] = text.into();
    }

    pub fn set_seq_field(&mut self, seq: SequenceIndex, text: impl Into<String>) {
        self.seq_fields[seq.get()] = text.into();
    }

    pub fn parse_data_field(&self, ch: ChannelIndex) -> ChannelParseResult {
        parse_channel_data(&self.data_fields[ch.get()])
    }

    pub fn parse_seq_field(&self, seq: SequenceIndex) -> SequenceParseResult {
        parse_seq_data(&self.seq_fields[seq.get()])
    }

    /// Channel table holding the payload of every field that parses cleanly.
    pub fn channel_table(&self) -> ChannelTable {
        let mut table = ChannelTable::new();
        for ch in ChannelIndex::all() {
            let outcome = self.parse_data_field(ch);
            if !outcome.is_ok() && !self.data_fields[ch.get()].trim().is_empty() {
                log::debug!("Data channel {} ignored: {}", ch, outcome.message());
            }
            table.set(ch, outcome.into_data());
        }
        table
    }

    pub fn rx_newline_timeout(&self) -> Duration {
        Duration::from_millis(self.new_line_on_rx_timeout_ms)
    }
}

fn check_version(doc: &Value) -> ConfigResult<()> {
    let expected = format!("{:.1}", CFG_FORMAT_VERSION);
    match doc.get(KEY_FILE_VER) {
        Some(v) if v.as_f64() == Some(CFG_FORMAT_VERSION) || v.as_str() == Some(expected.as_str()) => {
            Ok(())
        }
        Some(v) => Err(ConfigError::version_mismatch(&expected, &v.to_string())),
        None => Err(ConfigError::version_mismatch(&expected, "missing")),
    }
}

fn section<T: DeserializeOwned>(doc: &Value, key: &str) -> Result<T, String> {
    let value = doc.get(key).ok_or_else(|| format!("missing '{}'", key))?;
    serde_json::from_value(value.clone()).map_err(|e| format!("'{}': {}", key, e))
}

fn load_fields<const N: usize>(
    doc: &Value,
    key: &str,
    fields: &mut [String; N],
    warnings: &mut Vec<String>,
) {
    let map = match section::<BTreeMap<String, String>>(doc, key) {
        Ok(map) => map,
        Err(e) => {
            warnings.push(format!(
                "Unable to set data/note/sequence settings from a configuration file: {}",
                e
            ));
            return;
        }
    };
    for (idx, text) in map {
        match idx.parse::<usize>() {
            Ok(i) if i < N => fields[i] = text,
            _ => warnings.push(format!("'{}': ignoring unknown field index '{}'", key, idx)),
        }
    }
}

fn load_value<T: DeserializeOwned>(doc: &Value, key: &str, slot: &mut T, warnings: &mut Vec<String>) {
    match section::<T>(doc, key) {
        Ok(v) => *slot = v,
        Err(e) => warnings.push(format!(
            "Unable to set log settings from a configuration file: {}",
            e
        )),
    }
}

fn indexed(fields: &[String]) -> BTreeMap<String, String> {
    fields
        .iter()
        .enumerate()
        .map(|(i, text)| (i.to_string(), text.clone()))
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  On-disk shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigDocument {
    version: f64,
    serial_settings: SerialSection,
    data_fields: BTreeMap<String, String>,
    note_fields: BTreeMap<String, String>,
    sequence_fields: BTreeMap<String, String>,
    rx_to_log: bool,
    tx_to_log: bool,
    output_data_representation: OutputRepresentation,
    new_line_on_rx_data: bool,
    new_line_on_rx_timeout: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerialSection {
    port: Option<String>,
    baudrate: u32,
    data_size: u8,
    stopbits: u8,
    parity: ParityValue,
    sw_flow_control: bool,
    hw_flow_control: bool,
    read_timeout_ms: u64,
    write_timeout_ms: u64,
}

/// Parity is written as its index; older documents carry the letter code.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ParityValue {
    Index(u8),
    Code(String),
}

impl ParityValue {
    fn to_parity(&self) -> Result<Parity, String> {
        match self {
            Self::Index(i) => Parity::from_index(*i).ok_or_else(|| format!("invalid parity index {}", i)),
            Self::Code(code) => match code.as_str() {
                "N" => Ok(Parity::None),
                "E" => Ok(Parity::Even),
                "O" => Ok(Parity::Odd),
                other => Err(format!("invalid parity '{}'", other)),
            },
        }
    }
}

impl SerialSection {
    fn from_settings(s: &SerialSettings) -> Self {
        Self {
            port: (!s.port_name.is_empty()).then(|| s.port_name.clone()),
            baudrate: s.baud_rate.value(),
            data_size: s.data_bits.value(),
            stopbits: s.stop_bits.value(),
            parity: ParityValue::Index(s.parity.as_index()),
            sw_flow_control: s.sw_flow_control,
            hw_flow_control: s.hw_flow_control,
            read_timeout_ms: s.rx_timeout_ms,
            write_timeout_ms: s.tx_timeout_ms,
        }
    }

    fn into_settings(self) -> Result<SerialSettings, String> {
        let data_bits = DataBits::from_value(self.data_size)
            .ok_or_else(|| format!("invalid data size {}", self.data_size))?;
        let stop_bits = StopBits::try_from(self.stopbits)?;
        let parity = self.parity.to_parity()?;
        Ok(SerialSettings {
            port_name: self.port.unwrap_or_default(),
            baud_rate: BaudRate::from_value(self.baudrate),
            data_bits,
            parity,
            stop_bits,
            sw_flow_control: self.sw_flow_control,
            hw_flow_control: self.hw_flow_control,
            rx_timeout_ms: self.read_timeout_ms,
            tx_timeout_ms: self.write_timeout_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigErrorKind;
    use sertool_serial::serial::TextFieldStatus;

    fn ch(n: usize) -> ChannelIndex {
        ChannelIndex::new(n).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.serial.baud_rate.value(), 115200);
        assert_eq!(cfg.serial.rx_timeout_ms, 1000);
        assert_eq!(cfg.serial.tx_timeout_ms, 300);
        assert!(cfg.rx_to_log && cfg.tx_to_log);
        assert_eq!(cfg.new_line_on_rx_timeout_ms, 10);
        assert!(cfg.data_fields.iter().all(String::is_empty));
    }

    #[test]
    fn test_save_and_parse_keep_everything() {
        let mut cfg = AppConfig::default();
        cfg.serial = SerialSettings::for_port("COM7");
        cfg.serial.parity = Parity::Odd;
        cfg.serial.baud_rate = BaudRate::Custom(250000);
        cfg.set_data_field(ch(0), "1; 0x2A; \"Hi\"");
        cfg.set_note_field(ch(0), "greeting");
        cfg.set_seq_field(SequenceIndex::new(2).unwrap(), "(1, 500)");
        cfg.output_representation = OutputRepresentation::HexList;
        cfg.new_line_on_rx = true;

        let report = AppConfig::parse(&cfg.to_json().unwrap()).unwrap();
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(report.config, cfg);
    }

    #[test]
    fn test_document_keys() {
        let json = AppConfig::default().to_json().unwrap();
        let doc: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(doc["version"], 2.0);
        assert_eq!(doc["serialSettings"]["port"], Value::Null);
        assert_eq!(doc["serialSettings"]["dataSize"], 8);
        assert_eq!(doc["serialSettings"]["parity"], 0);
        assert_eq!(doc["dataFields"]["7"], "");
        assert_eq!(doc["sequenceFields"].as_object().unwrap().len(), 3);
        assert_eq!(doc["outputDataRepresentation"], 0);
        assert_eq!(doc["newLineOnRxTimeout"], 10);
    }

    #[test]
    fn test_version_mismatch() {
        let err = AppConfig::parse(r#"{"version": 1.0}"#).unwrap_err();
        assert_eq!(err.kind, ConfigErrorKind::VersionMismatch);
        assert!(err.message.contains("2.0") && err.message.contains("1.0"));

        let err = AppConfig::parse("{}").unwrap_err();
        assert_eq!(err.kind, ConfigErrorKind::VersionMismatch);
        assert!(err.message.contains("missing"));
    }

    #[test]
    fn test_not_json() {
        let err = AppConfig::parse("not json").unwrap_err();
        assert_eq!(err.kind, ConfigErrorKind::Malformed);
        assert!(AppConfig::parse("[1, 2]").is_err());
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let report = AppConfig::parse(
            r#"{"version": 2.0, "dataFields": {"1": "0x01", "9": "7"}, "txToLog": false}"#,
        )
        .unwrap();
        let cfg = report.config;
        assert_eq!(cfg.data_fields[1], "0x01");
        assert!(!cfg.tx_to_log);
        assert!(cfg.rx_to_log);
        assert_eq!(cfg.serial, SerialSettings::default());
        assert!(report.warnings.iter().any(|w| w.contains("serial settings")));
        assert!(report.warnings.iter().any(|w| w.contains("'9'")));
    }

    #[test]
    fn test_letter_parity_accepted() {
        let text = r#"{
            "version": 2.0,
            "serialSettings": {
                "port": "/dev/ttyUSB0", "baudrate": 9600, "dataSize": 7, "stopbits": 2,
                "parity": "E", "swFlowControl": true, "hwFlowControl": false,
                "readTimeoutMs": 50, "writeTimeoutMs": 20
            }
        }"#;
        let s = AppConfig::parse(text).unwrap().config.serial;
        assert_eq!(s.port_name, "/dev/ttyUSB0");
        assert_eq!(s.parity, Parity::Even);
        assert_eq!(s.data_bits, DataBits::Seven);
        assert_eq!(s.stop_bits, StopBits::Two);
        assert_eq!(s.shorthand(), "9600-7E2");
    }

    #[test]
    fn test_invalid_serial_section_falls_back() {
        let text = r#"{"version": 2.0, "serialSettings": {
            "port": "COM1", "baudrate": 9600, "dataSize": 9, "stopbits": 1, "parity": 0,
            "swFlowControl": false, "hwFlowControl": false, "readTimeoutMs": 1, "writeTimeoutMs": 1}}"#;
        let report = AppConfig::parse(text).unwrap();
        assert_eq!(report.config.serial, SerialSettings::default());
        assert!(report.warnings[0].contains("data size 9"));
    }

    #[test]
    fn test_channel_table_keeps_only_valid_fields() {
        let mut cfg = AppConfig::default();
        cfg.set_data_field(ch(0), "1; 2");
        cfg.set_data_field(ch(1), "999");
        let table = cfg.channel_table();
        assert_eq!(table.get(ch(0)), Some(&[1u8, 2][..]));
        assert_eq!(table.get(ch(1)), None);
        assert_eq!(cfg.parse_data_field(ch(1)).status(), TextFieldStatus::Bad);
        assert_eq!(cfg.parse_data_field(ch(2)).status(), TextFieldStatus::Empty);
    }

    #[test]
    fn test_load_and_save_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("SerialToolCfg.json");
        let mut cfg = AppConfig::default();
        cfg.set_seq_field(SequenceIndex::new(0).unwrap(), "(1, 100, 3)");
        cfg.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap().config;
        let seq = loaded.parse_seq_field(SequenceIndex::new(0).unwrap());
        assert_eq!(seq.data().unwrap()[0].repeat, 3);

        let missing = AppConfig::load(&dir.path().join("nope.json")).unwrap_err();
        assert_eq!(missing.kind, ConfigErrorKind::Io);
        assert!(missing.path.unwrap().ends_with("nope.json"));
    }
}
