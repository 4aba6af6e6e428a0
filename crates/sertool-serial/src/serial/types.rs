//! Shared types for the serial core.
//!
//! Covers port settings, channel and sequence indices, channel payloads,
//! sequence playback plans, port listing info, and session state.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Number of editable data channel slots.
pub const NUM_DATA_CHANNELS: usize = 8;

/// Number of sequence slots that may play concurrently.
pub const NUM_SEQ_CHANNELS: usize = 3;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Port Configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Baud rate: one of the standard rates or a free-entry value.
///
/// Serialized as its plain numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum BaudRate {
    Baud1200,
    Baud2400,
    Baud4800,
    Baud9600,
    Baud14400,
    Baud19200,
    Baud38400,
    Baud57600,
    Baud115200,
    Baud230400,
    Baud460800,
    Baud921600,
    /// Non-standard rate typed in by the user.
    Custom(u32),
}

impl Default for BaudRate {
    fn default() -> Self {
        Self::Baud115200
    }
}

impl BaudRate {
    pub fn value(&self) -> u32 {
        match self {
            Self::Baud1200 => 1200,
            Self::Baud2400 => 2400,
            Self::Baud4800 => 4800,
            Self::Baud9600 => 9600,
            Self::Baud14400 => 14400,
            Self::Baud19200 => 19200,
            Self::Baud38400 => 38400,
            Self::Baud57600 => 57600,
            Self::Baud115200 => 115200,
            Self::Baud230400 => 230400,
            Self::Baud460800 => 460800,
            Self::Baud921600 => 921600,
            Self::Custom(v) => *v,
        }
    }

    pub fn from_value(v: u32) -> Self {
        Self::standard()
            .iter()
            .copied()
            .find(|rate| rate.value() == v)
            .unwrap_or(Self::Custom(v))
    }

    /// Standard rates offered for selection, ascending.
    pub fn standard() -> &'static [BaudRate] {
        &[
            Self::Baud1200,
            Self::Baud2400,
            Self::Baud4800,
            Self::Baud9600,
            Self::Baud14400,
            Self::Baud19200,
            Self::Baud38400,
            Self::Baud57600,
            Self::Baud115200,
            Self::Baud230400,
            Self::Baud460800,
            Self::Baud921600,
        ]
    }

    pub fn is_standard(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }
}

impl From<u32> for BaudRate {
    fn from(v: u32) -> Self {
        Self::from_value(v)
    }
}

impl From<BaudRate> for u32 {
    fn from(rate: BaudRate) -> Self {
        rate.value()
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl Default for DataBits {
    fn default() -> Self {
        Self::Eight
    }
}

impl DataBits {
    pub fn value(&self) -> u8 {
        match self {
            Self::Five => 5,
            Self::Six => 6,
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }

    pub fn from_value(v: u8) -> Option<Self> {
        match v {
            5 => Some(Self::Five),
            6 => Some(Self::Six),
            7 => Some(Self::Seven),
            8 => Some(Self::Eight),
            _ => None,
        }
    }
}

impl TryFrom<u8> for DataBits {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Self::from_value(v).ok_or_else(|| format!("invalid data bits: {} (expected 5-8)", v))
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> Self {
        bits.value()
    }
}

/// Parity checking mode.
///
/// Serialized as its single-letter code (`N`, `E`, `O`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    #[serde(rename = "N")]
    None,
    #[serde(rename = "E")]
    Even,
    #[serde(rename = "O")]
    Odd,
}

impl Default for Parity {
    fn default() -> Self {
        Self::None
    }
}

impl Parity {
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "N",
            Self::Even => "E",
            Self::Odd => "O",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Even => "Even",
            Self::Odd => "Odd",
        }
    }

    /// Numeric index used by selection widgets: none=0, even=1, odd=2.
    pub fn as_index(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Even => 1,
            Self::Odd => 2,
        }
    }

    pub fn from_index(idx: u8) -> Option<Self> {
        match idx {
            0 => Some(Self::None),
            1 => Some(Self::Even),
            2 => Some(Self::Odd),
            _ => None,
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    One,
    Two,
}

impl Default for StopBits {
    fn default() -> Self {
        Self::One
    }
}

impl StopBits {
    pub fn value(&self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }
}

impl TryFrom<u8> for StopBits {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(format!("invalid stop bits: {} (expected 1 or 2)", other)),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(bits: StopBits) -> Self {
        bits.value()
    }
}

/// Complete serial port settings, handed by value to [`SerialPort::init`].
///
/// [`SerialPort::init`]: crate::serial::port::SerialPort::init
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialSettings {
    /// Port name (e.g. `COM3`, `/dev/ttyUSB0`).
    #[serde(default)]
    pub port_name: String,

    #[serde(default)]
    pub baud_rate: BaudRate,

    #[serde(default)]
    pub data_bits: DataBits,

    #[serde(default)]
    pub parity: Parity,

    #[serde(default)]
    pub stop_bits: StopBits,

    /// Software flow control (XON/XOFF).
    #[serde(default)]
    pub sw_flow_control: bool,

    /// Hardware flow control (RTS/CTS).
    #[serde(default)]
    pub hw_flow_control: bool,

    #[serde(default = "default_rx_timeout")]
    pub rx_timeout_ms: u64,

    #[serde(default = "default_tx_timeout")]
    pub tx_timeout_ms: u64,
}

fn default_rx_timeout() -> u64 {
    1000
}
fn default_tx_timeout() -> u64 {
    300
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: BaudRate::default(),
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            sw_flow_control: false,
            hw_flow_control: false,
            rx_timeout_ms: default_rx_timeout(),
            tx_timeout_ms: default_tx_timeout(),
        }
    }
}

impl SerialSettings {
    /// Default settings for the given port.
    pub fn for_port(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Default::default()
        }
    }

    /// Shorthand notation like "115200-8N1".
    pub fn shorthand(&self) -> String {
        format!(
            "{}-{}{}{}",
            self.baud_rate.value(),
            self.data_bits.value(),
            self.parity.label(),
            self.stop_bits.value()
        )
    }
}

impl fmt::Display for SerialSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.port_name.is_empty() {
            write!(f, "{} @ {}, ", self.port_name, self.baud_rate.value())?;
        }
        write!(
            f,
            "Data size: {}, Stop bits: {}, Parity: {}, HW Flow Ctrl: {}, SW Flow Ctrl: {}, RX timeout: {} ms, TX timeout: {} ms",
            self.data_bits.value(),
            self.stop_bits.value(),
            self.parity.name(),
            self.hw_flow_control,
            self.sw_flow_control,
            self.rx_timeout_ms,
            self.tx_timeout_ms
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Channels & Sequences
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 0-based index of a data channel slot.
///
/// User-facing text is 1-based; construct from it with
/// [`ChannelIndex::from_one_based`] and print it with [`fmt::Display`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct ChannelIndex(usize);

impl ChannelIndex {
    pub fn new(idx: usize) -> Option<Self> {
        (idx < NUM_DATA_CHANNELS).then_some(Self(idx))
    }

    pub fn from_one_based(n: i64) -> Option<Self> {
        if n < 1 {
            return None;
        }
        Self::new((n - 1) as usize)
    }

    pub fn get(&self) -> usize {
        self.0
    }

    pub fn one_based(&self) -> usize {
        self.0 + 1
    }

    pub fn all() -> impl Iterator<Item = ChannelIndex> {
        (0..NUM_DATA_CHANNELS).map(ChannelIndex)
    }
}

impl fmt::Display for ChannelIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.one_based())
    }
}

impl TryFrom<usize> for ChannelIndex {
    type Error = String;

    fn try_from(v: usize) -> Result<Self, Self::Error> {
        Self::new(v).ok_or_else(|| format!("channel index {} out of range", v))
    }
}

impl From<ChannelIndex> for usize {
    fn from(idx: ChannelIndex) -> Self {
        idx.0
    }
}

/// 0-based index of a sequence slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct SequenceIndex(usize);

impl SequenceIndex {
    pub fn new(idx: usize) -> Option<Self> {
        (idx < NUM_SEQ_CHANNELS).then_some(Self(idx))
    }

    pub fn from_one_based(n: i64) -> Option<Self> {
        if n < 1 {
            return None;
        }
        Self::new((n - 1) as usize)
    }

    pub fn get(&self) -> usize {
        self.0
    }

    pub fn one_based(&self) -> usize {
        self.0 + 1
    }

    pub fn all() -> impl Iterator<Item = SequenceIndex> {
        (0..NUM_SEQ_CHANNELS).map(SequenceIndex)
    }
}

impl fmt::Display for SequenceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.one_based())
    }
}

impl TryFrom<usize> for SequenceIndex {
    type Error = String;

    fn try_from(v: usize) -> Result<Self, Self::Error> {
        Self::new(v).ok_or_else(|| format!("sequence index {} out of range", v))
    }
}

impl From<SequenceIndex> for usize {
    fn from(idx: SequenceIndex) -> Self {
        idx.0
    }
}

/// Byte payload of one data channel.
pub type ChannelData = Vec<u8>;

/// One step of a playback plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceBlock {
    pub channel: ChannelIndex,
    pub delay_ms: u64,
    /// Number of times the channel is sent; always >= 1.
    pub repeat: u32,
}

impl SequenceBlock {
    pub fn new(channel: ChannelIndex, delay_ms: u64) -> Self {
        Self {
            channel,
            delay_ms,
            repeat: 1,
        }
    }

    pub fn with_repeat(mut self, repeat: u32) -> Self {
        self.repeat = repeat.max(1);
        self
    }
}

/// Ordered list of blocks for one sequence slot.
pub type ParsedSequence = Vec<SequenceBlock>;

/// Editable table of channel payloads owned by the front end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelTable {
    slots: [Option<ChannelData>; NUM_DATA_CHANNELS],
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, idx: ChannelIndex, data: Option<ChannelData>) {
        self.slots[idx.get()] = data;
    }

    pub fn get(&self, idx: ChannelIndex) -> Option<&[u8]> {
        self.slots[idx.get()].as_deref()
    }

    /// Freeze the current contents for a sequence run.
    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            slots: Arc::new(self.slots.clone()),
        }
    }
}

/// Immutable view of all channel payloads, cheap to clone across threads.
#[derive(Debug, Clone, Default)]
pub struct ChannelSnapshot {
    slots: Arc<[Option<ChannelData>; NUM_DATA_CHANNELS]>,
}

impl ChannelSnapshot {
    pub fn get(&self, idx: ChannelIndex) -> Option<&[u8]> {
        self.slots[idx.get()].as_deref()
    }

    /// Channels referenced by `sequence` that hold no payload, deduplicated.
    pub fn missing_channels(&self, sequence: &[SequenceBlock]) -> Vec<ChannelIndex> {
        let mut missing: Vec<ChannelIndex> = sequence
            .iter()
            .map(|b| b.channel)
            .filter(|ch| self.get(*ch).is_none())
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Port Listing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Information about a port reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialPortInfo {
    pub port_name: String,
    pub port_type: PortType,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
}

/// Type of serial port, as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PortType {
    UsbSerial,
    Pci,
    Bluetooth,
    Unknown,
}

impl PortType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::UsbSerial => "USB-Serial",
            Self::Pci => "PCI",
            Self::Bluetooth => "Bluetooth",
            Self::Unknown => "Unknown",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// State of the port session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Disconnected,
    Connected,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connected => "Connected",
        }
    }
}
