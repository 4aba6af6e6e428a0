//! Command-line front end.
//!
//! Owns a [`PortSessionManager`], drains its events on the main thread,
//! prints them in the configured [`OutputRepresentation`] and keeps an
//! RX/TX capture that can be exported on exit.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::filter::LevelFilter;

use sertool_serial::serial::logging::{channel_tag, sequence_tag, ExportFormat, TrafficLog};
use sertool_serial::serial::port_scanner::{describe_port, list_port_details};
use sertool_serial::serial::{
    parse_channel_data, parse_seq_data, BaudRate, ChannelIndex, ChannelSnapshot, EventSink,
    PortSessionManager, SequenceIndex, SessionEvent, TextFieldStatus, NUM_DATA_CHANNELS,
    NUM_SEQ_CHANNELS,
};

use crate::config::AppConfig;
use crate::display::{OutputRepresentation, RxLineBreaker};
use crate::error::{ConfigError, ConfigErrorKind, ConfigResult};
use crate::paths;
use crate::recent::RecentConfigs;

/// How long `send` keeps listening for a reply by default.
const DEFAULT_REPLY_WAIT_MS: u64 = 500;
/// Extra time granted to a stopped sequence to report that it finished.
const SEQUENCE_STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(
    name = "serial-tool",
    version,
    about = "UART terminal: send channel data, play sequences and watch received bytes"
)]
pub struct Cli {
    /// TRACE, DEBUG, INFO, WARN or ERROR. `RUST_LOG` takes precedence.
    #[arg(long, value_name = "LEVEL", default_value = "DEBUG", value_parser = parse_log_level)]
    pub log_level: LevelFilter,

    /// Write stderr log lines as JSON.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub log_json: bool,

    /// Do not write the application log file.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub no_log_file: bool,

    /// Configuration file to load.
    #[arg(long, value_name = "FILE", conflicts_with = "load_mru_cfg")]
    pub config: Option<PathBuf>,

    /// Load the most recently used configuration file.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub load_mru_cfg: bool,

    /// Output representation, overriding the configuration.
    #[arg(long, value_name = "REPR")]
    pub repr: Option<OutputRepresentation>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List serial ports reported by the OS.
    Ports {
        #[arg(long, action = clap::ArgAction::SetTrue)]
        details: bool,
    },
    /// Parse channel data text and print the resulting bytes.
    ParseData { text: String },
    /// Parse sequence text and print its blocks.
    ParseSeq { text: String },
    /// Send one data channel and listen for the reply.
    Send {
        /// 1-based data channel number.
        #[arg(long, value_name = "N")]
        channel: usize,

        /// Channel text to send instead of the configured field.
        #[arg(long, value_name = "TEXT")]
        data: Option<String>,

        #[arg(long, value_name = "MS", default_value_t = DEFAULT_REPLY_WAIT_MS)]
        wait_ms: u64,

        #[command(flatten)]
        conn: ConnectArgs,
    },
    /// Play one configured sequence to its end.
    Sequence {
        /// 1-based sequence number.
        #[arg(long, value_name = "N")]
        index: usize,

        /// Stop the sequence after this many seconds.
        #[arg(long, value_name = "S", default_value_t = 60)]
        timeout: u64,

        #[command(flatten)]
        conn: ConnectArgs,
    },
    /// Print received data for a while.
    Monitor {
        #[arg(long, value_name = "S", default_value_t = 10)]
        seconds: u64,

        #[command(flatten)]
        conn: ConnectArgs,
    },
    /// Write a configuration file with default values.
    InitConfig {
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

/// Options shared by every command that opens a port.
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Port name, overriding the configuration.
    #[arg(long, value_name = "NAME")]
    pub port: Option<String>,

    /// Baud rate, overriding the configuration.
    #[arg(long, value_name = "BAUD")]
    pub baud: Option<u32>,

    /// Write the RX/TX capture to FILE on exit.
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// plain, csv or json.
    #[arg(long, value_name = "FORMAT", default_value = "plain")]
    pub export_format: ExportFormat,
}

fn parse_log_level(s: &str) -> Result<LevelFilter, String> {
    crate::logging::parse_level(s).map_err(|e| e.message)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn run(cli: Cli) -> ConfigResult<()> {
    let recent = RecentConfigs::default_location();
    let config = load_config(&cli, &recent)?;
    let repr = cli.repr.unwrap_or(config.output_representation);

    match cli.command {
        Command::Ports { details } => list_ports(details),
        Command::ParseData { text } => parse_data(&text, repr),
        Command::ParseSeq { text } => parse_seq(&text),
        Command::InitConfig { file } => {
            let path = file.unwrap_or_else(paths::default_cfg_file);
            AppConfig::default().save(&path)?;
            if let Err(e) = recent.add(&path) {
                log::warn!("{}", e);
            }
            println!("Configuration written: {}", path.display());
            Ok(())
        }
        Command::Send {
            channel,
            data,
            wait_ms,
            conn,
        } => {
            let ch = channel_arg(channel)?;
            let text = data.unwrap_or_else(|| config.data_fields[ch.get()].clone());
            let payload = parse_channel_data(&text)
                .into_result()?
                .ok_or_else(|| ConfigError::invalid_value(format!("data channel {} has no data", ch)))?;

            let mut term = Terminal::new(&config, repr);
            let (mut session, events) = open(&config, &conn)?;
            let result = session
                .write_channel(&payload)
                .map_err(ConfigError::from)
                .map(|_| {
                    term.tx(&channel_tag(ch), &payload);
                    term.pump(&events, Duration::from_millis(wait_ms), |_| false);
                });
            session.disconnect();
            term.pump(&events, Duration::ZERO, |_| false);
            finish(term, &conn, result)
        }
        Command::Sequence {
            index,
            timeout,
            conn,
        } => {
            let seq = SequenceIndex::from_one_based(index as i64).ok_or_else(|| {
                ConfigError::invalid_value(format!(
                    "sequence number must be 1..={}, got {}",
                    NUM_SEQ_CHANNELS, index
                ))
            })?;
            let blocks = config
                .parse_seq_field(seq)
                .into_result()?
                .ok_or_else(|| ConfigError::invalid_value(format!("sequence {} is empty", seq)))?;
            let snapshot = config.channel_table().snapshot();

            let mut term = Terminal::new(&config, repr);
            term.snapshot = Some(snapshot.clone());
            let (mut session, events) = open(&config, &conn)?;
            let result = session
                .start_sequence(seq, snapshot, blocks)
                .map_err(ConfigError::from)
                .map(|_| {
                    let is_done =
                        |e: &SessionEvent| matches!(e, SessionEvent::SequenceFinished { sequence } if *sequence == seq);
                    if !term.pump(&events, Duration::from_secs(timeout), is_done) {
                        log::warn!("Sequence {} still running after {} s, stopping", seq, timeout);
                        session.stop_sequence(seq);
                        term.pump(&events, SEQUENCE_STOP_GRACE, is_done);
                    }
                });
            session.disconnect();
            term.pump(&events, Duration::ZERO, |_| false);
            finish(term, &conn, result)
        }
        Command::Monitor { seconds, conn } => {
            let mut term = Terminal::new(&config, repr);
            let (mut session, events) = open(&config, &conn)?;
            term.pump(&events, Duration::from_secs(seconds), |_| false);
            session.disconnect();
            term.pump(&events, Duration::ZERO, |_| false);
            finish(term, &conn, Ok(()))
        }
    }
}

fn load_config(cli: &Cli, recent: &RecentConfigs) -> ConfigResult<AppConfig> {
    let path = match (&cli.config, cli.load_mru_cfg) {
        (Some(path), _) => path.clone(),
        (None, true) => recent
            .most_recent()
            .ok_or_else(|| ConfigError::not_found("no recently used configuration file"))?,
        (None, false) => return Ok(AppConfig::default()),
    };
    let report = AppConfig::load(&path)?;
    if let Err(e) = recent.add(&path) {
        log::warn!("{}", e);
    }
    Ok(report.config)
}

fn open(config: &AppConfig, conn: &ConnectArgs) -> ConfigResult<(PortSessionManager, Receiver<SessionEvent>)> {
    let mut settings = config.serial.clone();
    if let Some(port) = &conn.port {
        settings.port_name = port.clone();
    }
    if let Some(baud) = conn.baud {
        settings.baud_rate = BaudRate::from_value(baud);
    }
    if settings.port_name.is_empty() {
        return Err(ConfigError::not_found(
            "no serial port selected; pass --port or load a configuration with a port",
        ));
    }

    let (sink, events) = EventSink::channel();
    let mut session = PortSessionManager::native(sink);
    if session.connect(&settings) {
        return Ok((session, events));
    }
    let reason = events
        .try_iter()
        .find_map(|e| match e {
            SessionEvent::Error { message } => Some(message),
            _ => None,
        })
        .unwrap_or_else(|| format!("unable to open {}", settings.port_name));
    Err(ConfigError::new(ConfigErrorKind::Serial, reason))
}

fn finish(mut term: Terminal, conn: &ConnectArgs, result: ConfigResult<()>) -> ConfigResult<()> {
    export_capture(&mut term, conn)?;
    result
}

fn export_capture(term: &mut Terminal, conn: &ConnectArgs) -> ConfigResult<()> {
    if let Some(path) = &conn.export {
        term.traffic
            .write_to_file(path, conn.export_format)
            .map_err(|e| ConfigError::from(e).with_path(path))?;
    }
    Ok(())
}

fn channel_arg(channel: usize) -> ConfigResult<ChannelIndex> {
    ChannelIndex::from_one_based(channel as i64).ok_or_else(|| {
        ConfigError::invalid_value(format!(
            "data channel number must be 1..={}, got {}",
            NUM_DATA_CHANNELS, channel
        ))
    })
}

// ── Offline commands ─────────────────────────────────────────────────

fn list_ports(details: bool) -> ConfigResult<()> {
    let ports = list_port_details()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for info in &ports {
        if details {
            println!("{}", describe_port(info));
        } else {
            println!("{}", info.port_name);
        }
    }
    Ok(())
}

fn parse_data(text: &str, repr: OutputRepresentation) -> ConfigResult<()> {
    let outcome = parse_channel_data(text);
    match outcome.status() {
        TextFieldStatus::Empty => println!("(no content)"),
        TextFieldStatus::Ok | TextFieldStatus::Bad => {
            if let Some(data) = outcome.into_result()? {
                println!("{} byte(s): {}", data.len(), repr.format(&data));
            }
        }
    }
    Ok(())
}

fn parse_seq(text: &str) -> ConfigResult<()> {
    match parse_seq_data(text).into_result()? {
        None => println!("(no content)"),
        Some(blocks) => {
            for block in blocks {
                println!(
                    "channel {}, delay {} ms, repeat {}",
                    block.channel, block.delay_ms, block.repeat
                );
            }
        }
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Terminal output
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Terminal {
    repr: OutputRepresentation,
    breaker: RxLineBreaker,
    traffic: TrafficLog,
    rx_to_log: bool,
    tx_to_log: bool,
    /// Payloads of the running sequence, for recording what it sent.
    snapshot: Option<ChannelSnapshot>,
}

impl Terminal {
    fn new(config: &AppConfig, repr: OutputRepresentation) -> Self {
        Self {
            repr,
            breaker: RxLineBreaker::new(config.new_line_on_rx, config.rx_newline_timeout()),
            traffic: TrafficLog::default(),
            rx_to_log: config.rx_to_log,
            tx_to_log: config.tx_to_log,
            snapshot: None,
        }
    }

    /// Handle events until `done` accepts one or `budget` runs out.
    ///
    /// Returns `true` if `done` matched.
    fn pump(
        &mut self,
        events: &Receiver<SessionEvent>,
        budget: Duration,
        done: impl Fn(&SessionEvent) -> bool,
    ) -> bool {
        let deadline = Instant::now() + budget;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match events.recv_timeout(remaining) {
                Ok(event) => {
                    self.handle(&event);
                    if done(&event) {
                        return true;
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    fn handle(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::DataReceived { data } => self.rx(data),
            SessionEvent::SequenceByteSent { sequence, channel } => {
                let data = self
                    .snapshot
                    .as_ref()
                    .and_then(|s| s.get(*channel))
                    .map(<[u8]>::to_vec)
                    .unwrap_or_default();
                self.tx(&sequence_tag(*sequence, *channel), &data);
            }
            SessionEvent::Connected { port_name } => self.line(&format!("Connected: {}", port_name)),
            SessionEvent::Closed { port_name } => self.line(&format!("Closed: {}", port_name)),
            SessionEvent::SequenceFinished { sequence } => {
                self.line(&format!("Sequence {} finished", sequence))
            }
            SessionEvent::Error { message } => self.line(&format!("Error: {}", message)),
        }
    }

    fn rx(&mut self, data: &[u8]) {
        if !self.rx_to_log {
            return;
        }
        self.traffic.record_rx(data);
        let prefix = self.breaker.prefix(Instant::now());
        let mut out = io::stdout().lock();
        let _ = write!(out, "{}{}", prefix, self.repr.format(data));
        let _ = out.flush();
    }

    fn tx(&mut self, tag: &str, data: &[u8]) {
        if !self.tx_to_log {
            return;
        }
        self.traffic.record_tx(tag, data);
        self.line(&format!("{} --> {}", tag, self.repr.format(data)));
    }

    fn line(&mut self, text: &str) {
        let mut out = io::stdout().lock();
        if self.breaker.mid_line() {
            let _ = writeln!(out);
        }
        let _ = writeln!(out, "{}", text);
        self.breaker.interrupt();
    }
}
