use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use serial_tool_lib::serial::logging::{channel_tag, TrafficLog};
use serial_tool_lib::serial::transport::SimulatedTransport;
use serial_tool_lib::serial::{
    ChannelIndex, EventSink, PortSessionManager, SequenceIndex, SerialSettings, SessionEvent,
    SessionState, SimulatedProvider,
};
use serial_tool_lib::AppConfig;

const EVENT_TIMEOUT: Duration = Duration::from_secs(3);

fn ch(n: usize) -> ChannelIndex {
    ChannelIndex::new(n).unwrap()
}

fn seq(n: usize) -> SequenceIndex {
    SequenceIndex::new(n).unwrap()
}

fn simulated_session(transport: Arc<SimulatedTransport>) -> (PortSessionManager, Receiver<SessionEvent>) {
    let provider = Arc::new(SimulatedProvider::new());
    provider.insert(transport);
    let (sink, events) = EventSink::channel();
    (PortSessionManager::new(provider, sink), events)
}

/// Collect events up to and including the first one `done` accepts.
fn collect_until(events: &Receiver<SessionEvent>, mut done: impl FnMut(&SessionEvent) -> bool) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    loop {
        let event = events
            .recv_timeout(EVENT_TIMEOUT)
            .unwrap_or_else(|_| panic!("timed out, events so far: {:?}", seen));
        let stop = done(&event);
        seen.push(event);
        if stop {
            return seen;
        }
    }
}

fn sample_config(port: &str) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.serial = SerialSettings::for_port(port);
    cfg.set_data_field(ch(0), "0x01; 0x02");
    cfg.set_data_field(ch(1), "\"AB\"");
    cfg.set_data_field(ch(2), "300");
    cfg.set_seq_field(seq(0), "(1, 10, 2); (2, 0)");
    cfg.set_seq_field(seq(1), "(3, 0)");
    cfg
}

#[test]
fn test_configured_sequence_plays_in_order() {
    let transport = SimulatedTransport::new("SIM0");
    let (mut session, events) = simulated_session(transport.clone());
    let cfg = sample_config("SIM0");

    assert!(session.connect(&cfg.serial));
    assert!(matches!(events.recv_timeout(EVENT_TIMEOUT), Ok(SessionEvent::Connected { .. })));

    let blocks = cfg.parse_seq_field(seq(0)).into_data().unwrap();
    let started = session
        .start_sequence(seq(0), cfg.channel_table().snapshot(), blocks)
        .unwrap();
    assert!(started);

    let seen = collect_until(&events, |e| matches!(e, SessionEvent::SequenceFinished { .. }));
    let sent: Vec<usize> = seen
        .iter()
        .filter_map(|e| match e {
            SessionEvent::SequenceByteSent { channel, .. } => Some(channel.get()),
            _ => None,
        })
        .collect();
    assert_eq!(sent, vec![0, 0, 1]);
    assert_eq!(transport.drain_tx(), vec![1, 2, 1, 2, b'A', b'B']);

    session.disconnect();
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[test]
fn test_sequence_with_invalid_channel_is_refused() {
    let transport = SimulatedTransport::new("SIM1");
    let (mut session, _events) = simulated_session(transport.clone());
    let cfg = sample_config("SIM1");
    assert!(session.connect(&cfg.serial));

    // Channel 3 holds 300, which is not a byte, so the table leaves it empty.
    let blocks = cfg.parse_seq_field(seq(1)).into_data().unwrap();
    let err = session
        .start_sequence(seq(1), cfg.channel_table().snapshot(), blocks)
        .unwrap_err();
    assert!(err.message.ends_with(": 3"), "{}", err);
    assert!(session.running_sequences().is_empty());
    assert!(transport.peek_tx().is_empty());
}

#[test]
fn test_manual_send_loops_back_into_capture() {
    let transport = SimulatedTransport::with_loopback("LOOP");
    let (mut session, events) = simulated_session(transport);
    let cfg = sample_config("LOOP");
    assert!(session.connect(&cfg.serial));

    let payload = cfg.parse_data_field(ch(0)).into_data().unwrap();
    assert_eq!(session.write_channel(&payload).unwrap(), 2);

    let mut log = TrafficLog::default();
    log.record_tx(channel_tag(ch(0)), &payload);
    let mut received = Vec::new();
    collect_until(&events, |e| {
        if let SessionEvent::DataReceived { data } = e {
            received.extend_from_slice(data);
        }
        received.len() >= payload.len()
    });
    log.record_rx(&received);

    assert_eq!(received, payload);
    assert_eq!(log.export_plain(), "CH1--> [1, 2]\n   <-- [1, 2]\n");
}

#[test]
fn test_connect_failure_reports_error_then_closed() {
    let transport = SimulatedTransport::new("SIM2");
    transport.set_fail_open(Some("device busy"));
    let (mut session, events) = simulated_session(transport);

    assert!(!session.connect(&SerialSettings::for_port("SIM2")));
    let seen: Vec<SessionEvent> = events.try_iter().collect();
    assert!(matches!(&seen[0], SessionEvent::Error { message } if message.contains("device busy")));
    assert!(matches!(&seen[1], SessionEvent::Closed { port_name } if port_name == "SIM2"));
    assert!(!session.is_connected());
}

#[test]
fn test_saved_configuration_reopens_same_port() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("SerialToolCfg.json");
    let mut cfg = sample_config("SIM3");
    cfg.serial.baud_rate = 9600u32.into();
    cfg.save(&path).unwrap();

    let loaded = AppConfig::load(&path).unwrap().config;
    let transport = SimulatedTransport::new("SIM3");
    let (mut session, _events) = simulated_session(transport.clone());
    assert!(session.connect(&loaded.serial));
    assert_eq!(transport.last_settings(), Some(cfg.serial.clone()));
    assert_eq!(session.settings().map(|s| s.baud_rate.value()), Some(9600));
}
