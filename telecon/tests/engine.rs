use std::cell::RefCell;
use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpListener;
use std::rc::Rc;
use std::time::{Duration, Instant};

use telecon::console::{
    Direction, DurableStore, FileStore, Ingested, PersistenceError, StoreRecord, ViewHandle,
    ViewObserver,
};
use telecon::data::{Backfill, Point, SubscriberCursor};
use telecon::link::{ConnectionError, LinkState, ProtocolError, SendError};
use telecon::{ConsoleConfig, Engine};

const TEMP_LINE: &str = "2024-Jan-01 10:00:00 1 note de1.temp 23.5/C";
const ACK_LINE: &str = "2024-Jan-01 10:00:01 2 ACK";
const JAN_1_10AM: f64 = 1_704_103_200.0;

fn pump_until(engine: &mut Engine, frames: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while engine.log().len() < frames {
        assert!(Instant::now() < deadline, "timed out waiting for frames");
        engine.pump(Duration::from_millis(50)).unwrap();
    }
}

#[test]
fn property_change_updates_cache_and_views() {
    let mut engine = Engine::default();
    let view = engine.open_view(["de1.temp"]);

    let report = engine.ingest_line(TEMP_LINE);
    assert_eq!(report.refreshed, 1);
    assert_eq!(engine.properties().get("de1.temp"), Some("23.5/C"));
    assert_eq!(
        engine.view(view).unwrap().series("de1.temp").unwrap(),
        [Point {
            time: JAN_1_10AM,
            value: 23.5
        }]
    );
}

#[test]
fn ack_leaves_cache_and_series_alone() {
    let mut engine = Engine::default();
    engine.ingest_line(TEMP_LINE);
    let view = engine.open_view(["de1.temp"]);
    let before = engine.view(view).unwrap().series("de1.temp").unwrap().to_vec();

    let report = engine.ingest_line(ACK_LINE);
    assert_eq!(report.outcome, Ingested::Ack { index: 1 });
    assert_eq!(engine.log().len(), 2);
    assert_eq!(engine.properties().len(), 1);
    assert_eq!(
        engine.view(view).unwrap().series("de1.temp").unwrap(),
        before.as_slice()
    );
    assert_eq!(engine.view(view).unwrap().next_index(), 2);
}

#[test]
fn malformed_line_is_dropped() {
    let (raw_tx, raw_rx) = crossbeam::channel::unbounded::<(Direction, String)>();
    let mut engine = Engine::default().with_raw_sink(raw_tx);
    let view = engine.open_view(["de1.temp"]);

    let line = "2024-Jan-01 10:00:02 3 note de1.temp";
    let report = engine.ingest_line(line);
    assert_eq!(report.outcome, Ingested::Dropped(ProtocolError::TokenCount(5)));
    assert_eq!(raw_rx.try_recv().unwrap(), (Direction::Inbound, line.to_string()));
    assert!(engine.log().is_empty());
    assert!(engine.properties().is_empty());
    assert!(engine.view(view).unwrap().series("de1.temp").unwrap().is_empty());
}

#[test]
fn latest_value_wins() {
    let mut engine = Engine::default();
    for (i, value) in ["1.0/V", "2.0/V", "1.5/V"].iter().enumerate() {
        engine.ingest_line(&format!("2024-Jan-01 10:00:0{} {} note coil0.v {}", i, i, value));
    }
    assert_eq!(engine.properties().get("coil0.v"), Some("1.5/V"));
    assert_eq!(engine.properties().len(), 1);
}

#[test]
fn view_opened_late_matches_full_history() {
    let mut engine = Engine::default();
    let lines: Vec<String> = (0..10)
        .map(|i| {
            let property = if i % 3 == 0 { "a" } else { "b" };
            format!("2024-Jan-01 10:00:{:02} {} note {} {}", i, i, property, i)
        })
        .collect();

    for line in &lines[..6] {
        engine.ingest_line(line);
    }
    let view = engine.open_view(["a"]);
    for line in &lines[6..] {
        engine.ingest_line(line);
    }

    let values: Vec<f64> = engine
        .view(view)
        .unwrap()
        .series("a")
        .unwrap()
        .iter()
        .map(|p| p.value)
        .collect();
    assert_eq!(values, [0.0, 3.0, 6.0, 9.0]);
}

#[test]
fn skip_last_policy_applies_to_new_views() {
    let mut engine = Engine::default().with_backfill(Backfill::SkipLast);
    engine.ingest_line(TEMP_LINE);
    let view = engine.open_view(["de1.temp"]);
    assert!(engine.view(view).unwrap().series("de1.temp").unwrap().is_empty());
    assert_eq!(engine.view(view).unwrap().next_index(), 1);
}

#[test]
fn adding_and_removing_view_targets() {
    let mut engine = Engine::default();
    engine.ingest_line(TEMP_LINE);
    engine.ingest_line("2024-Jan-01 10:00:02 3 note coil0.cur 0.5/A");
    let view = engine.open_view(["de1.temp"]);

    assert!(engine.add_view_target(view, "coil0.cur").unwrap());
    assert!(!engine.add_view_target(view, "coil0.cur").unwrap());
    assert_eq!(
        engine.view(view).unwrap().series("coil0.cur").unwrap().len(),
        1
    );
    assert!(engine.remove_view_target(view, "de1.temp").unwrap());
    assert_eq!(engine.view(view).unwrap().targets(), ["coil0.cur"]);

    engine.close_view(view).unwrap();
    assert!(engine.views().is_empty());
}

struct Notifications(Rc<RefCell<Vec<(ViewHandle, usize)>>>);

impl ViewObserver for Notifications {
    fn refresh(&mut self, handle: ViewHandle, cursor: &SubscriberCursor) {
        self.0.borrow_mut().push((handle, cursor.point_count()));
    }
}

#[test]
fn every_view_is_notified_per_frame() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut engine = Engine::default().with_observer(Notifications(seen.clone()));
    let a = engine.open_view(["de1.temp"]);
    let b = engine.open_view(["coil0.cur"]);

    engine.ingest_line(TEMP_LINE);
    engine.ingest_line(ACK_LINE);
    engine.ingest_line("bad line");
    assert_eq!(*seen.borrow(), [(a, 1), (b, 0), (a, 1), (b, 0)]);

    engine.close_view(a).unwrap();
    engine.ingest_line(ACK_LINE);
    assert_eq!(seen.borrow().last(), Some(&(b, 0)));
    assert_eq!(seen.borrow().len(), 5);
}

struct BrokenStore;

impl DurableStore for BrokenStore {
    fn append(&mut self, _record: &StoreRecord) -> Result<(), PersistenceError> {
        Err(io::Error::new(io::ErrorKind::Other, "disk full").into())
    }
}

#[test]
fn persistence_failure_does_not_block_state() {
    let mut engine = Engine::default().with_store(BrokenStore);
    let view = engine.open_view(["de1.temp"]);
    let report = engine.ingest_line(TEMP_LINE);

    assert!(report.persistence.is_some());
    assert_eq!(engine.properties().get("de1.temp"), Some("23.5/C"));
    assert_eq!(engine.log().len(), 1);
    assert_eq!(engine.view(view).unwrap().series("de1.temp").unwrap().len(), 1);

    // acks never reach the store
    assert!(engine.ingest_line(ACK_LINE).persistence.is_none());
}

#[test]
fn store_and_exports_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("store.tsv");
    let config = ConsoleConfig {
        store_path: Some(store_path.clone()),
        ..Default::default()
    };
    let mut engine = Engine::from_config(&config).unwrap();
    engine.ingest_line(TEMP_LINE);
    engine.ingest_line(ACK_LINE);

    assert_eq!(
        std::fs::read_to_string(&store_path).unwrap(),
        "2024-Jan-01 10:00:00\t1\tnote\tde1.temp\t23.5/C\n"
    );

    let export_path = dir.path().join("log.txt");
    assert_eq!(engine.export_log(&export_path).unwrap(), 2);
    assert_eq!(
        std::fs::read_to_string(&export_path).unwrap(),
        format!("{}\n{}\n", TEMP_LINE, ACK_LINE)
    );
    assert_eq!(engine.log().len(), 2);
}

#[test]
fn store_file_can_be_shared_with_a_second_handle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.tsv");
    let mut engine = Engine::default().with_store(FileStore::open(&path).unwrap());
    engine.ingest_line(TEMP_LINE);
    let mut other = FileStore::open(&path).unwrap();
    other
        .append(&StoreRecord {
            timestamp: "2024-Jan-01 10:00:05".to_string(),
            sequence: "9".to_string(),
            note: "note".to_string(),
            property: "x".to_string(),
            value: "1".to_string(),
        })
        .unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
}

#[test]
fn connect_to_unreachable_host() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let mut engine = Engine::default();

    let err = engine.connect("127.0.0.1", port).unwrap_err();
    assert!(matches!(
        err,
        ConnectionError::Unreachable { .. } | ConnectionError::Timeout(_)
    ));
    assert_eq!(engine.state(), LinkState::Disconnected);
    assert!(engine.history().is_empty());
    assert!(engine.send("get x").is_err());
    assert!(engine.history().is_empty());
}

#[test]
fn loopback_session() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut engine = Engine::default();
    let peer = engine.connect("127.0.0.1", port).unwrap();
    assert_eq!(peer.port(), port);
    assert_eq!(engine.state(), LinkState::Connected);
    assert!(matches!(
        engine.connect("127.0.0.1", port),
        Err(ConnectionError::AlreadyConnected(_))
    ));

    let (stream, _) = listener.accept().unwrap();
    let mut instrument = stream.try_clone().unwrap();
    let mut commands = BufReader::new(stream);

    let view = engine.open_view(["de1.temp"]);
    instrument
        .write_all(b"Succesfully Connected to Host \r\n")
        .unwrap();
    instrument
        .write_all(format!("{}\r\n{}\r\n", TEMP_LINE, ACK_LINE).as_bytes())
        .unwrap();
    pump_until(&mut engine, 2);

    assert_eq!(engine.properties().get("de1.temp"), Some("23.5/C"));
    assert_eq!(engine.view(view).unwrap().series("de1.temp").unwrap().len(), 1);

    assert_eq!(engine.send("get de1.temp").unwrap(), "get de1.temp \n");
    engine.send("get de1.temp").unwrap();
    let mut line = String::new();
    commands.read_line(&mut line).unwrap();
    assert_eq!(line, "get de1.temp \n");
    assert_eq!(engine.history().iter().collect::<Vec<_>>(), ["get de1.temp"]);
    assert_eq!(engine.history().cursor(), 0);

    engine.disconnect().unwrap();
    assert_eq!(engine.state(), LinkState::Disconnected);
    assert!(matches!(
        engine.disconnect(),
        Err(ConnectionError::NotConnected)
    ));
}

#[test]
fn send_resets_history_recall() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut config = ConsoleConfig::default();
    config.history_seed = vec!["get a".into(), "get b".into(), "get c".into()];
    let mut engine = Engine::from_config(&config).unwrap();
    engine.connect("127.0.0.1", port).unwrap();
    let (stream, _) = listener.accept().unwrap();

    assert_eq!(engine.history_up().as_deref(), Some("get c"));
    assert_eq!(engine.history_up().as_deref(), Some("get b"));
    assert_eq!(engine.history().cursor(), 2);

    engine.send("get de1.temp").unwrap();
    let mut line = String::new();
    BufReader::new(stream).read_line(&mut line).unwrap();
    assert_eq!(line, "get de1.temp \n");

    assert_eq!(engine.history().cursor(), 0);
    assert_eq!(engine.history_up().as_deref(), Some("get de1.temp"));
}

#[test]
fn send_to_stalled_instrument_fails_without_blocking() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut engine = Engine::default();
    engine.connect("127.0.0.1", port).unwrap();
    // Accepted but never read, so the socket buffer and the queue fill up.
    let (_stream, _) = listener.accept().unwrap();

    let padding = "x".repeat(4000);
    let deadline = Instant::now() + Duration::from_secs(20);
    let mut sent = 0;
    let err = loop {
        assert!(Instant::now() < deadline, "queue never filled");
        let before: Vec<String> = engine.history().iter().map(String::from).collect();
        match engine.send(&format!("set {} {}", sent, padding)) {
            Ok(_) => sent += 1,
            Err(err) => {
                let after: Vec<String> = engine.history().iter().map(String::from).collect();
                assert_eq!(before, after);
                break err;
            }
        }
    };
    assert!(matches!(err, SendError::Full), "unexpected error {:?}", err);
    assert!(sent > 0);
    assert_eq!(engine.state(), LinkState::Connected);
}

#[test]
fn remote_close_is_reported_once() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut engine = Engine::default();
    engine.connect("127.0.0.1", port).unwrap();
    let (mut stream, _) = listener.accept().unwrap();
    stream
        .write_all(format!("{}\n", TEMP_LINE).as_bytes())
        .unwrap();
    drop(stream);

    let deadline = Instant::now() + Duration::from_secs(5);
    let err = loop {
        assert!(Instant::now() < deadline, "link loss not reported");
        match engine.pump(Duration::from_millis(50)) {
            Ok(_) => continue,
            Err(err) => break err,
        }
    };
    assert!(matches!(err, ConnectionError::Lost { .. }));
    assert_eq!(engine.state(), LinkState::Disconnected);
    assert_eq!(engine.log().len(), 1);
    assert!(matches!(
        engine.pump(Duration::ZERO),
        Err(ConnectionError::NotConnected)
    ));
}
