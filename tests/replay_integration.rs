// Integration tests for replayed sessions
//
// Runs the tracker loop the way the CLI does: a recording is replayed into a
// session whose telemetry goes to a JSON Lines file, accepted fixes are
// recorded again, and the loop ends once the recording is exhausted.

use std::{io, sync::mpsc, thread, time::Duration};

use busbuddy::{
    JsonLinesChannel, MemoryNotifier, RawFix, ReplayPositionSource, SessionConfig, StaticGrantor,
    TrackerEvent, TrackingSession,
    channel::{Endpoint, OutboundMessage, ReconnectPolicy},
    tracking::{Control, RuntimeOptions, run_tracker},
    writer,
};
use tempfile::TempDir;

fn route_fixes() -> Vec<RawFix> {
    (0..10)
        .map(|i| {
            let mut fix = RawFix::at(52.52, 13.40 + f64::from(i) * 0.001);
            fix.speed_meters_per_second = Some(10.);
            fix.heading_degrees = Some(90.);
            fix
        })
        .collect()
}

fn write_recording(dir: &TempDir, fixes: &[RawFix]) -> std::path::PathBuf {
    let path = dir.path().join("route.jsonl");
    serde_jsonlines::write_json_lines(&path, fixes).unwrap();
    path
}

#[test]
fn test_replay_to_file_endpoint() {
    let dir = TempDir::new().unwrap();
    let recording = write_recording(&dir, &route_fixes());
    let frames_path = dir.path().join("frames.jsonl");
    let rerecorded = dir.path().join("rerecorded.jsonl");

    let (tx, rx) = mpsc::channel::<TrackerEvent>();
    let source = ReplayPositionSource::from_file(&recording)
        .unwrap()
        .with_interval(Duration::from_millis(1));
    let channel = JsonLinesChannel::new(Endpoint::File(frames_path.clone()), ReconnectPolicy::default())
        .with_inbound(tx.clone());
    let config = SessionConfig {
        session_id: Some("replay-1".to_string()),
        ..SessionConfig::default()
    };
    let mut session = TrackingSession::new(config, source, MemoryNotifier::new(), channel, tx.clone());

    let (fix_tx, fix_rx) = mpsc::channel::<RawFix>();
    let writer_path = rerecorded.clone();
    let writer_handle = thread::spawn(move || writer::write_fixes(&writer_path, fix_rx));

    tx.send(TrackerEvent::Control(Control::Start)).unwrap();
    let options = RuntimeOptions {
        tick_interval: Duration::from_millis(20),
        stop_when_exhausted: true,
    };
    let summaries = run_tracker(
        &mut session,
        &mut StaticGrantor::granting_all(),
        rx,
        Some(fix_tx),
        &options,
    );
    assert_eq!(writer_handle.join().unwrap().unwrap(), 10);

    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary.session_id.as_deref(), Some("replay-1"));
    assert_eq!(summary.samples_received, 10);
    assert_eq!(summary.telemetry_sent, 10);
    // nine legs of 0.001 degrees of longitude at 52.52 N
    assert!((summary.total_distance_km - 0.609).abs() < 0.01);

    let frames = serde_jsonlines::json_lines(&frames_path)
        .unwrap()
        .collect::<Result<Vec<OutboundMessage>, io::Error>>()
        .unwrap();
    assert_eq!(frames.len(), 12);
    assert_eq!(frames[0].name(), "identify");
    assert_eq!(frames[1].name(), "driver:join");
    match &frames[11] {
        OutboundMessage::Location(payload) => {
            assert_eq!(payload.session_id, "replay-1");
            assert!((payload.speed_kmh - 36.).abs() < 1e-9);
            assert_eq!(payload.heading_degrees, 90.);
        }
        other => panic!("expected a location frame, got {other:?}"),
    }

    // the recording written during the run replays to the same path
    let replayed = ReplayPositionSource::from_file(&rerecorded).unwrap();
    assert_eq!(replayed.fixes(), route_fixes().as_slice());
}

#[test]
fn test_missing_recording() {
    let dir = TempDir::new().unwrap();
    let result = ReplayPositionSource::from_file(&dir.path().join("nope.jsonl"));
    assert!(matches!(
        result,
        Err(busbuddy::BusBuddyError::InvalidReplayFile { .. })
    ));
}
