use digest_harness::analysis::{JsonlEventSink, Tee};
use digest_harness::{EventLog, ProgressEvent, ProgressSink, Stage};
use tempfile::tempdir;

#[derive(Debug, serde::Deserialize)]
struct EventRow {
    stage: String,
    message: String,
    #[serde(default)]
    chunk: Option<usize>,
}

#[test]
fn jsonl_event_sink_writes_events_and_flushes_on_join() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.jsonl");

    let (mut sink, writer) = JsonlEventSink::create(&path).unwrap();
    sink.emit(ProgressEvent::chunked(3, 42_000));
    sink.emit(ProgressEvent::chunk_done(1, 3));
    sink.emit(ProgressEvent::report("# Report"));

    drop(sink);
    writer.join().unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = raw.lines().collect();
    assert_eq!(lines.len(), 3);

    let second: EventRow = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(second.stage, "mapping");
    assert_eq!(second.chunk, Some(1));
    assert_eq!(second.message, "Mapping: chunk 1/3 complete.");

    let last: ProgressEvent = serde_json::from_str(lines[2]).unwrap();
    assert_eq!(last, ProgressEvent::report("# Report"));
}

#[test]
fn tee_feeds_both_sinks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.jsonl");

    let (mut jsonl, writer) = JsonlEventSink::create(&path).unwrap();
    let mut log = EventLog::new();
    {
        let mut tee = Tee {
            first: &mut log,
            second: &mut jsonl,
        };
        tee.emit(ProgressEvent::single_call());
        tee.emit(ProgressEvent::failed(&"boom"));
    }
    drop(jsonl);
    writer.join().unwrap();

    assert_eq!(log.count(Stage::Chunking), 1);
    assert_eq!(log.count(Stage::Error), 1);
    let stages: Vec<Stage> = log.into_events().iter().map(|e| e.stage()).collect();
    assert_eq!(stages, vec![Stage::Chunking, Stage::Error]);

    let raw = std::fs::read_to_string(&path).unwrap();
    let last: EventRow = serde_json::from_str(raw.lines().last().unwrap()).unwrap();
    assert_eq!(last.stage, "error");
    assert_eq!(last.message, "Analysis failed: boom");
}

#[test]
fn jsonl_event_sink_replaces_a_previous_log() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    std::fs::write(&path, "{\"stage\":\"stale\"}\n{\"stage\":\"stale\"}\n").unwrap();

    let (mut sink, writer) = JsonlEventSink::create(&path).unwrap();
    sink.emit(ProgressEvent::single_call());
    drop(sink);
    writer.join().unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    assert_eq!(raw.lines().count(), 1);
    assert!(!raw.contains("stale"));
}
