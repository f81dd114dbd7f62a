// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios for the stateful tailer: plain appends, separator
//! handling, the rotation schemes it must survive, and restart recovery.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tower::BoxError;

use logtail::tailer::{
    Error, FilePositionStore, InitialPosition, MemoryPositionStore, PositionStore, StatefulTailer,
    TailerConfig, TailerHandle, TailerListener,
};

const READ_INTERVAL: Duration = Duration::from_millis(25);
const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Line(String),
    NotFound,
    Rotated,
    Fatal(String),
}

#[derive(Clone, Default)]
struct RecordingListener {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingListener {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn lines(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Line(line) => Some(line),
                _ => None,
            })
            .collect()
    }

    fn saw_rotation_before_line(&self, line: &str) -> bool {
        let events = self.events();
        let rotated = events.iter().position(|e| *e == Event::Rotated);
        let line = events
            .iter()
            .position(|e| matches!(e, Event::Line(l) if l == line));
        matches!((rotated, line), (Some(r), Some(l)) if r < l)
    }
}

impl TailerListener for RecordingListener {
    fn handle_line(&mut self, line: &[u8]) -> Result<(), BoxError> {
        self.events
            .lock()
            .unwrap()
            .push(Event::Line(String::from_utf8_lossy(line).into_owned()));
        Ok(())
    }

    fn file_not_found(&mut self) {
        self.events.lock().unwrap().push(Event::NotFound);
    }

    fn file_rotated(&mut self) {
        self.events.lock().unwrap().push(Event::Rotated);
    }

    fn handle_error(&mut self, error: &Error) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Fatal(error.to_string()));
    }
}

fn write_file(path: &Path, content: &[u8]) {
    fs::write(path, content).unwrap();
}

fn append(path: &Path, content: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(content).unwrap();
    file.flush().unwrap();
}

fn config_for(path: &Path) -> TailerConfig {
    TailerConfig {
        file: path.to_path_buf(),
        read_interval: READ_INTERVAL,
        // Small enough that a couple of log lines produce a fingerprint.
        fingerprint_bytes: 16,
        ..TailerConfig::default()
    }
}

fn spawn_tailer<S>(
    config: TailerConfig,
    store: S,
    listener: RecordingListener,
) -> (TailerHandle, JoinHandle<()>)
where
    S: PositionStore + 'static,
{
    let tailer = StatefulTailer::new(config, store, listener).expect("tailer config");
    let handle = tailer.handle();
    let join = thread::spawn(move || tailer.run());
    (handle, join)
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {what}");
}

fn stop(handle: TailerHandle, join: JoinHandle<()>) {
    handle.stop();
    join.join().unwrap();
}

#[test]
fn plain_append_delivers_lines_in_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    write_file(&path, b"a\nb\n");

    let listener = RecordingListener::default();
    let store = MemoryPositionStore::new();
    let (handle, join) = spawn_tailer(config_for(&path), store.clone(), listener.clone());

    wait_until("both lines", || listener.lines() == vec!["a", "b"]);
    // Four bytes is below the fingerprint size, so nothing is checkpointed.
    assert!(store.snapshot().is_empty());
    stop(handle, join);
}

#[test]
fn checkpoint_advances_past_each_line() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    let content = b"first line long enough to fingerprint\nsecond\n";
    write_file(&path, content);

    let listener = RecordingListener::default();
    let store = MemoryPositionStore::new();
    let (handle, join) = spawn_tailer(config_for(&path), store.clone(), listener.clone());

    wait_until("both lines", || listener.lines().len() == 2);
    wait_until("checkpoint at end of file", || {
        store
            .snapshot()
            .values()
            .any(|&offset| offset == content.len() as u64)
    });
    assert_eq!(store.snapshot().len(), 1);
    stop(handle, join);
}

#[test]
fn crlf_and_bare_cr_separators() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    write_file(&path, b"x\r\ny\rz\n");

    let listener = RecordingListener::default();
    let (handle, join) = spawn_tailer(
        config_for(&path),
        MemoryPositionStore::new(),
        listener.clone(),
    );

    wait_until("three lines", || listener.lines() == vec!["x", "y", "z"]);
    stop(handle, join);
}

#[test]
fn appends_are_picked_up_across_polls() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    write_file(&path, b"alpha\n");

    let listener = RecordingListener::default();
    let (handle, join) = spawn_tailer(
        config_for(&path),
        MemoryPositionStore::new(),
        listener.clone(),
    );

    wait_until("first line", || listener.lines() == vec!["alpha"]);

    append(&path, b"beta\n");
    append(&path, b"gamma\n");

    wait_until("all lines in order", || {
        listener.lines() == vec!["alpha", "beta", "gamma"]
    });
    stop(handle, join);
}

#[test]
fn rename_recreate_rotation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    let old_content = b"old-aaaaaaaaaaaaaaaa-1\nold-2\n";
    write_file(&path, old_content);

    let listener = RecordingListener::default();
    let store = MemoryPositionStore::new();
    let (handle, join) = spawn_tailer(config_for(&path), store.clone(), listener.clone());

    wait_until("old lines", || listener.lines().len() == 2);

    fs::rename(&path, dir.path().join("app.log.1")).unwrap();
    let new_content = b"new-bbbbbbbbbbbbbbbb-1\n";
    write_file(&path, new_content);

    wait_until("rotation separates old lines from new", || {
        listener.saw_rotation_before_line("new-bbbbbbbbbbbbbbbb-1")
    });

    // Both files are long enough to fingerprint, and the replacement's
    // checkpoint sits at its full length.
    wait_until("replacement checkpoint", || {
        store
            .snapshot()
            .values()
            .any(|&offset| offset == new_content.len() as u64)
    });
    assert_eq!(store.snapshot().len(), 2);
    stop(handle, join);
}

#[test]
fn same_length_rotation_with_newer_timestamp() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    write_file(&path, b"AAAAA\n");

    let listener = RecordingListener::default();
    let (handle, join) = spawn_tailer(
        config_for(&path),
        MemoryPositionStore::new(),
        listener.clone(),
    );

    wait_until("original content", || listener.lines() == vec!["AAAAA"]);

    // A strictly later modification time, at millisecond resolution.
    thread::sleep(Duration::from_millis(30));
    let staging = dir.path().join("replacement.tmp");
    write_file(&staging, b"BBBBB\n");
    fs::rename(&staging, &path).unwrap();

    wait_until("rotation then replacement content", || {
        listener.saw_rotation_before_line("BBBBB")
    });
    stop(handle, join);
}

#[test]
fn same_length_rotation_detected_by_prefix_hash() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");

    // The replacement is created before the original is ever read, so its
    // timestamp cannot trip the newer check; only the prefix hash differs.
    let staging = dir.path().join("replacement.tmp");
    write_file(&staging, b"BBBBB\n");
    thread::sleep(Duration::from_millis(30));
    write_file(&path, b"AAAAA\n");

    let listener = RecordingListener::default();
    let (handle, join) = spawn_tailer(
        config_for(&path),
        MemoryPositionStore::new(),
        listener.clone(),
    );

    wait_until("original content", || listener.lines() == vec!["AAAAA"]);

    fs::rename(&staging, &path).unwrap();

    wait_until("rotation then replacement content", || {
        listener.saw_rotation_before_line("BBBBB")
    });
    stop(handle, join);
}

#[test]
fn truncate_in_place_is_treated_as_rotation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    write_file(&path, b"first chunk of original content\n");

    let listener = RecordingListener::default();
    let (handle, join) = spawn_tailer(
        config_for(&path),
        MemoryPositionStore::new(),
        listener.clone(),
    );

    wait_until("original content", || listener.lines().len() == 1);

    // Truncating below the read position makes the held file impossible.
    write_file(&path, b"second round of content\n");

    wait_until("rotation then rewritten content", || {
        listener.saw_rotation_before_line("second round of content")
    });
    stop(handle, join);
}

#[test]
fn missing_file_then_created() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("not-yet.log");

    let listener = RecordingListener::default();
    let (handle, join) = spawn_tailer(
        config_for(&path),
        MemoryPositionStore::new(),
        listener.clone(),
    );

    wait_until("not-found notification", || {
        listener.events().contains(&Event::NotFound)
    });

    write_file(&path, b"hello\n");
    wait_until("content of the new file", || {
        listener.lines() == vec!["hello"]
    });
    stop(handle, join);
}

#[test]
fn restart_resumes_from_checkpoint() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    let store_path = dir.path().join("positions.json");
    write_file(&path, b"line-1 padded out past the fingerprint\n");

    {
        let store = FilePositionStore::open(&store_path).unwrap();
        let listener = RecordingListener::default();
        let (handle, join) = spawn_tailer(config_for(&path), store, listener.clone());
        wait_until("first line", || listener.lines().len() == 1);
        // Stopping flushes the checkpoint through the store's close.
        stop(handle, join);
    }

    append(&path, b"line-2\n");

    let store = FilePositionStore::open(&store_path).unwrap();
    let listener = RecordingListener::default();
    let (handle, join) = spawn_tailer(config_for(&path), store, listener.clone());

    wait_until("resumed line", || !listener.lines().is_empty());
    assert_eq!(listener.lines(), vec!["line-2"]);
    stop(handle, join);
}

#[test]
fn initial_position_end_skips_existing_content() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    write_file(&path, b"old content ignored entirely\n");

    let listener = RecordingListener::default();
    let config = TailerConfig {
        initial_position: InitialPosition::End,
        ..config_for(&path)
    };
    let (handle, join) = spawn_tailer(config, MemoryPositionStore::new(), listener.clone());

    // Give the tailer a few polls to (incorrectly) emit the old content.
    thread::sleep(READ_INTERVAL * 4);
    assert!(listener.lines().is_empty());

    append(&path, b"fresh\n");
    wait_until("only the appended line", || {
        listener.lines() == vec!["fresh"]
    });
    stop(handle, join);
}

struct FailingListener {
    events: Arc<Mutex<Vec<Event>>>,
}

impl TailerListener for FailingListener {
    fn handle_line(&mut self, _line: &[u8]) -> Result<(), BoxError> {
        Err("downstream rejected line".into())
    }

    fn handle_error(&mut self, error: &Error) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Fatal(error.to_string()));
    }
}

#[test]
fn listener_failure_stops_the_tailer() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    write_file(&path, b"boom\n");

    let events = Arc::new(Mutex::new(Vec::new()));
    let listener = FailingListener {
        events: events.clone(),
    };
    let tailer =
        StatefulTailer::new(config_for(&path), MemoryPositionStore::new(), listener).unwrap();

    // Exits on its own once the listener error surfaces.
    thread::spawn(move || tailer.run()).join().unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        Event::Fatal(message) if message.contains("downstream rejected line")
    ));
}
