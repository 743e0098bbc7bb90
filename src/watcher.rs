//! Polling file-change notifier.
//!
//! A background thread stats every watched file at a fixed short interval
//! and fires the registered callback when the (mtime, length) fingerprint
//! changes. The document controller brackets its own writes with
//! `start_ignoring` / `stop_ignoring` so saves do not come back as
//! "changed on disk" prompts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

pub type ChangeCallback = Arc<dyn Fn(&Path) + Send + Sync>;

#[derive(Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    mtime: Option<SystemTime>,
    len: u64,
}

impl Fingerprint {
    fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            mtime: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

struct WatchEntry {
    callback: ChangeCallback,
    ignored: bool,
    last_seen: Option<Fingerprint>,
}

pub struct FileWatcher {
    watches: Arc<Mutex<HashMap<PathBuf, WatchEntry>>>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FileWatcher {
    /// Start the polling thread. `poll_interval` should be short (the
    /// default supervisory cadence elsewhere in the crate is ~100ms).
    pub fn new(poll_interval: Duration) -> Self {
        let watches: Arc<Mutex<HashMap<PathBuf, WatchEntry>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_watches = Arc::clone(&watches);
        let thread_shutdown = Arc::clone(&shutdown);
        let thread = std::thread::Builder::new()
            .name("xmlpager-watcher".to_string())
            .spawn(move || {
                while !thread_shutdown.load(Ordering::SeqCst) {
                    Self::poll_once(&thread_watches);
                    std::thread::sleep(poll_interval);
                }
            })
            .expect("failed to spawn watcher thread");

        Self {
            watches,
            shutdown,
            thread: Some(thread),
        }
    }

    fn poll_once(watches: &Mutex<HashMap<PathBuf, WatchEntry>>) {
        // Collect due callbacks under the lock, invoke them outside it.
        let mut due: Vec<(PathBuf, ChangeCallback)> = Vec::new();
        {
            let mut watches = watches.lock().expect("watcher state poisoned");
            for (path, entry) in watches.iter_mut() {
                let current = Fingerprint::of(path);
                let changed = match (entry.last_seen, current) {
                    (Some(prev), Some(now)) => prev != now,
                    (None, Some(_)) | (Some(_), None) => true,
                    (None, None) => false,
                };
                if changed {
                    // While ignored, track the new fingerprint silently so
                    // our own write does not fire once ignoring stops.
                    if !entry.ignored {
                        due.push((path.clone(), Arc::clone(&entry.callback)));
                    }
                    entry.last_seen = current;
                }
            }
        }
        for (path, callback) in due {
            tracing::debug!("file changed externally: {}", path.display());
            callback(&path);
        }
    }

    pub fn start_watching(&self, path: impl Into<PathBuf>, on_change: ChangeCallback) {
        let path = path.into();
        let last_seen = Fingerprint::of(&path);
        self.watches.lock().expect("watcher state poisoned").insert(
            path,
            WatchEntry {
                callback: on_change,
                ignored: false,
                last_seen,
            },
        );
    }

    pub fn stop_watching(&self, path: &Path) {
        self.watches
            .lock()
            .expect("watcher state poisoned")
            .remove(path);
    }

    /// Suppress change notifications for `path` until `stop_ignoring`.
    pub fn start_ignoring(&self, path: &Path) {
        if let Some(entry) = self
            .watches
            .lock()
            .expect("watcher state poisoned")
            .get_mut(path)
        {
            entry.ignored = true;
        }
    }

    /// Resume notifications, adopting the file's current state as the
    /// baseline.
    pub fn stop_ignoring(&self, path: &Path) {
        if let Some(entry) = self
            .watches
            .lock()
            .expect("watcher state poisoned")
            .get_mut(path)
        {
            entry.ignored = false;
            entry.last_seen = Fingerprint::of(path);
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
