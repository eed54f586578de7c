//! Buffered, rate-limited, append-only JSONL trace writer.
//!
//! The writer exclusively owns the trace file handle, the in-memory
//! buffer, the rate-limit state, and the bypass flag's transitions.
//! Patches receive an `Arc<TraceWriter>` and call [`TraceWriter::write`];
//! nothing more. All I/O goes through `std::fs` handles owned here —
//! never the patch facade — and the bypass flag is held across the single
//! underlying append so a facade call made during emission short-circuits
//! instead of re-entering the recorder.
//!
//! Every I/O failure is caught, logged, and degraded to event loss. The
//! writer never propagates errors into the host program.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::trace::TraceEvent;

/// Writer tuning knobs.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Buffered lines that force a flush.
    pub buffer_size: usize,
    /// Periodic flush interval in milliseconds.
    pub flush_interval_ms: u64,
    /// Events accepted per fixed 1-second window; `0` disables limiting.
    pub max_events_per_second: u32,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            buffer_size: 64,
            flush_interval_ms: 250,
            max_events_per_second: 10_000,
        }
    }
}

/// Counters exposed for tests and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterMetrics {
    pub total_events: u64,
    pub total_dropped: u64,
    pub buffer_length: usize,
}

struct Inner {
    file: Option<std::fs::File>,
    buffer: Vec<String>,
    window_start: Instant,
    window_count: u32,
    window_dropped: u64,
}

/// Append-only JSONL writer with buffering, a periodic flush thread, a
/// fixed-window rate limiter, and the process-wide bypass flag.
pub struct TraceWriter {
    inner: Mutex<Inner>,
    bypass: Arc<AtomicBool>,
    closed: AtomicBool,
    total_events: AtomicU64,
    total_dropped: AtomicU64,
    options: WriterOptions,
    trace_path: PathBuf,
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    flush_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl TraceWriter {
    /// Create the run directory (mode `0o700`) and trace file (mode
    /// `0o600`), and start the periodic flush thread.
    pub fn create(trace_path: &Path, options: WriterOptions) -> Result<Arc<Self>> {
        if let Some(parent) = trace_path.parent() {
            create_dir_owner_only(parent)
                .with_context(|| format!("Failed to create run dir: {}", parent.display()))?;
        }
        let file = open_append_owner_only(trace_path)
            .with_context(|| format!("Failed to open trace: {}", trace_path.display()))?;
        warn_if_loose_mode(trace_path);

        let writer = Arc::new(Self {
            inner: Mutex::new(Inner {
                file: Some(file),
                buffer: Vec::new(),
                window_start: Instant::now(),
                window_count: 0,
                window_dropped: 0,
            }),
            bypass: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
            total_events: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
            options,
            trace_path: trace_path.to_path_buf(),
            shutdown: Arc::new((Mutex::new(false), Condvar::new())),
            flush_thread: Mutex::new(None),
        });

        let thread = spawn_flush_thread(&writer);
        *writer.flush_thread.lock().expect("flush_thread mutex poisoned") = Some(thread);
        Ok(writer)
    }

    /// The shared bypass flag. Patches read it; only the writer sets it.
    pub fn bypass_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.bypass)
    }

    /// Whether the writer is currently inside its own append.
    pub fn is_bypassed(&self) -> bool {
        self.bypass.load(Ordering::SeqCst)
    }

    pub fn trace_path(&self) -> &Path {
        &self.trace_path
    }

    /// Serialize and buffer one event. Applies the rate limit; flushes
    /// when the buffer fills. Never fails into the caller.
    pub fn write(&self, event: &TraceEvent) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                crate::debug_log!("failed to serialize event: {}", e);
                return;
            }
        };

        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(_) => return,
        };

        if self.options.max_events_per_second > 0 {
            let now = Instant::now();
            if now.duration_since(inner.window_start) >= Duration::from_secs(1) {
                if inner.window_dropped > 0 {
                    eprintln!(
                        "[agentci] warning: rate limit dropped {} events in the last window",
                        inner.window_dropped
                    );
                }
                inner.window_start = now;
                inner.window_count = 0;
                inner.window_dropped = 0;
            }
            if inner.window_count >= self.options.max_events_per_second {
                inner.window_dropped += 1;
                self.total_dropped.fetch_add(1, Ordering::SeqCst);
                return;
            }
            inner.window_count += 1;
        }

        inner.buffer.push(line);
        self.total_events.fetch_add(1, Ordering::SeqCst);
        if inner.buffer.len() >= self.options.buffer_size {
            self.flush_locked(&mut inner);
        }
    }

    /// Flush buffered lines in one atomic append.
    pub fn flush(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            self.flush_locked(&mut inner);
        }
    }

    fn flush_locked(&self, inner: &mut Inner) {
        if inner.buffer.is_empty() {
            return;
        }
        let mut data = String::with_capacity(inner.buffer.iter().map(|l| l.len() + 1).sum());
        for line in inner.buffer.drain(..) {
            data.push_str(&line);
            data.push('\n');
        }
        let Some(file) = inner.file.as_mut() else {
            return;
        };

        // Critical section: the bypass flag covers only the append itself.
        self.bypass.store(true, Ordering::SeqCst);
        let result = file.write_all(data.as_bytes()).and_then(|_| file.flush());
        self.bypass.store(false, Ordering::SeqCst);

        if let Err(e) = result {
            crate::debug_log!("failed to flush trace: {}", e);
        }
    }

    /// Stop the flush thread and flush once. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let (lock, cvar) = &*self.shutdown;
            if let Ok(mut stop) = lock.lock() {
                *stop = true;
            }
            cvar.notify_all();
        }
        let handle = self
            .flush_thread
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            // The final Arc can be dropped by the flush thread itself;
            // joining from there would deadlock.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
        self.flush();
        if let Ok(mut inner) = self.inner.lock() {
            inner.file = None;
        }

        let dropped = self.total_dropped.load(Ordering::SeqCst);
        if dropped > 0 {
            eprintln!(
                "[agentci] warning: rate limit dropped {} events in total during this run",
                dropped
            );
        }
    }

    pub fn get_metrics(&self) -> WriterMetrics {
        let buffer_length = self
            .inner
            .lock()
            .map(|inner| inner.buffer.len())
            .unwrap_or(0);
        WriterMetrics {
            total_events: self.total_events.load(Ordering::SeqCst),
            total_dropped: self.total_dropped.load(Ordering::SeqCst),
            buffer_length,
        }
    }
}

impl Drop for TraceWriter {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_flush_thread(writer: &Arc<TraceWriter>) -> std::thread::JoinHandle<()> {
    let weak = Arc::downgrade(writer);
    let shutdown = Arc::clone(&writer.shutdown);
    let interval = Duration::from_millis(writer.options.flush_interval_ms.max(1));
    std::thread::Builder::new()
        .name("agentci-flush".to_string())
        .spawn(move || {
            let (lock, cvar) = &*shutdown;
            loop {
                let stop = {
                    let Ok(guard) = lock.lock() else { return };
                    let Ok((guard, _)) = cvar.wait_timeout(guard, interval) else {
                        return;
                    };
                    *guard
                };
                if stop {
                    return;
                }
                match weak.upgrade() {
                    Some(writer) => writer.flush(),
                    None => return,
                }
            }
        })
        .expect("spawn flush thread")
}

#[cfg(unix)]
fn create_dir_owner_only(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    if dir.exists() {
        return Ok(());
    }
    std::fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_dir_owner_only(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}

#[cfg(unix)]
fn open_append_owner_only(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_append_owner_only(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}

fn warn_if_loose_mode(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = std::fs::metadata(path) {
            let mode = meta.permissions().mode() & 0o777;
            if mode & 0o077 != 0 {
                eprintln!(
                    "[agentci] warning: trace file {} has mode {:o}; the filesystem \
                     does not enforce owner-only access",
                    path.display(),
                    mode
                );
            }
        }
    }
    #[cfg(not(unix))]
    {
        crate::debug_log!(
            "owner-only mode not enforceable for {} on this platform",
            path.display()
        );
    }
}
