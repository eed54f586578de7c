//! Recorder runtime: lifecycle management for a recording run.
//!
//! A [`Recorder`] owns the writer and the facade bundle for one run. It
//! activates either from the `AGENTCI_*` environment (the CLI `record`
//! path) or programmatically via [`RecorderOptions`]. Startup emits a
//! `lifecycle: start` event and constructs the facades in a fixed order —
//! env-sensitive first, then filesystem, subprocess, network — because
//! later facades may read environment variables.
//!
//! State machine: `Uninitialized → Ready → Stopping → Stopped`.
//! Termination is idempotent: the first of explicit [`Recorder::stop`],
//! the panic hook, or the drop guard wins; the rest are no-ops.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Instant;

use crate::config::PolicyConfig;
use crate::enforce::Enforcer;
use crate::patches::{PatchContext, Patches};
use crate::trace::{make_event, EventType};
use crate::writer::{TraceWriter, WriterOptions};

const STATE_UNINITIALIZED: u8 = 0;
const STATE_READY: u8 = 1;
const STATE_STOPPING: u8 = 2;
const STATE_STOPPED: u8 = 3;

/// Programmatic startup options, mirroring the environment surface.
#[derive(Debug, Clone)]
pub struct RecorderOptions {
    pub run_dir: PathBuf,
    pub run_id: Option<String>,
    pub workspace_root: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
    pub enforce: bool,
}

impl RecorderOptions {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
            run_id: None,
            workspace_root: None,
            config_path: None,
            enforce: false,
        }
    }
}

/// An active recording run.
pub struct Recorder {
    run_id: String,
    writer: Arc<TraceWriter>,
    ctx: Arc<PatchContext>,
    patches: Patches,
    state: AtomicU8,
    started: Instant,
}

static ACTIVE: OnceLock<Mutex<Option<Arc<Recorder>>>> = OnceLock::new();

fn active_slot() -> &'static Mutex<Option<Arc<Recorder>>> {
    ACTIVE.get_or_init(|| Mutex::new(None))
}

impl Recorder {
    /// Start recording when `AGENTCI_RUN_DIR` is set; `Ok(None)` when it
    /// is not. This is the host-side entry point for CLI-driven runs.
    pub fn start_from_env() -> Result<Option<Arc<Self>>> {
        let Some(run_dir) = std::env::var_os("AGENTCI_RUN_DIR") else {
            return Ok(None);
        };
        let mut options = RecorderOptions::new(PathBuf::from(run_dir));
        options.run_id = std::env::var("AGENTCI_RUN_ID").ok();
        options.workspace_root = std::env::var_os("AGENTCI_WORKSPACE_ROOT").map(PathBuf::from);
        options.config_path = std::env::var_os("AGENTCI_CONFIG_PATH").map(PathBuf::from);
        options.enforce = Enforcer::enabled_from_env();
        Self::start(options).map(Some)
    }

    /// Start recording with explicit options.
    pub fn start(options: RecorderOptions) -> Result<Arc<Self>> {
        if options.run_dir.as_os_str().is_empty() {
            bail!("run_dir is required");
        }
        let run_id = options
            .run_id
            .clone()
            .or_else(|| {
                options
                    .run_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(crate::runs::new_run_id);
        let workspace_root = options
            .workspace_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        let config = Arc::new(PolicyConfig::load_or_default(
            options.config_path.as_deref(),
            &workspace_root,
        ));

        let trace_path = options.run_dir.join(crate::runs::TRACE_FILE);
        let writer = TraceWriter::create(&trace_path, WriterOptions::default())
            .with_context(|| "Failed to open trace writer")?;

        writer.write(&make_event(
            &run_id,
            EventType::Lifecycle,
            serde_json::json!({"stage": "start"}),
            Some(serde_json::json!({
                "runtime_version": runtime_version(),
                "platform": format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
                "recorder": "rust",
            })),
        ));

        let enforcer = options.enforce.then(|| Enforcer::new(Arc::clone(&config)));
        let ctx = PatchContext::new(
            run_id.clone(),
            workspace_root,
            Arc::clone(&writer),
            config,
            enforcer,
        );
        let patches = Patches::install(&ctx);

        let recorder = Arc::new(Self {
            run_id,
            writer,
            ctx,
            patches,
            state: AtomicU8::new(STATE_READY),
            started: Instant::now(),
        });

        *active_slot().lock().expect("active recorder mutex poisoned") =
            Some(Arc::clone(&recorder));
        crate::debug_log!("recording started: run_id={}", recorder.run_id);
        Ok(recorder)
    }

    /// The process-global active recorder, if any.
    pub fn active() -> Option<Arc<Self>> {
        active_slot().lock().ok().and_then(|slot| slot.clone())
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn patches(&self) -> &Patches {
        &self.patches
    }

    pub fn context(&self) -> &Arc<PatchContext> {
        &self.ctx
    }

    pub fn writer(&self) -> &Arc<TraceWriter> {
        &self.writer
    }

    /// Current lifecycle state, for diagnostics.
    pub fn is_stopped(&self) -> bool {
        self.state.load(Ordering::SeqCst) >= STATE_STOPPING
    }

    /// Write `lifecycle: stop` with the exit code and duration, then
    /// close the writer. Idempotent: transitions past STOPPING are no-ops.
    pub fn stop(&self, exit_code: i32) {
        if self
            .state
            .compare_exchange(
                STATE_READY,
                STATE_STOPPING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }
        let duration_ms = self.started.elapsed().as_millis() as u64;
        self.writer.write(&make_event(
            &self.run_id,
            EventType::Lifecycle,
            serde_json::json!({
                "stage": "stop",
                "exit_code": exit_code,
                "duration_ms": duration_ms,
            }),
            None,
        ));
        self.writer.close();
        self.state.store(STATE_STOPPED, Ordering::SeqCst);

        if let Ok(mut slot) = active_slot().lock() {
            let is_self = slot
                .as_ref()
                .map(|active| std::ptr::eq(active.as_ref(), self))
                .unwrap_or(false);
            if is_self {
                *slot = None;
            }
        }
        crate::debug_log!("recording stopped: run_id={}", self.run_id);
    }

    /// Write `lifecycle: error` followed by `lifecycle: stop` with exit
    /// code 1. Used by the panic hook (uncaught-exception equivalent).
    pub fn fail(&self, error: &str) {
        if self.state.load(Ordering::SeqCst) != STATE_READY {
            return;
        }
        self.writer.write(&make_event(
            &self.run_id,
            EventType::Lifecycle,
            serde_json::json!({"stage": "error", "error": error}),
            None,
        ));
        self.stop(1);
    }

    /// Install a panic hook that records the panic as a lifecycle error
    /// before the process unwinds. Chains the previous hook.
    pub fn install_panic_hook(recorder: &Arc<Self>) {
        let weak: Weak<Recorder> = Arc::downgrade(recorder);
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Some(recorder) = weak.upgrade() {
                let message = info
                    .payload()
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| info.payload().downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".to_string());
                recorder.fail(&message);
            }
            previous(info);
        }));
    }
}

/// Scope guard: stops the recorder with exit code 0 when dropped, unless
/// it was already stopped.
pub struct RecorderGuard(pub Arc<Recorder>);

impl Drop for RecorderGuard {
    fn drop(&mut self) {
        self.0.stop(0);
    }
}

fn runtime_version() -> String {
    std::env::var("AGENTCI_VERSION").unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string())
}
