//! AgentCI — records, summarizes, diffs, and integrity-verifies the
//! observable side-effects of AI agent runs.
//!
//! The crate has two halves:
//!
//! - **Recording** ([`recorder`], [`patches`], [`writer`]): a wrapper facade
//!   the host program links against. While the host runs, file, process,
//!   network, and environment operations routed through the facade emit a
//!   structured event stream to an append-only JSONL trace. Recording is
//!   fail-open: no internal failure may affect the host program.
//! - **Offline tools** ([`signature`], [`diff`], [`policy`], [`integrity`],
//!   [`similarity`]): project a trace into a canonical *Effect Signature*,
//!   diff it against a baseline, evaluate it under a declarative policy,
//!   and authenticate artifacts with a per-project HMAC secret.
//!
//! The CLI in `main.rs` wires both halves together over the `.agentci/`
//! directory tree.

pub mod baseline;
pub mod canonicalize;
pub mod config;
#[macro_use]
pub mod debug;
pub mod diff;
pub mod enforce;
pub mod integrity;
pub mod normalize;
pub mod patches;
pub mod policy;
pub mod recorder;
pub mod runs;
pub mod signature;
pub mod similarity;
pub mod trace;
pub mod writer;

mod testing;

pub use config::PolicyConfig;
pub use diff::DiffResult;
pub use policy::evaluate::{PolicyFinding, Severity, Verdict};
pub use recorder::Recorder;
pub use signature::EffectSignature;
pub use trace::TraceEvent;
pub use writer::TraceWriter;
