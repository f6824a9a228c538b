//! Durable, tamper-evident, append-only action logging and recovery for a
//! long-running AI agent host.
//!
//! Five pieces, wired together by [`lifecycle::LifecycleAdapter`]:
//! [`stream_writer::StreamWriter`] owns the hash-chained daily log,
//! [`integrity`] re-verifies it, [`checkpoint::CheckpointManager`] records
//! pre-compaction recovery snapshots, and [`session_restorer`] decides
//! whether a fresh agent start is really a continuation of recent work.

pub mod canonical;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod disk;
pub mod integrity;
pub mod lifecycle;
pub mod model;
pub mod paths;
pub mod session_restorer;
pub mod stream_writer;

pub use checkpoint::{CheckpointData, CheckpointManager};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ContinuityConfig, LogLevel};
pub use integrity::{validate_stream, IntegrityReport};
pub use lifecycle::{HostEvent, HostEventSink, LifecycleAdapter};
pub use model::{ActionEnvelope, Severity};
pub use session_restorer::SessionRestorer;
pub use stream_writer::{QueryFilter, StreamStats, StreamWriter};
