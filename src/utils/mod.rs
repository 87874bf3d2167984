//! # Utility Functions (`utils`)
//!
//! Checkpoint serialization, the fork-join worker pool, and the telemetry sink.

pub mod parallel;
pub mod serialization;
pub mod telemetry;

pub use parallel::{average_partials, partition, PartialResult, WorkerPool};
pub use serialization::{checkpoint_path, load_state, save_state, CheckpointFormat};
pub use telemetry::{FileSink, NullSink, TelemetrySink};
