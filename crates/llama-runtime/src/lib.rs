//! # llama-runtime
//!
//! Runtime-side utilities for llama-bridge: telemetry hooks (TTFT, tok/s, evictions)
//! and a deterministic scripted backend used by tests and the CLI demo.

pub mod mock;
pub mod telemetry;

pub use mock::{MockBackend, MockContext, MockHandle, MockModel, ScriptStep};
pub use telemetry::{InferenceMetrics, InferenceTimer, LogTelemetry, NoopTelemetry, TelemetryHook};
