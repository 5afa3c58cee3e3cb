//! Telemetry hooks for generation performance measurement.
//!
//! Provides:
//! - [`InferenceMetrics`]: TTFT, tokens/sec, eviction and generation summary
//! - [`TelemetryHook`] trait: callback interface for real-time metric reporting
//! - [`InferenceTimer`]: records timestamps and computes metrics
//! - [`NoopTelemetry`] / [`LogTelemetry`]: built-in hook implementations

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Aggregate metrics from a generation run.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceMetrics {
    /// Time to first token in milliseconds (capacity check + prompt feed).
    pub ttft_ms: f64,
    /// Tokens generated per second (decode throughput, excludes prompt feed).
    pub tokens_per_sec: f64,
    /// Number of prompt tokens fed into the window.
    pub prompt_tokens: usize,
    /// Number of tokens produced by the decode loop.
    pub generated_tokens: usize,
    /// History tokens dropped by the rolling window before this run.
    pub evicted_tokens: usize,
    /// Total wall-clock time in milliseconds.
    pub total_time_ms: f64,
}

/// Callback trait for real-time generation telemetry.
///
/// All methods have default no-op implementations so hooks can be selective.
pub trait TelemetryHook: Send + Sync {
    /// Called when the rolling window evicts history.
    fn on_eviction(&self, _dropped: usize, _kept: usize) {}

    /// Called after the prompt is fed. `ttft_ms` is time from start to first logits.
    fn on_prefill_complete(&self, _ttft_ms: f64) {}

    /// Called after each decode step produces a token.
    fn on_token_generated(&self, _token_idx: usize, _elapsed_ms: f64) {}

    /// Called when generation finishes with the full metrics summary.
    fn on_generation_complete(&self, _metrics: &InferenceMetrics) {}
}

/// No-op telemetry hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetryHook for NoopTelemetry {}

/// Logging telemetry hook: emits `tracing` events and keeps the last report.
#[derive(Debug, Clone, Default)]
pub struct LogTelemetry {
    last_report: Arc<Mutex<Option<InferenceMetrics>>>,
    evictions: Arc<Mutex<Vec<(usize, usize)>>>,
}

impl LogTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieve the last completed generation's metrics.
    pub fn last_metrics(&self) -> Option<InferenceMetrics> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every `(dropped, kept)` eviction observed so far.
    pub fn evictions(&self) -> Vec<(usize, usize)> {
        self.evictions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TelemetryHook for LogTelemetry {
    fn on_eviction(&self, dropped: usize, kept: usize) {
        tracing::info!(dropped, kept, "rolling window evicted history");
        self.evictions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((dropped, kept));
    }

    fn on_generation_complete(&self, metrics: &InferenceMetrics) {
        tracing::info!(
            prompt_tokens = metrics.prompt_tokens,
            generated_tokens = metrics.generated_tokens,
            ttft_ms = metrics.ttft_ms,
            tokens_per_sec = metrics.tokens_per_sec,
            "generation complete"
        );
        *self
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(metrics.clone());
    }
}

/// Records timestamps during generation to compute [`InferenceMetrics`].
///
/// Usage:
/// 1. Call [`InferenceTimer::new`] at generation start
/// 2. Call [`InferenceTimer::mark_eviction`] if the window was rebuilt
/// 3. Call [`InferenceTimer::mark_prefill_complete`] after the prompt feed
/// 4. Call [`InferenceTimer::mark_token`] after each decode step
/// 5. Call [`InferenceTimer::finish`] to compute final metrics
pub struct InferenceTimer {
    prompt_tokens: usize,
    evicted_tokens: usize,
    start: Instant,
    prefill_end: Option<Instant>,
    token_count: usize,
    hook: Arc<dyn TelemetryHook>,
}

impl InferenceTimer {
    /// Start a new timer for a generation run.
    pub fn new(prompt_tokens: usize, hook: Arc<dyn TelemetryHook>) -> Self {
        Self {
            prompt_tokens,
            evicted_tokens: 0,
            start: Instant::now(),
            prefill_end: None,
            token_count: 0,
            hook,
        }
    }

    /// Record an eviction. Fires `on_eviction`.
    pub fn mark_eviction(&mut self, dropped: usize, kept: usize) {
        self.evicted_tokens += dropped;
        self.hook.on_eviction(dropped, kept);
    }

    /// Mark the prompt feed complete. Fires `on_prefill_complete`.
    pub fn mark_prefill_complete(&mut self) {
        let now = Instant::now();
        self.prefill_end = Some(now);
        let ttft_ms = now.duration_since(self.start).as_secs_f64() * 1000.0;
        self.hook.on_prefill_complete(ttft_ms);
    }

    /// Mark a decode token generated. Fires `on_token_generated`.
    pub fn mark_token(&mut self) {
        self.token_count += 1;
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        self.hook.on_token_generated(self.token_count, elapsed_ms);
    }

    /// Finalize and return metrics. Fires `on_generation_complete`.
    pub fn finish(self) -> InferenceMetrics {
        let total_time_ms = self.start.elapsed().as_secs_f64() * 1000.0;

        let ttft_ms = self
            .prefill_end
            .map(|t| t.duration_since(self.start).as_secs_f64() * 1000.0)
            .unwrap_or(0.0);

        let decode_time_ms = total_time_ms - ttft_ms;
        let tokens_per_sec = if decode_time_ms > 0.0 && self.token_count > 0 {
            self.token_count as f64 / (decode_time_ms / 1000.0)
        } else {
            0.0
        };

        let metrics = InferenceMetrics {
            ttft_ms,
            tokens_per_sec,
            prompt_tokens: self.prompt_tokens,
            generated_tokens: self.token_count,
            evicted_tokens: self.evicted_tokens,
            total_time_ms,
        };

        self.hook.on_generation_complete(&metrics);
        metrics
    }
}
