//! Per-session counters.
//!
//! Updated from the streaming thread and the GL thread, read from the host's
//! thread through [`SessionStats::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one source session.
#[derive(Debug, Default)]
pub struct SessionStats {
    pub frames_received: AtomicU64,
    /// Frames discarded before publishing (no caps, map failure, no texture).
    pub frames_dropped: AtomicU64,
    pub textures_created: AtomicU64,
    pub copies_dispatched: AtomicU64,
    pub copy_failures: AtomicU64,
    pub pipeline_errors: AtomicU64,
    pub pipeline_starts: AtomicU64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a received frame and returns the new total.
    pub fn record_frame(&self) -> u64 {
        self.frames_received.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Records a dropped frame. Logs the first drop and then every 100th.
    #[allow(clippy::manual_is_multiple_of)]
    pub fn record_drop(&self, reason: &str) {
        let count = self.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if count == 1 || count % 100 == 0 {
            tracing::warn!("Dropped frame #{}: {}", count, reason);
        }
    }

    pub fn record_texture_created(&self) {
        self.textures_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_copy_dispatched(&self) {
        self.copies_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed copy. Logs the first failure and then every 100th.
    #[allow(clippy::manual_is_multiple_of)]
    pub fn record_copy_failure(&self, reason: &str) {
        let count = self.copy_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if count == 1 || count % 100 == 0 {
            tracing::warn!("Texture copy failure #{}: {}", count, reason);
        }
    }

    pub fn record_pipeline_error(&self) {
        self.pipeline_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pipeline_start(&self) {
        self.pipeline_starts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            textures_created: self.textures_created.load(Ordering::Relaxed),
            copies_dispatched: self.copies_dispatched.load(Ordering::Relaxed),
            copy_failures: self.copy_failures.load(Ordering::Relaxed),
            pipeline_errors: self.pipeline_errors.load(Ordering::Relaxed),
            pipeline_starts: self.pipeline_starts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStatsSnapshot {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub textures_created: u64,
    pub copies_dispatched: u64,
    pub copy_failures: u64,
    pub pipeline_errors: u64,
    pub pipeline_starts: u64,
}

impl SessionStatsSnapshot {
    /// Frames that made it to a copy.
    pub fn frames_published(&self) -> u64 {
        self.frames_received.saturating_sub(self.frames_dropped)
    }

    /// Short human-readable summary for logs.
    pub fn status_string(&self) -> String {
        format!(
            "{} frames ({} dropped), {} textures, {} copies ({} failed), {} starts, {} errors",
            self.frames_received,
            self.frames_dropped,
            self.textures_created,
            self.copies_dispatched,
            self.copy_failures,
            self.pipeline_starts,
            self.pipeline_errors
        )
    }
}
