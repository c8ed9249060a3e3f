//! Debounced persistence for write-heavy state.
//!
//! `mark_dirty` schedules a save; the actual write happens only once the
//! quiet window (`delay`) or the maximum wait (`max_delay`) elapses.
//! `flush` forces an immediate write and is called on shutdown.

use std::time::{Duration, Instant};

/// Synchronous debouncer; each consumer owns its own instance.
#[derive(Debug)]
pub struct SyncDebouncer {
    delay: Duration,
    max_delay: Duration,
    last_save: Option<Instant>,
    first_pending: Option<Instant>,
    dirty: bool,
}

impl SyncDebouncer {
    pub fn new(delay: Duration, max_delay: Duration) -> Self {
        Self {
            delay,
            max_delay,
            last_save: None,
            first_pending: None,
            dirty: false,
        }
    }

    /// The standard 5s / 30s policy.
    pub fn standard() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(30))
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
        if self.first_pending.is_none() {
            self.first_pending = Some(Instant::now());
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// True when a save should happen now: the quiet window since the last
    /// save elapsed, or the oldest pending change exceeded `max_delay`.
    pub fn should_save(&self) -> bool {
        if !self.dirty {
            return false;
        }
        let quiet_elapsed = match self.last_save {
            None => true,
            Some(last) => last.elapsed() >= self.delay,
        };
        let max_elapsed = self
            .first_pending
            .map(|first| first.elapsed() >= self.max_delay)
            .unwrap_or(false);
        quiet_elapsed || max_elapsed
    }

    /// Run `save` when due.  Returns whether the save ran and succeeded.
    pub fn execute<F: FnOnce() -> anyhow::Result<()>>(&mut self, save: F) -> bool {
        if !self.should_save() {
            return false;
        }
        self.run(save)
    }

    /// Force an immediate save regardless of timers.
    pub fn flush<F: FnOnce() -> anyhow::Result<()>>(&mut self, save: F) -> bool {
        if !self.dirty {
            return false;
        }
        self.run(save)
    }

    fn run<F: FnOnce() -> anyhow::Result<()>>(&mut self, save: F) -> bool {
        match save() {
            Ok(()) => {
                self.last_save = Some(Instant::now());
                self.first_pending = None;
                self.dirty = false;
                true
            }
            Err(err) => {
                // Stay dirty so the next tick retries.
                tracing::error!(%err, "debounced save failed");
                false
            }
        }
    }
}

impl Default for SyncDebouncer {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_state_never_saves() {
        let mut d = SyncDebouncer::standard();
        assert!(!d.should_save());
        assert!(!d.execute(|| Ok(())));
        assert!(!d.flush(|| Ok(())));
    }

    #[test]
    fn first_dirty_save_is_immediate() {
        let mut d = SyncDebouncer::standard();
        d.mark_dirty();
        assert!(d.should_save(), "no prior save means no quiet window to wait out");
        assert!(d.execute(|| Ok(())));
        assert!(!d.is_dirty());
    }

    #[test]
    fn rapid_marks_wait_for_quiet_window() {
        let mut d = SyncDebouncer::new(Duration::from_secs(60), Duration::from_secs(120));
        d.mark_dirty();
        assert!(d.execute(|| Ok(())));
        d.mark_dirty();
        assert!(!d.should_save(), "inside the quiet window");
    }

    #[test]
    fn max_delay_forces_save() {
        let mut d = SyncDebouncer::new(Duration::from_secs(60), Duration::ZERO);
        d.mark_dirty();
        d.execute(|| Ok(()));
        d.mark_dirty();
        // Quiet window hasn't elapsed but max_delay (zero) has.
        assert!(d.should_save());
    }

    #[test]
    fn flush_ignores_timers() {
        let mut d = SyncDebouncer::new(Duration::from_secs(60), Duration::from_secs(120));
        d.mark_dirty();
        d.execute(|| Ok(()));
        d.mark_dirty();
        assert!(d.flush(|| Ok(())));
        assert!(!d.is_dirty());
    }

    #[test]
    fn failed_save_stays_dirty() {
        let mut d = SyncDebouncer::standard();
        d.mark_dirty();
        assert!(!d.execute(|| anyhow::bail!("disk full")));
        assert!(d.is_dirty());
    }
}
