//! Background reflector: periodic self-analysis feeding the evolution
//! engine and memory maintenance.
//!
//! Each pass prunes decayed memories, turns chronic skill instability into
//! lessons, and crystallizes identity once enough mutations accumulate.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::controller::Controller;

/// Applied mutations beyond this count trigger identity crystallization.
const CRYSTALLIZE_THRESHOLD: usize = 12;

pub struct Reflector {
    interval: Duration,
}

impl Reflector {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Periodic loop; cancellable through controller shutdown (the task is
    /// tracked and aborted there).
    pub async fn run(self, controller: Arc<Controller>) {
        info!(interval_secs = self.interval.as_secs(), "reflector online");
        loop {
            tokio::time::sleep(self.interval).await;
            Self::pass(&controller).await;
        }
    }

    /// One reflection pass.  Exposed separately so it can be driven
    /// directly in tests.
    pub async fn pass(controller: &Controller) {
        // 1. Memory maintenance: episodic decay + lesson pruning.
        {
            let retention = controller.config.memory.retention_days;
            let prune = controller.config.memory.lesson_prune_days;
            let mut memory = controller.memory().lock().await;
            if let Err(err) = memory.maintain(retention, prune).await {
                warn!(%err, "memory maintenance failed");
            }
        }

        // 2. Chronic skill instability becomes advisory lessons.
        let recommendations = controller.registry().refactor_recommendations();
        if !recommendations.is_empty() {
            let mut memory = controller.memory().lock().await;
            for recommendation in &recommendations {
                if let Err(err) =
                    memory
                        .lessons
                        .save_lesson(recommendation, "Self", "reflector_advisory")
                {
                    warn!(%err, "advisory lesson not saved");
                }
            }
            info!(count = recommendations.len(), "reflector recorded skill advisories");
        }

        // 3. Plateau check: when longitudinal metrics stall, stop tweaking
        //    models and say so.
        let plateaued = controller.scorecard.lock().unwrap().check_plateau(20);
        if plateaued {
            warn!("scorecard plateau: redirecting evolution effort to controller logic");
        }

        // 4. Crystallize identity once the applied log grows long.
        if controller.evolution().applied().len() >= CRYSTALLIZE_THRESHOLD {
            if let Err(err) = controller
                .evolution()
                .crystallize_identity(controller.router())
                .await
            {
                warn!(%err, "identity crystallization failed");
            }
        }
    }
}

impl Default for Reflector {
    fn default() -> Self {
        Self::new(Duration::from_secs(1800))
    }
}
