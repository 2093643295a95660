//! Follow-up scheduler.
//!
//! Timers are durable rows, not in-process callbacks: each pending
//! follow-up lives in the store with an absolute fire time, and a poll
//! loop delivers whatever has come due. Restarts lose nothing, and a
//! stale row (user advanced or reset since it was scheduled) is
//! discarded instead of fired.

use super::templates;
use crate::engine::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rapport_core::config::SchedulerConfig;
use rapport_core::error::EngineError;
use rapport_core::profile::{Role, Stage};
use rapport_memory::FollowupRow;
use tracing::{debug, error, warn};

/// Base delay before a reminder stage fires. `None` for stages that are
/// never scheduled.
fn base_secs(stage: Stage, config: &SchedulerConfig) -> Option<u64> {
    match stage {
        Stage::Followup1 => Some(config.followup1_secs),
        Stage::Followup2 => Some(config.followup2_secs),
        Stage::Followup3 => Some(config.followup3_secs),
        _ => None,
    }
}

/// Jittered delay for a reminder stage.
pub(crate) fn followup_delay<R: Rng>(
    stage: Stage,
    config: &SchedulerConfig,
    rng: &mut R,
) -> Option<Duration> {
    let base = base_secs(stage, config)? as i64;
    let jitter = config.jitter_secs as i64;
    let offset = if jitter > 0 {
        rng.gen_range(-jitter..=jitter)
    } else {
        0
    };
    Some(Duration::seconds((base + offset).max(1)))
}

impl Engine {
    /// Queue the next reminder for a user, if the stage has one.
    pub(crate) async fn schedule_followup(
        &self,
        user_id: &str,
        stage: Stage,
        cycle: u32,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let Some(delay) = followup_delay(stage, &self.config.scheduler, &mut rand::thread_rng())
        else {
            return Ok(());
        };
        let fire_at = now + delay;
        let id = self
            .store
            .schedule_followup(user_id, stage, cycle, now, fire_at)
            .await
            .map_err(|e| EngineError::Storage(format!("failed to schedule follow-up: {e}")))?;
        debug!("scheduled {} for {user_id} at {fire_at} (id {id})", stage.as_str());
        Ok(())
    }

    /// Deliver every follow-up due at `now`.
    ///
    /// Each row is handled under that user's lock so a reminder never
    /// interleaves with inbound message processing. A failure on one row
    /// is logged and does not block the rest.
    pub(crate) async fn run_due(&self, now: DateTime<Utc>) -> Result<(), EngineError> {
        let due = self
            .store
            .due_followups(now)
            .await
            .map_err(|e| EngineError::Storage(format!("failed to query due follow-ups: {e}")))?;
        for row in due {
            if let Err(e) = self.fire_followup(&row, now).await {
                error!("follow-up {} for {} failed: {e}", row.id, row.user_id);
            }
        }
        Ok(())
    }

    async fn fire_followup(&self, row: &FollowupRow, now: DateTime<Utc>) -> Result<(), EngineError> {
        let lock = self.user_lock(&row.user_id).await;
        let _guard = lock.lock().await;

        let onboarding = self
            .store
            .load_onboarding(&row.user_id)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?
            .unwrap_or_default();

        // Stale check: the row must belong to the current cycle and the
        // user must still sit exactly one stage behind it.
        let stale = onboarding.cycle != row.cycle
            || row.stage.expected_predecessor() != Some(onboarding.stage);
        if stale {
            debug!(
                "discarding stale follow-up {} for {} (row {}/cycle {}, user {}/cycle {})",
                row.id,
                row.user_id,
                row.stage.as_str(),
                row.cycle,
                onboarding.stage.as_str(),
                onboarding.cycle,
            );
            self.store
                .discard_followup(&row.id)
                .await
                .map_err(|e| EngineError::Storage(e.to_string()))?;
            return Ok(());
        }

        let mut onboarding = onboarding;
        onboarding.stage = row.stage;
        self.store
            .save_onboarding(&row.user_id, &onboarding)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?;

        let text = templates::reminder(
            row.stage,
            &self.config.engine.group_link,
            &mut rand::thread_rng(),
        );
        if let Some(text) = text {
            self.deliver(&row.user_id, &text, None).await?;
            // A reminder is outbound activity: it joins the history and
            // refreshes the idle clock.
            match self.store.load_session(&row.user_id).await {
                Ok(Some(mut conv)) => {
                    conv.append_turn(
                        Role::Assistant,
                        &text,
                        now,
                        self.config.engine.history_window,
                    );
                    if let Err(e) = self.store.save_session(&conv).await {
                        warn!("session save failed after reminder for {}: {e}", row.user_id);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("session load failed after reminder for {}: {e}", row.user_id),
            }
        } else {
            warn!("no reminder pool for stage {}", row.stage.as_str());
        }

        self.store
            .complete_followup(&row.id)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?;

        if let Some(next) = row.stage.next_followup() {
            self.schedule_followup(&row.user_id, next, onboarding.cycle, now)
                .await?;
        }
        Ok(())
    }

    /// Poll loop run as a background task while the engine is up.
    pub(crate) async fn scheduler_loop(&self) {
        let interval = std::time::Duration::from_secs(self.config.scheduler.poll_interval_secs);
        debug!("scheduler polling every {}s", self.config.scheduler.poll_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            if let Err(e) = self.run_due(Utc::now()).await {
                error!("scheduler pass failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::thread_rng;

    #[test]
    fn test_delay_stays_within_jitter_band() {
        let config = SchedulerConfig::default();
        let mut rng = thread_rng();
        for _ in 0..50 {
            let delay = followup_delay(Stage::Followup1, &config, &mut rng).unwrap();
            let secs = delay.num_seconds();
            let base = config.followup1_secs as i64;
            let jitter = config.jitter_secs as i64;
            assert!(secs >= base - jitter && secs <= base + jitter, "secs {secs}");
        }
    }

    #[test]
    fn test_delays_grow_across_stages() {
        let config = SchedulerConfig {
            jitter_secs: 0,
            ..SchedulerConfig::default()
        };
        let mut rng = thread_rng();
        let d1 = followup_delay(Stage::Followup1, &config, &mut rng).unwrap();
        let d2 = followup_delay(Stage::Followup2, &config, &mut rng).unwrap();
        let d3 = followup_delay(Stage::Followup3, &config, &mut rng).unwrap();
        assert!(d1 < d2 && d2 < d3);
    }

    #[test]
    fn test_non_reminder_stages_have_no_delay() {
        let config = SchedulerConfig::default();
        let mut rng = thread_rng();
        assert!(followup_delay(Stage::New, &config, &mut rng).is_none());
        assert!(followup_delay(Stage::Welcomed, &config, &mut rng).is_none());
        assert!(followup_delay(Stage::Completed, &config, &mut rng).is_none());
    }
}
