//! # Price List Sweeper
//!
//! Background task that moves price lists along their dated windows:
//! activates `Upcoming` lists whose start has arrived and expires live
//! lists whose end has passed.
//!
//! ## Sweep vs Manual Transitions
//! The sweep uses the same guarded transitions as operator actions, so a
//! race between the two resolves to exactly one winner. A list whose
//! activation would break the single-CURRENT invariant is skipped with a
//! warning and retried on the next tick (the operator must resolve the
//! overlap).

use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::error::DbResult;
use crate::pool::Database;

/// Default sweep interval.
const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Sweep configuration.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// How often the sweeper ticks. Default: 60 seconds.
    pub interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl SweepConfig {
    /// Sets the sweep interval.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Outcome of one sweep pass, for logging and tests.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub activated: usize,
    pub expired: usize,
    pub skipped: usize,
}

/// The background sweeper.
#[derive(Debug, Clone)]
pub struct PriceListSweeper {
    db: Database,
    config: SweepConfig,
}

impl PriceListSweeper {
    /// Creates a sweeper over a database handle.
    pub fn new(db: Database, config: SweepConfig) -> Self {
        PriceListSweeper { db, config }
    }

    /// Runs the sweep loop forever. Spawn it as a task:
    ///
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run());
    /// ```
    pub async fn run(self) {
        info!(interval = ?self.config.interval, "Price list sweeper started");
        let mut ticker = interval(self.config.interval);

        loop {
            ticker.tick().await;
            match self.tick().await {
                Ok(outcome) => {
                    if outcome.activated > 0 || outcome.expired > 0 || outcome.skipped > 0 {
                        info!(
                            activated = outcome.activated,
                            expired = outcome.expired,
                            skipped = outcome.skipped,
                            "Sweep pass complete"
                        );
                    }
                }
                Err(e) => warn!(error = %e, "Sweep pass failed"),
            }
        }
    }

    /// One sweep pass. Exposed so tests can drive the sweeper without a
    /// timer.
    pub async fn tick(&self) -> DbResult<SweepOutcome> {
        let now = Utc::now();
        let price_lists = self.db.price_lists();
        let mut outcome = SweepOutcome::default();

        // Expire first: a list whose successor starts the same instant must
        // not collide with it during activation.
        for list in price_lists.due_for_expiry(now).await? {
            match price_lists.expire(&list.id).await {
                Ok(()) => {
                    debug!(code = %list.code, "Sweep expired price list");
                    outcome.expired += 1;
                }
                Err(e) => {
                    // Lost a race with a manual transition; next tick settles it
                    warn!(code = %list.code, error = %e, "Sweep expiry skipped");
                    outcome.skipped += 1;
                }
            }
        }

        for list in price_lists.due_for_activation(now).await? {
            match price_lists.activate(&list.id).await {
                Ok(()) => {
                    debug!(code = %list.code, "Sweep activated price list");
                    outcome.activated += 1;
                }
                Err(e) => {
                    warn!(code = %list.code, error = %e, "Sweep activation skipped");
                    outcome.skipped += 1;
                }
            }
        }

        Ok(outcome)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::seeded_store;
    use chrono::Duration;
    use mercato_core::PriceListStatus;

    #[tokio::test]
    async fn test_tick_activates_and_expires() {
        let store = seeded_store().await;
        let price_lists = store.db.price_lists();
        let now = Utc::now();

        // Give the seeded list an end in the past so the sweep expires it,
        // and stage a successor pricing the same units.
        sqlx::query("UPDATE price_lists SET end_date = ?2 WHERE id = ?1")
            .bind(&store.price_list_id)
            .bind(now - Duration::hours(1))
            .execute(store.db.pool())
            .await
            .unwrap();

        let successor = price_lists
            .create("NEXT-2026", "Successor", now - Duration::minutes(5), None)
            .await
            .unwrap();
        price_lists
            .upsert_entry(&successor.id, &store.unit_a, 12000)
            .await
            .unwrap();

        let sweeper = PriceListSweeper::new(store.db.clone(), SweepConfig::default());
        let outcome = sweeper.tick().await.unwrap();

        assert_eq!(outcome.expired, 1);
        assert_eq!(outcome.activated, 1);
        assert_eq!(outcome.skipped, 0);

        let old = price_lists.get_by_id(&store.price_list_id).await.unwrap().unwrap();
        assert_eq!(old.status, PriceListStatus::Expired);
        assert_eq!(price_lists.current_price(&store.unit_a).await.unwrap(), Some(12000));
    }

    #[tokio::test]
    async fn test_tick_ignores_empty_due_lists() {
        let store = seeded_store().await;
        let price_lists = store.db.price_lists();

        let empty = price_lists
            .create("EMPTY-DUE", "No entries", Utc::now() - Duration::hours(1), None)
            .await
            .unwrap();

        let sweeper = PriceListSweeper::new(store.db.clone(), SweepConfig::default());
        let outcome = sweeper.tick().await.unwrap();
        assert_eq!(outcome, SweepOutcome::default());

        // Stays upcoming until an operator fills it in
        let list = price_lists.get_by_id(&empty.id).await.unwrap().unwrap();
        assert_eq!(list.status, PriceListStatus::Upcoming);
    }

    #[tokio::test]
    async fn test_tick_skips_conflicting_activation() {
        let store = seeded_store().await;
        let price_lists = store.db.price_lists();

        // Overlaps the seeded CURRENT list and is already due
        let conflicting = price_lists
            .create("CLASH-2026", "Clash", Utc::now() - Duration::hours(1), None)
            .await
            .unwrap();
        price_lists
            .upsert_entry(&conflicting.id, &store.unit_a, 1)
            .await
            .unwrap();

        let sweeper = PriceListSweeper::new(store.db.clone(), SweepConfig::default());
        let outcome = sweeper.tick().await.unwrap();

        assert_eq!(outcome.activated, 0);
        assert_eq!(outcome.skipped, 1);

        // Untouched: still upcoming, old price still in effect
        let list = price_lists.get_by_id(&conflicting.id).await.unwrap().unwrap();
        assert_eq!(list.status, PriceListStatus::Upcoming);
        assert_eq!(price_lists.current_price(&store.unit_a).await.unwrap(), Some(10000));
    }
}
