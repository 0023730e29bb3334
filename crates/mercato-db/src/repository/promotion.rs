//! # Promotion Rule Repository
//!
//! Persistence for promotion rules: a typed header plus the serde-tagged
//! detail payload stored as a JSON column.
//!
//! ## Why a JSON Column?
//! The three rule types share no fields beyond the header. A flat table
//! would carry a NULL-riddled union of every type's columns; the tagged
//! JSON payload round-trips through `PromotionDetail` and keeps the schema
//! honest. The header columns (status, window, usage) stay relational so
//! eligibility filters run in SQL.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use mercato_core::validation::{validate_code, validate_name};
use mercato_core::{CoreError, PromotionDetail, PromotionRule, PromotionStatus};

/// Raw promotion row; `detail` is parsed after the fetch.
#[derive(Debug, FromRow)]
struct PromotionRow {
    id: String,
    code: String,
    name: String,
    status: PromotionStatus,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    usage_limit: Option<i64>,
    usage_count: i64,
    detail: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PromotionRow {
    fn into_rule(self) -> DbResult<PromotionRule> {
        let detail: PromotionDetail = serde_json::from_str(&self.detail)?;
        Ok(PromotionRule {
            id: self.id,
            code: self.code,
            name: self.name,
            status: self.status,
            start_date: self.start_date,
            end_date: self.end_date,
            usage_limit: self.usage_limit,
            usage_count: self.usage_count,
            detail,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, code, name, status, start_date, end_date,
           usage_limit, usage_count, detail, created_at, updated_at
    FROM promotion_rules
"#;

/// Repository for promotion rule operations.
#[derive(Debug, Clone)]
pub struct PromotionRepository {
    pool: SqlitePool,
}

impl PromotionRepository {
    /// Creates a new PromotionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PromotionRepository { pool }
    }

    /// Creates a rule in the `Active` state.
    pub async fn create(
        &self,
        code: &str,
        name: &str,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        usage_limit: Option<i64>,
        detail: PromotionDetail,
    ) -> DbResult<PromotionRule> {
        validate_code(code).map_err(CoreError::from)?;
        validate_name(name).map_err(CoreError::from)?;
        if end_date < start_date {
            return Err(CoreError::from(mercato_core::ValidationError::InvalidFormat {
                field: "end_date".to_string(),
                reason: "must not precede start_date".to_string(),
            })
            .into());
        }

        let now = Utc::now();
        let rule = PromotionRule {
            id: Uuid::new_v4().to_string(),
            code: code.trim().to_string(),
            name: name.trim().to_string(),
            status: PromotionStatus::Active,
            start_date,
            end_date,
            usage_limit,
            usage_count: 0,
            detail,
            created_at: now,
            updated_at: now,
        };

        let detail_json = serde_json::to_string(&rule.detail)?;

        sqlx::query(
            r#"
            INSERT INTO promotion_rules (
                id, code, name, status, start_date, end_date,
                usage_limit, usage_count, detail, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.code)
        .bind(&rule.name)
        .bind(rule.status)
        .bind(rule.start_date)
        .bind(rule.end_date)
        .bind(rule.usage_limit)
        .bind(rule.usage_count)
        .bind(&detail_json)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(code = %rule.code, "Promotion rule created");
        Ok(rule)
    }

    /// Gets a rule by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<PromotionRule>> {
        let row: Option<PromotionRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(PromotionRow::into_rule).transpose()
    }

    /// Gets a rule by business code.
    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<PromotionRule>> {
        let row: Option<PromotionRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE code = ?1"))
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;

        row.map(PromotionRow::into_rule).transpose()
    }

    /// Rules that may apply at `now`: active, inside their window, and
    /// under their usage limit. The engine re-checks eligibility; this
    /// filter just keeps the candidate set small.
    pub async fn eligible_rules(&self, now: DateTime<Utc>) -> DbResult<Vec<PromotionRule>> {
        let rows: Vec<PromotionRow> = sqlx::query_as(&format!(
            r#"{SELECT_COLUMNS}
            WHERE status = 'active'
              AND start_date <= ?1 AND end_date >= ?1
              AND (usage_limit IS NULL OR usage_count < usage_limit)
            ORDER BY id
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PromotionRow::into_rule).collect()
    }

    /// Sets a rule's status.
    pub async fn set_status(&self, id: &str, status: PromotionStatus) -> DbResult<()> {
        let now = Utc::now();
        let result =
            sqlx::query("UPDATE promotion_rules SET status = ?2, updated_at = ?3 WHERE id = ?1")
                .bind(id)
                .bind(status)
                .bind(now)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("PromotionRule", id));
        }

        Ok(())
    }
}

/// Increments a rule's usage count on an existing connection.
///
/// Called once per distinct rule when an order is delivered; the guard
/// keeps the count from passing the limit even under concurrent delivery.
pub async fn increment_usage_in_tx(conn: &mut SqliteConnection, rule_id: &str) -> DbResult<()> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        UPDATE promotion_rules SET
            usage_count = usage_count + 1,
            updated_at = ?2
        WHERE id = ?1
          AND (usage_limit IS NULL OR usage_count < usage_limit)
        "#,
    )
    .bind(rule_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    // An exhausted rule at delivery time is counted as a no-op: the
    // discount was already granted at checkout and is not clawed back.
    if result.rows_affected() == 0 {
        debug!(rule_id, "Usage increment skipped (limit reached or rule gone)");
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{active_rule, seeded_store, ten_percent_off};
    use chrono::Duration;
    use mercato_core::{Discount, TriggerTarget, TriggerThreshold};

    #[tokio::test]
    async fn test_detail_round_trips_through_json_column() {
        let store = seeded_store().await;

        let created = active_rule(
            &store.db,
            "BXGY-COLA",
            PromotionDetail::BuyXGetY {
                trigger: TriggerTarget::Category {
                    category_id: store.category_beverages.clone(),
                },
                threshold: TriggerThreshold::MinQuantity { quantity: 3 },
                gift_unit_id: store.unit_b.clone(),
                gift_quantity: 1,
                gift_discount: Discount::Percent { bps: 10000 },
                gift_max_quantity: 2,
            },
        )
        .await;

        let fetched = store
            .db
            .promotions()
            .get_by_id(&created.id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(fetched.detail, created.detail);
        assert_eq!(fetched.status, PromotionStatus::Active);
        assert_eq!(fetched.usage_count, 0);
    }

    #[tokio::test]
    async fn test_eligible_rules_filters_window_status_and_usage() {
        let store = seeded_store().await;
        let promotions = store.db.promotions();
        let now = Utc::now();

        let live = active_rule(&store.db, "LIVE", ten_percent_off(&store.unit_a)).await;

        // Window already closed
        promotions
            .create(
                "STALE",
                "Last season",
                now - Duration::days(60),
                now - Duration::days(30),
                None,
                ten_percent_off(&store.unit_a),
            )
            .await
            .unwrap();

        // Switched off by an operator
        let disabled = active_rule(&store.db, "DISABLED", ten_percent_off(&store.unit_b)).await;
        promotions
            .set_status(&disabled.id, PromotionStatus::Inactive)
            .await
            .unwrap();

        // Usage budget spent
        let spent = promotions
            .create(
                "SPENT",
                "One redemption",
                now - Duration::days(1),
                now + Duration::days(30),
                Some(1),
                PromotionDetail::OrderDiscount {
                    discount: Discount::Fixed { amount_minor: 500 },
                    max_discount_minor: None,
                    min_order_value_minor: None,
                    min_order_quantity: None,
                },
            )
            .await
            .unwrap();
        let mut conn = store.db.pool().acquire().await.unwrap();
        increment_usage_in_tx(&mut conn, &spent.id).await.unwrap();
        drop(conn);

        let eligible = promotions.eligible_rules(now).await.unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, live.id);
    }

    #[tokio::test]
    async fn test_usage_increment_stops_at_limit() {
        let store = seeded_store().await;
        let now = Utc::now();

        let rule = store
            .db
            .promotions()
            .create(
                "LIMIT-2",
                "Two redemptions",
                now - Duration::days(1),
                now + Duration::days(30),
                Some(2),
                ten_percent_off(&store.unit_a),
            )
            .await
            .unwrap();

        let mut conn = store.db.pool().acquire().await.unwrap();
        for _ in 0..5 {
            increment_usage_in_tx(&mut conn, &rule.id).await.unwrap();
        }
        drop(conn);

        let fetched = store
            .db
            .promotions()
            .get_by_id(&rule.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.usage_count, 2);
    }

    #[tokio::test]
    async fn test_create_rejects_inverted_window() {
        let store = seeded_store().await;
        let now = Utc::now();

        let err = store
            .db
            .promotions()
            .create(
                "BACKWARDS",
                "Ends before it starts",
                now,
                now - Duration::days(1),
                None,
                ten_percent_off(&store.unit_a),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::Validation(_))
        ));
    }
}
