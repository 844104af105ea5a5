use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::domain::subscriber::Subscriber;

#[derive(thiserror::Error)]
pub enum StoreError {
    #[error("Failed to execute a database query.")]
    Query(#[from] sqlx::Error),
    #[error("Subscriber row {id} holds an invalid subscribed date: '{value}'")]
    InvalidDate { id: i32, value: String },
}

impl std::fmt::Debug for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Caused by:\n\t({})", self)
    }
}

/// Storage boundary consumed by the registry and the delivery pipeline.
/// Every call may fail; callers log and degrade instead of propagating.
#[async_trait]
pub trait StockStore: Send + Sync {
    async fn select_all_subscribers(&self) -> Result<Vec<Subscriber>, StoreError>;

    async fn add_subscriber(&self, subscriber: &Subscriber) -> Result<(), StoreError>;

    async fn remove_subscriber_by_id(&self, id: i32) -> Result<(), StoreError>;

    async fn select_favorite_stock_ids(
        &self,
        subscriber: &Subscriber,
    ) -> Result<Vec<String>, StoreError>;

    async fn select_closing_price(
        &self,
        stock_id: &str,
        date: NaiveDate,
    ) -> Result<i64, StoreError>;

    async fn select_predict_prices(
        &self,
        stock_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, i64>, StoreError>;
}

pub struct PgStore {
    db_pool: PgPool,
}

impl PgStore {
    pub fn new(db_pool: PgPool) -> PgStore {
        PgStore { db_pool }
    }
}

#[async_trait]
impl StockStore for PgStore {
    #[tracing::instrument(name = "Select all subscribers", skip(self))]
    async fn select_all_subscribers(&self) -> Result<Vec<Subscriber>, StoreError> {
        let rows: Vec<(i32, String, String)> = sqlx::query(
            r#"
            SELECT id, email, subscribed_date
            FROM subscriber
            "#,
        )
        .map(|row: PgRow| (row.get("id"), row.get("email"), row.get("subscribed_date")))
        .fetch_all(&self.db_pool)
        .await?;

        rows.into_iter()
            .map(|(id, email, subscribed_date)| {
                let subscribed_date = DateTime::parse_from_rfc3339(&subscribed_date)
                    .map_err(|_| StoreError::InvalidDate {
                        id,
                        value: subscribed_date.clone(),
                    })?
                    .with_timezone(&Utc);

                Ok(Subscriber::from_row(id, email, subscribed_date))
            })
            .collect()
    }

    #[tracing::instrument(
        name = "Insert a subscriber row",
        skip(self, subscriber),
        fields(subscriber_email = %subscriber.email)
    )]
    async fn add_subscriber(&self, subscriber: &Subscriber) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO subscriber (id, email, subscribed_date)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(subscriber.id)
        .bind(subscriber.email.as_str())
        .bind(subscriber.subscribed_date.to_rfc3339())
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(name = "Delete a subscriber row", skip(self))]
    async fn remove_subscriber_by_id(&self, id: i32) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM subscriber
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(
        name = "Select favorite stocks",
        skip(self, subscriber),
        fields(subscriber_id = %subscriber.id)
    )]
    async fn select_favorite_stock_ids(
        &self,
        subscriber: &Subscriber,
    ) -> Result<Vec<String>, StoreError> {
        let stock_ids = sqlx::query(
            r#"
            SELECT stock_id
            FROM favorite
            WHERE user_id = $1
            ORDER BY stock_id
            "#,
        )
        .bind(subscriber.id)
        .map(|row: PgRow| row.get("stock_id"))
        .fetch_all(&self.db_pool)
        .await?;

        Ok(stock_ids)
    }

    #[tracing::instrument(name = "Select a closing price", skip(self))]
    async fn select_closing_price(
        &self,
        stock_id: &str,
        date: NaiveDate,
    ) -> Result<i64, StoreError> {
        let price = sqlx::query(
            r#"
            SELECT price
            FROM closing_price
            WHERE stock_id = $1 AND date = $2
            "#,
        )
        .bind(stock_id)
        .bind(date)
        .map(|row: PgRow| row.get("price"))
        .fetch_one(&self.db_pool)
        .await?;

        Ok(price)
    }

    #[tracing::instrument(name = "Select predicted prices", skip(self))]
    async fn select_predict_prices(
        &self,
        stock_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, i64>, StoreError> {
        let rows: Vec<(NaiveDate, i64)> = sqlx::query(
            r#"
            SELECT date, price
            FROM predict_price
            WHERE stock_id = $1 AND date BETWEEN $2 AND $3
            "#,
        )
        .bind(stock_id)
        .bind(from)
        .bind(to)
        .map(|row: PgRow| (row.get("date"), row.get("price")))
        .fetch_all(&self.db_pool)
        .await?;

        Ok(rows.into_iter().collect())
    }
}
