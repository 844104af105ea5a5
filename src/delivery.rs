use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDate};

use crate::digest::{DigestComposer, StockReportFragment};
use crate::domain::subscriber::Subscriber;
use crate::email_client::{MailSender, SendError};
use crate::storage::{StockStore, StoreError};

/// Predicted prices cover the next 1..=11 calendar days after the run date.
const PREDICTION_WINDOW_DAYS: i64 = 11;

/// Outcome of one digest run.
#[derive(Debug)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

#[derive(thiserror::Error)]
pub enum DeliveryError {
    #[error("Failed to read stock data for '{email}'.")]
    Store {
        email: String,
        #[source]
        source: StoreError,
    },
    #[error("Failed to send the digest to '{email}'.")]
    Send {
        email: String,
        #[source]
        source: SendError,
    },
}

impl std::fmt::Debug for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Caused by:\n\t({})", self)
    }
}

/// Fans one task out per subscriber and joins them all before returning.
/// Tasks are independent: a storage or transport failure in one is logged
/// and counted, never allowed to abort the rest of the batch.
pub struct DeliveryCoordinator {
    store: Arc<dyn StockStore>,
    sender: Arc<dyn MailSender>,
    composer: Arc<DigestComposer>,
}

impl DeliveryCoordinator {
    pub fn new(
        store: Arc<dyn StockStore>,
        sender: Arc<dyn MailSender>,
        composer: Arc<DigestComposer>,
    ) -> DeliveryCoordinator {
        DeliveryCoordinator {
            store,
            sender,
            composer,
        }
    }

    #[tracing::instrument(
        name = "Delivering the daily digest",
        skip(self, subscribers, subject),
        fields(subscriber_count = subscribers.len())
    )]
    pub async fn run(&self, subscribers: Vec<Subscriber>, subject: &str) -> DeliveryReport {
        let started = Instant::now();
        let today = Local::now().date_naive();
        let mut tasks = Vec::with_capacity(subscribers.len());

        for subscriber in subscribers {
            let store = Arc::clone(&self.store);
            let sender = Arc::clone(&self.sender);
            let composer = Arc::clone(&self.composer);
            let subject = subject.to_string();

            tasks.push(tokio::spawn(async move {
                deliver_to(store, sender, composer, subscriber, subject, today).await
            }));
        }

        let mut sent = 0;
        let mut failed = 0;

        for outcome in futures::future::join_all(tasks).await {
            match outcome {
                Ok(Ok(())) => sent += 1,
                Ok(Err(err)) => {
                    tracing::error!("Digest delivery failed: {:?}", err);
                    failed += 1;
                }
                Err(err) => {
                    tracing::error!("Digest task panicked: {:?}", err);
                    failed += 1;
                }
            }
        }

        DeliveryReport {
            sent,
            failed,
            elapsed: started.elapsed(),
        }
    }
}

/// One subscriber's unit of work: fetch, compose, send — strictly in that
/// order.
async fn deliver_to(
    store: Arc<dyn StockStore>,
    sender: Arc<dyn MailSender>,
    composer: Arc<DigestComposer>,
    subscriber: Subscriber,
    subject: String,
    today: NaiveDate,
) -> Result<(), DeliveryError> {
    let stock_ids = store
        .select_favorite_stock_ids(&subscriber)
        .await
        .map_err(|source| DeliveryError::Store {
            email: subscriber.email.clone(),
            source,
        })?;

    let mut fragments = Vec::with_capacity(stock_ids.len());

    for stock_id in stock_ids {
        let fragment = fetch_fragment(store.as_ref(), stock_id, today)
            .await
            .map_err(|source| DeliveryError::Store {
                email: subscriber.email.clone(),
                source,
            })?;
        fragments.push(fragment);
    }

    let body = composer.compose(&subscriber, &fragments, today);

    sender
        .send(&subscriber.email, &subject, &body, true)
        .await
        .map_err(|source| DeliveryError::Send {
            email: subscriber.email.clone(),
            source,
        })?;

    Ok(())
}

async fn fetch_fragment(
    store: &dyn StockStore,
    stock_id: String,
    today: NaiveDate,
) -> Result<StockReportFragment, StoreError> {
    let closing_price = store.select_closing_price(&stock_id, today).await?;

    let from = today + chrono::Duration::days(1);
    let to = today + chrono::Duration::days(PREDICTION_WINDOW_DAYS);
    // BTreeMap keys keep the predictions in chronological order.
    let predictions = store.select_predict_prices(&stock_id, from, to).await?;

    Ok(StockReportFragment {
        stock_id,
        closing_price,
        predicted_prices: predictions.into_values().collect(),
    })
}
