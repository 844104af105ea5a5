use std::sync::Arc;

use chrono::Local;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use postman::config::get_configuration;
use postman::delivery::DeliveryCoordinator;
use postman::digest::DigestComposer;
use postman::email_client::EmailClient;
use postman::identity::{sdbm_lower, token_of};
use postman::registry::SubscriberRegistry;
use postman::storage::{PgStore, StockStore};
use postman::telemetry::{get_subscriber, init_subscriber};

/// Stock daily-digest mailer: manages the subscriber list and sends each
/// subscriber a personalized price/prediction digest.
#[derive(Parser, Debug)]
#[command(name = "postman", version)]
struct Options {
    /// Email addresses to add to the subscriber list, separated by ';'
    #[arg(short = 's', long = "subscribe")]
    subscribe: Option<String>,

    /// Email addresses to remove from the subscriber list, separated by ';'
    #[arg(short = 'u', long = "unsubscribe")]
    unsubscribe: Option<String>,

    /// Compose and send the daily digest to every subscriber
    #[arg(long)]
    daily: bool,
}

#[tokio::main]
async fn main() {
    let subscriber = get_subscriber(String::from("postman"), String::from("info"));

    init_subscriber(subscriber);

    let options = Options::parse();
    let config = get_configuration().expect("Missing configuration file.");

    let db_pool = PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(2))
        .connect_lazy_with(config.get_db_options());
    let store: Arc<dyn StockStore> = Arc::new(PgStore::new(db_pool));
    let registry = SubscriberRegistry::new(Arc::clone(&store));

    registry.refresh().await;

    if let Some(emails) = &options.subscribe {
        for email in emails.split(';').filter(|email| !email.is_empty()) {
            registry.subscribe(email).await;
        }
    }

    if let Some(emails) = &options.unsubscribe {
        for email in emails.split(';').filter(|email| !email.is_empty()) {
            // Operator-side removal: derive the same credential the mailed
            // digest carries for this address.
            let token = token_of(sdbm_lower(email.trim()));
            registry.unsubscribe(email, &token).await;
        }
    }

    if options.daily {
        send_daily_digest(&config, store, &registry).await;
    }
}

async fn send_daily_digest(
    config: &postman::config::Settings,
    store: Arc<dyn StockStore>,
    registry: &SubscriberRegistry,
) {
    let subscribers = registry.get_all().await;
    if subscribers.is_empty() {
        tracing::warn!("No subscribers to send the digest to");
        return;
    }

    tracing::info!("Loaded {} subscriber email addresses", subscribers.len());

    let template = std::fs::read_to_string(&config.application.template_path)
        .expect("Failed to read the digest template.");
    let sender_email = config
        .get_email_client_sender()
        .expect("Sender email is not valid");
    let email_client = EmailClient::new(
        config.get_email_client_base_url(),
        sender_email,
        config.get_email_client_api(),
        None,
    );
    let composer = DigestComposer::new(template, config.application.chart_base_url.clone());

    let coordinator =
        DeliveryCoordinator::new(store, Arc::new(email_client), Arc::new(composer));

    let subject = format!(
        "[{}] {}",
        config.application.project_nickname,
        Local::now().date_naive()
    );

    tracing::info!("Starting the digest run");
    let report = coordinator.run(subscribers, &subject).await;
    tracing::info!(
        "Digest run finished: {} sent, {} failed, {:.2}secs",
        report.sent,
        report.failed,
        report.elapsed.as_secs_f64()
    );
}
