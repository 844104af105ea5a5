use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::domain::subscriber::Subscriber;
use crate::domain::subscriber_email::SubscriberEmail;
use crate::identity::{id_of_token, sdbm_lower};
use crate::storage::StockStore;

/// In-memory mirror of the persisted subscriber set. Storage stays the
/// source of truth: the cache is rebuilt wholesale from it on every listing
/// and is never allowed to run ahead of durable state.
///
/// `refresh`, `subscribe` and `unsubscribe` all serialize on one mutex so a
/// read-then-write cannot lose an update to a concurrent caller.
pub struct SubscriberRegistry {
    store: Arc<dyn StockStore>,
    cache: Mutex<HashMap<i32, Subscriber>>,
}

impl SubscriberRegistry {
    pub fn new(store: Arc<dyn StockStore>) -> SubscriberRegistry {
        SubscriberRegistry {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the cache with whatever storage currently holds. An empty
    /// read is treated as "storage unavailable or not yet populated" and
    /// keeps the existing cache instead of wiping it.
    #[tracing::instrument(name = "Refreshing the subscriber cache", skip(self))]
    pub async fn refresh(&self) {
        let mut cache = self.cache.lock().await;

        self.refresh_locked(&mut cache).await;
    }

    /// Returns a snapshot of every subscriber, refreshing from storage first.
    pub async fn get_all(&self) -> Vec<Subscriber> {
        let mut cache = self.cache.lock().await;

        self.refresh_locked(&mut cache).await;

        cache.values().cloned().collect()
    }

    #[tracing::instrument(name = "Subscribing an email address", skip(self))]
    pub async fn subscribe(&self, email: &str) -> bool {
        let email = match SubscriberEmail::parse(email.to_string()) {
            Ok(email) => email,
            Err(err) => {
                tracing::warn!("Invalid email address: {}", err);
                return false;
            }
        };

        let subscriber = Subscriber::new(email);
        let mut cache = self.cache.lock().await;

        if cache.contains_key(&subscriber.id) {
            tracing::warn!("Email address is already subscribed, '{}'", subscriber.email);
            return false;
        }

        if let Err(err) = self.store.add_subscriber(&subscriber).await {
            tracing::error!(
                "Failed to persist subscriber '{}': {:?}",
                subscriber.email,
                err
            );
            return false;
        }

        cache.insert(subscriber.id, subscriber);

        true
    }

    /// Token-authorized removal. The token is mailed out with every digest,
    /// so presenting one that encodes the address's own id proves receipt of
    /// that message; knowing the address alone is not enough.
    #[tracing::instrument(name = "Unsubscribing an email address", skip(self, token))]
    pub async fn unsubscribe(&self, email: &str, token: &str) -> bool {
        let email = match SubscriberEmail::parse(email.to_string()) {
            Ok(email) => email,
            Err(err) => {
                tracing::warn!("Invalid email address: {}", err);
                return false;
            }
        };

        let id = match id_of_token(token) {
            Some(id) => id,
            None => {
                tracing::warn!("Invalid unsubscribe token, '{}'", token);
                return false;
            }
        };

        if id != sdbm_lower(email.as_ref()) {
            tracing::warn!("Token does not belong to '{}'", email.as_ref());
            return false;
        }

        let mut cache = self.cache.lock().await;

        if !cache.contains_key(&id) {
            tracing::warn!("Email address is not subscribed, '{}'", email.as_ref());
            return false;
        }

        // Evict only once the removal is durable.
        if let Err(err) = self.store.remove_subscriber_by_id(id).await {
            tracing::error!(
                "Failed to remove subscriber '{}' from storage: {:?}",
                email.as_ref(),
                err
            );
            return false;
        }

        cache.remove(&id);

        true
    }

    async fn refresh_locked(&self, cache: &mut HashMap<i32, Subscriber>) {
        match self.store.select_all_subscribers().await {
            Ok(subscribers) if !subscribers.is_empty() => {
                cache.clear();
                for subscriber in subscribers {
                    cache.insert(subscriber.id, subscriber);
                }
            }
            Ok(_) => {
                tracing::warn!("Storage returned no subscribers; keeping the current cache");
            }
            Err(err) => {
                tracing::error!("Failed to read subscribers from storage: {:?}", err);
            }
        }
    }
}
