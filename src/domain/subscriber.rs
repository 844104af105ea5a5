use chrono::{DateTime, Utc};

use crate::domain::subscriber_email::SubscriberEmail;
use crate::identity::{sdbm_lower, token_of};

/// A registered recipient of the daily digest. The id is derived from the
/// lowercase form of the address and is the sole identity criterion; email
/// and subscribed_date are informational.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Subscriber {
    pub id: i32,
    pub email: String,
    pub subscribed_date: DateTime<Utc>,
}

impl Subscriber {
    pub fn new(email: SubscriberEmail) -> Subscriber {
        Subscriber {
            id: sdbm_lower(email.as_ref()),
            email: email.as_ref().to_string(),
            subscribed_date: Utc::now(),
        }
    }

    /// Rehydrates a subscriber from its persisted row. The stored id wins
    /// over a recomputed one.
    pub fn from_row(id: i32, email: String, subscribed_date: DateTime<Utc>) -> Subscriber {
        Subscriber {
            id,
            email,
            subscribed_date,
        }
    }

    /// The unsubscribe credential mailed out with every digest.
    pub fn token(&self) -> String {
        token_of(self.id)
    }
}

impl PartialEq for Subscriber {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Subscriber {}

impl std::hash::Hash for Subscriber {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
