pub mod subscriber;
pub mod subscriber_email;
