pub mod config;
pub mod delivery;
pub mod digest;
pub mod domain;
pub mod email_client;
pub mod identity;
pub mod registry;
pub mod storage;
pub mod telemetry;
