pub mod challenges;
pub mod health;
pub mod metrics;
pub mod upload;
