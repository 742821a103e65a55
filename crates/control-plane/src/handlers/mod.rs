pub mod apps;
pub mod builds;
pub mod download;
pub mod health;
pub mod readiness;
pub mod scrape;
pub mod signing;
pub mod webhooks;
