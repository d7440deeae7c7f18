pub mod config;
pub mod health;
pub mod retrieval;
pub mod units;
