pub mod analytics;
pub mod api;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod expiry;
pub mod gateway;
pub mod logs;
pub mod run;
pub mod store;
