pub mod auth;
pub mod bot;
pub mod conf;
pub mod data;
pub mod docs;
pub mod entitlement;
pub mod monitor;
pub mod predict;
pub mod provider;
pub mod report;
pub mod server;
pub mod telegram;
pub mod tracing;
pub mod transport;
pub mod types;
