pub mod api;
pub mod auth;
pub mod config;
pub mod drafts;
pub mod error;
pub mod invitations;
pub mod metrics;
pub mod models;
pub mod results;
pub mod setup;
pub mod standings;
pub mod store;
