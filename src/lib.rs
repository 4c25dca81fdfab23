pub mod app;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod download;
pub mod error;
pub mod identity;
pub mod metadata;
pub mod output;
pub mod parser;
pub mod query;
pub mod selection;
pub mod session;
pub mod taxonomy;
