pub mod config;
pub mod database;
pub mod pipeline;
pub mod schema;
pub mod services;
