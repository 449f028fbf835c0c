// src/lib.rs
pub mod alerts;
pub mod api;
pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod notifier;
pub mod prices;
pub mod processor;
pub mod utils;
