// src/processor/mod.rs
pub mod aggregator;
pub mod timeframe;
pub mod worker;
