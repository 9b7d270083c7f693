pub mod candles;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod engine;
pub mod gateway;
pub mod indicators;
pub mod observer;
pub mod paper;
pub mod position_manager;
pub mod scheduler;
pub mod signal_feed;
pub mod stop_conditions;
pub mod strategy;
pub mod telegram;
pub mod types;

pub use engine::{Engine, RunSummary};
