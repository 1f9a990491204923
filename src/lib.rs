pub mod controller;
pub mod db;
pub mod keys;
pub mod logging;
pub mod main_helper;
pub mod models;
pub mod orchestrator;
pub mod specs;
pub mod streaming;
pub mod title;
pub mod tools;
pub mod types;

pub use types::*;

pub use main_helper::{AppState, Args};
