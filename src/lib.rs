// src/lib.rs

pub mod storage;
pub mod metadata;
pub mod chunker;
pub mod placement;
pub mod error;
pub mod api;
pub mod service;
pub mod app_state;
pub mod config;
pub mod logging;
