// src/lib.rs

//! Clinic appointment tracker library.
//!
//! Polls a clinic search page, keeps per-clinic state in a cache and
//! sends threshold and removal alerts to a webhook.

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
