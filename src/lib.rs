//! Web Print: print job queue with a single-flight scheduler.

pub mod api;
pub mod config;
pub mod devices;
pub mod error;
pub mod jobs;
pub mod printing;
pub mod service;
pub mod storage;
