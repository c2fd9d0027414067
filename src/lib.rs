//! Image transformation core: a declarative edit pipeline (resize, crop,
//! rotate, mirror, filters, watermark, re-encode) fronted by deterministic
//! cache keys, with a durable job queue and per-image processing gate for
//! the asynchronous path.

pub mod cache;
pub mod canonical;
pub mod common;
pub mod config;
pub mod error;
pub mod jobs;
pub mod pipeline;
pub mod queue;
pub mod repo;
pub mod service;
pub mod spec;
pub mod storage;
pub mod utils;
pub mod worker;
