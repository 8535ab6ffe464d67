//! Provisioning Agent Library
//!
//! Core modules for the provisioning agent: the installer sandbox, the job
//! executor and the worker that drives them from the broker queue.

pub mod app;
pub mod errors;
pub mod executor;
pub mod host;
pub mod logs;
pub mod sandbox;
pub mod storage;
pub mod utils;
pub mod workers;
