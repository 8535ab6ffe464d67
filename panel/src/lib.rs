//! Provisioning Panel Library
//!
//! Control-plane side of provisioning: issues signed install jobs to agent
//! queues and tracks their results and installed applications.

pub mod config;
pub mod errors;
pub mod installed;
pub mod job_manager;
