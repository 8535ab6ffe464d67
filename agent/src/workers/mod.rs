//! Background workers

pub mod job_runner;
