//! Agent integration tests
//!
//! Sandbox tests run real `/bin/bash` scripts; the broker is the in-memory
//! implementation.

mod support;
mod test_executor;
mod test_job_runner;
mod test_sandbox;
