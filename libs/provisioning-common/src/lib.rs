//! Provisioning Common Library
//!
//! Manifest schema, input validation, job signing and the broker protocol
//! shared by the provisioning agent and the control panel.

pub mod broker;
pub mod codec;
pub mod errors;
pub mod filesys;
pub mod models;
pub mod protocol;
pub mod registry;
pub mod validator;
