// src/services/mod.rs
pub mod cdr_server;

pub use cdr_server::{CdrServer, MediationRun};
