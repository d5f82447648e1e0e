// src/sessions/mod.rs
pub mod manager;
pub mod session;
pub mod switch;

pub use manager::{
    SessionManager, SwitchConnection, REASON_INSUFFICIENT_FUNDS, REASON_MANDATORY_FIELD_MISSING,
    REASON_RATER_UNAVAILABLE,
};
pub use session::Session;
pub use switch::{SwitchListener, TcpSwitchConnection};
