//! Alerting System
//!
//! Turns a noisy per-frame boolean signal into stable alert emissions:
//! a condition must hold for N consecutive observations before it fires,
//! and a fired alert stays quiet for a cooldown while the condition persists.

mod manager;

pub use manager::{AlertManager, AlertPhase, AlertPolicy, AlertState};
