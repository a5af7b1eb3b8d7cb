//! HTTP and WebSocket routes

pub mod evidence;
pub mod session;
pub mod ws;
