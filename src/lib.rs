//! Real-time push notification gateway.
//!
//! Browsers hold persistent WebSocket connections to this process; the CMS
//! backend drives it over an HTTP admin plane (publish, channel membership,
//! presence, content tokens) authenticated by a shared service key. Socket
//! authentication is delegated to the backend via an HTTP callback.

pub mod auth;
pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod models;
pub mod session;
pub mod state;
pub mod store;
pub mod websocket;
