//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `talk` - Carrier, native and WebRTC media sockets
//! - `telephony` - Call placement and carrier webhooks
//! - `audiosocket` - Asterisk AudioSocket TCP listener

pub mod api;
pub mod audiosocket;
pub mod talk;
pub mod telephony;

pub use audiosocket::serve_audiosocket;
pub use talk::{carrier_media_handler, native_handler, webrtc_handler};
