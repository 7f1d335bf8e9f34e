//! Inbound adapters: the realtime WebSocket surface.

pub mod ws;
