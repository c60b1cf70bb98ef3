//! Inbound transport: WebSocket listener.

pub mod websocket;
