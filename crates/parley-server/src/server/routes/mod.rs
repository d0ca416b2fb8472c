pub mod status;
pub mod websocket;
