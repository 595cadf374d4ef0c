// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod envelope;
pub mod message_codec;
pub mod reqwest_transport;
pub mod token_store;
pub mod websocket_transport;
