// Application layer - Services and the capability traits they depend on
pub mod credential_store;
pub mod dispatcher;
pub mod errors;
pub mod history_service;
pub mod http_transport;
pub mod live_session;
pub mod monitor_api;
pub mod request_pipeline;
pub mod stream_client;
pub mod stream_transport;
pub mod token_manager;

#[cfg(test)]
pub mod fakes;
