pub mod dispatcher;
pub mod handle;
pub mod listener;
pub mod peer_config;
