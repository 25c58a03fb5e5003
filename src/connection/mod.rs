#[allow(clippy::module_inception)]
pub mod connection;
pub mod peer_socket;
pub mod readiness;
