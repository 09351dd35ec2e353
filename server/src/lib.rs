pub mod connection;
pub mod file_store;
pub mod notifier;
pub mod rooms;
pub mod server;
