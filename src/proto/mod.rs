mod auth;
mod connection;
mod greeting;
mod listener;
pub mod packets;

pub use auth::{check_native_password, Auth};
pub use connection::Connection;
pub use greeting::Greeting;
pub use listener::{Handler, Listener, ServerHandle};
