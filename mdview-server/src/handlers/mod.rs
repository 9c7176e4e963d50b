pub mod file;
pub mod health;
pub mod watch;
pub mod websocket;
