pub mod client;
pub mod config;
pub mod handlers;
pub mod hosting;
pub mod notify;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod store;
