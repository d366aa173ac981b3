pub mod auth;
pub mod client;
pub mod inbounds;
pub mod models;

pub use client::PanelClient;
pub use inbounds::PanelWrite;
