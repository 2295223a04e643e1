pub mod backend;
pub mod bus;
pub mod chat;
pub mod config;
pub mod filters;
pub mod gateway;
pub mod i18n;
pub mod manager;
pub mod server;
pub mod store;
