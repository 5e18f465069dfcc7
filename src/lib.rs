//! DodoBridge: a small key/list store over HTTP whose listeners turn
//! blocking list pops into webhook deliveries.

pub mod app;
pub mod config;
pub mod errors;
pub mod routes;
pub mod services;
pub mod state;
