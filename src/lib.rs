pub mod config;
pub mod domain;
pub mod events;
pub mod routes;
pub mod services;
pub mod workers;
