pub mod api;
pub mod auth;
pub mod config;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod housekeeping;
pub mod hub;
pub mod messages;
pub mod model;
pub mod presence;
pub mod rooms;
pub mod users;
pub mod ws;
