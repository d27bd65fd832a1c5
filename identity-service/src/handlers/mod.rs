pub mod auth;
pub mod health;
pub mod tenant;
pub mod token;
pub mod user;
