pub mod app_session;
pub mod auth;
pub mod credentials;
pub mod mail;
pub mod persistence;
pub mod policy;
pub mod repository;
pub mod session;
pub mod sync;
