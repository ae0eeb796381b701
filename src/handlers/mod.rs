pub mod auth;
pub mod games;
pub mod libraries;
pub mod platforms;
pub mod realtime;
