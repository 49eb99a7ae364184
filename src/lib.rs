pub mod app;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod response;
pub mod state;
pub mod storage;
pub mod uploads;
pub mod users;
pub mod validation;

#[cfg(test)]
mod test_support;
