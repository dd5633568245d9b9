pub mod auth;
pub mod cli;
pub mod config;
pub mod crash;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod security;
pub mod server;

#[cfg(test)]
pub mod testing;
