pub mod cli;
pub mod config;
pub mod crypto;
pub mod database;
pub mod directory;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod provisioner;
pub mod schema;
pub mod server;
pub mod services;
pub mod types;

#[cfg(test)]
pub mod testing;
