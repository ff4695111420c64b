//! `SQLite` database layer shared by the local and remote stores

mod connection;
mod migrations;

pub use connection::Database;
