//! Shared SQLite database access

pub mod init;

pub use init::init_database;
