//! Database layer
//!
//! Chronicler stores users, auth sessions, stories and their refinement
//! conversations in a relational database:
//! - SQLite (default, file created on demand)
//! - MySQL (for shared deployments)
//!
//! The driver is selected from configuration and hidden behind the
//! [`DatabasePool`] trait.

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, mysql_pool, sqlite_pool, DatabasePool, DynDatabasePool,
    MysqlDatabase, SqliteDatabase,
};
