//! Altsmith-DB: SQLite schema, migrations, and query operations
//!
//! This crate provides database functionality for altsmith using SQLite
//! with rusqlite and r2d2 connection pooling.
//!
//! # Modules
//!
//! - `migrations` - Database schema migrations
//! - `pool` - Connection pool management
//! - `models` - Rust models matching database schema
//! - `queries` - Database query operations
//!
//! # Example
//!
//! ```no_run
//! use altsmith_db::pool::{init_pool, get_conn};
//! use altsmith_db::queries::clients;
//!
//! let pool = init_pool("/var/lib/altsmith/db.sqlite").unwrap();
//! let conn = get_conn(&pool).unwrap();
//!
//! let all = clients::list_clients(&conn).unwrap();
//! println!("{} registered clients", all.len());
//! ```

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
