//! # Database Operations
//!
//! Everything that talks to SQL Server.
//!
//! ## Key Components
//!
//! - [`executor`] - The [`SqlExecutor`] trait the listener and admin helpers use
//! - [`connection`] - tiberius-backed [`MssqlExecutor`] (feature `mssql`)
//! - [`admin`] - Identity discovery and forced cleanup for operational tooling

pub mod admin;
#[cfg(feature = "mssql")]
pub mod connection;
pub mod executor;

pub use admin::{clean_database, list_active_identities};
#[cfg(feature = "mssql")]
pub use connection::MssqlExecutor;
pub use executor::SqlExecutor;
