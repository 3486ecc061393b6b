pub mod auditor;
pub mod auth;
pub mod config;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod observability;
pub mod sql;
pub mod wal;
pub mod wire;
