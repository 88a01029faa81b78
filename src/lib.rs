pub mod auth;
pub mod engine;
pub mod export;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod scan;
pub mod sql;
pub mod tenant;
pub mod tls;
pub mod wal;
pub mod wire;
