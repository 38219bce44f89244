pub mod booking;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod gate;
pub mod http;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod wal;
