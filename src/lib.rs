pub mod api;
pub mod attribution;
pub mod config;
pub mod models;
pub mod storage;
