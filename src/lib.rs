pub mod backend;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod storage;
