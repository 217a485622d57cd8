pub mod catalog;
pub mod config;
pub mod data;
pub mod error;
pub mod optimizer;
pub mod problem;
pub mod requirements;
pub mod score;
pub mod server;
pub mod stage1;
pub mod stage2;
pub mod store;
pub mod tracker;
