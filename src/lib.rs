pub mod algorithms;
pub mod capacity;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod live;
pub mod models;
pub mod output;
pub mod protocol;
pub mod replay;
pub mod state;
pub mod topology;
