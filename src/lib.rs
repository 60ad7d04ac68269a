pub mod config;
pub mod data;
pub mod evaluation;
pub mod lines;
pub mod monitoring;
pub mod pipeline;
pub mod storage;
