// src/cron/mod.rs
pub mod parser;

pub use parser::Schedule;
