pub mod capabilities;
pub mod command;
pub mod config;
pub mod converter;
pub mod error;
pub mod ffmpeg;
pub mod fstools;
pub mod probe;
pub mod profile;
pub mod progress;
pub mod queue;
pub mod scanner;
pub mod supervisor;
pub mod task;
