pub mod action;
pub mod command;
pub mod job;
pub mod phase;
pub mod progress;
