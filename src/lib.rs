pub mod access;
pub mod agent;
pub mod config;
pub mod delivery;
pub mod history;
pub mod logging;
pub mod mailbox;
pub mod prompts;
pub mod runtime;
pub mod task;
pub mod telegram;
pub mod tools;
