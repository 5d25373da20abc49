pub mod archive;
pub mod classify;
pub mod config;
pub mod fetcher;
pub mod progress;
pub mod registry;
pub mod scan;
pub mod store;
pub mod terminal;
