pub mod bot;
pub mod format;
pub mod types;
