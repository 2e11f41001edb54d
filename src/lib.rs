pub mod base;
pub mod builtin;
pub mod error;
pub mod pipeline;
pub mod sim;
pub mod timeq;
pub mod ui;
