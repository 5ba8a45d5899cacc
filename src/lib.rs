pub mod config;
pub mod logging;
pub mod panel;
pub mod protocol;
pub mod replica;
pub mod settings;
