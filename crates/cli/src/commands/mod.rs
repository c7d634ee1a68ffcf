pub mod broker;
pub mod config_cmd;
pub mod demo;
pub mod onboard;
