pub mod config_cmd;
pub mod jobs;
pub mod replay;
