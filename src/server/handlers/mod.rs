// API处理器模块

pub mod download;
pub mod status;

pub use download::*;
pub use status::*;
