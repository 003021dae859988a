// 核心数据结构和类型定义

pub mod types;
pub mod config;
pub mod error;
pub mod shutdown;

pub use types::*;
pub use config::*;
pub use error::*;
pub use shutdown::ShutdownSignal;
