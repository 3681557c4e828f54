//! Cinder 工具集
//!
//! 目前只包含日志初始化，供 app 和各个 crate 的测试共用。

pub mod init_log;
