//! CLI 模块
//!
//! 提供命令行接口定义和命令执行逻辑。

mod commands;
mod runner;

pub use commands::{Cli, Commands, ConfigAction, RunArgs};
pub use runner::CommandRunner;
