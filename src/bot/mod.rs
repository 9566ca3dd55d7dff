//! 机器人命令层：命令、菜单按钮、内联回调与报表文档

pub mod handlers;
pub mod report;

pub use handlers::{main_keyboard, parse_command, Bot};
