//! 记忆层：对话窗口与按用户划分的会话存储（仅内存，进程重启即丢失）

pub mod conversation;
pub mod session;

pub use conversation::{DialogueWindow, Message, Role};
pub use session::{SessionStore, UserId, UserSession};
