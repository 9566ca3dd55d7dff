//! 外部集成：传输抽象与 Telegram 长轮询适配

pub mod dispatch;
pub mod telegram;
pub mod transport;

pub use dispatch::UserLanes;
pub use telegram::{run_polling, TelegramClient};
pub use transport::{Affordance, Button, ChatId, InboundEvent, Sender, Transport};
