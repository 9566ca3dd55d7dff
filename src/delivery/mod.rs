//! 出站投递：分段与广播

pub mod broadcast;
pub mod segment;

pub use broadcast::{BroadcastDispatcher, BroadcastReport};
pub use segment::{split_text, SAFE_SEGMENT_LEN, TRANSPORT_MAX_LEN};
