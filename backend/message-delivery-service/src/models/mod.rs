pub mod message;

pub use message::{MessageRecord, MessageStatus, SendMessageRequest};
