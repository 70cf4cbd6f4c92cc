pub mod producer;

pub use producer::{ProduceError, Producer, QueuedMessage, ValidationError};
