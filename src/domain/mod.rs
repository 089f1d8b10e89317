pub mod event;
pub mod message;

pub use event::WireEnvelope;
pub use message::{Message, QueueItem};
