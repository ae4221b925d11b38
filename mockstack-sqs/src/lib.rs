//! Queue service for MockStack
//!
//! The stateful core behind the queueing backend: queue and message
//! lifecycle, visibility timeout, delayed delivery, retry counting and
//! dead-letter redrive, specified against an abstract atomic store so a
//! durable backend can replace the in-memory one.

pub mod api;
pub mod error;
pub mod messages;
pub mod model;
pub mod queues;
pub mod reaper;
pub mod store;

pub use api::{SqsAction, SqsHandler};
pub use error::SqsError;
pub use messages::MessageEngine;
pub use queues::QueueEngine;
pub use reaper::MessageReaper;
pub use store::{MemoryMessageStore, MemoryQueueStore, MessageStore, QueueStore};
