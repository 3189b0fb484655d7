//! Message-bus abstraction consumed by the ingester pull loop, plus an
//! in-process test double. Concrete broker bindings (Service Bus, SQS, ...)
//! live outside this crate and implement [`MessageBus`].

mod bus;
mod error;
mod memory;
mod message;

pub use self::bus::MessageBus;
pub use self::error::{BusError, Result};
pub use self::memory::InMemoryBus;
pub use self::message::Message;
