//! Message types carried by the bus.

mod error;
mod ids;
mod message;

pub use error::{BusError, BusResult};
pub use ids::{CorrelationId, MessageId, SequenceNumber};
pub use message::{
    BroadcastReport, Delivery, Message, MessagePayload, Receipt, Recipient, SendRequest, Sender,
};
