//! Realtime fan-out
//!
//! Lifecycle events flow from the scheduler to room-scoped websocket
//! subscribers through the [`FanOutHub`]. Delivery is best effort: a failed
//! send disconnects the subscriber and never aborts a state transition.

pub mod fanout;
pub mod message;

pub use fanout::{ConnectionId, FanOutHub};
pub use message::{
    create_message, Envelope, EVENT_JOB_COMPLETED, EVENT_JOB_CREATED, EVENT_JOB_UPDATED,
    EVENT_PING, EVENT_PONG, EVENT_SCHEDULER_STATUS,
};
