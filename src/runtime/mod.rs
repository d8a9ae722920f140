//! Discrete-event runtime: simulated time, the pending-event queue, and the
//! component/port graph that components are dispatched through.

pub mod calendar_queue;
pub mod component;
pub mod event;
pub mod queue;
pub mod time;

pub use component::{Component, Context, PortGraph, PortId, QueueKind, Runtime};
pub use event::{ComponentId, Event, EventId};
pub use time::{SimDuration, SimInstant};
