//! Domain types shared by the write side and the replica.

mod aggregate;
mod event;
mod types;

pub use aggregate::{ActorProjection, SubjectAggregate};
pub use event::{EventEnvelope, EventKind};
pub use types::{ActorId, InteractionKind, SubjectId};
