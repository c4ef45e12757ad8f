//! Pure data model: everything the planner reads and everything it produces.
//!
//! Nothing in this tree performs I/O. Relation wire formats, desired router
//! configuration, credentials, events and the per-event model snapshot all
//! live here so planner behavior can be tested with plain struct literals.

pub mod credential;
pub mod desired;
pub mod endpoints;
pub mod event;
pub mod snapshot;
pub mod status;

pub use credential::Credential;
pub use desired::{AuthMode, DesiredConfig};
pub use endpoints::{ConfigServerEndpoint, ReplicaSetUri};
pub use event::{Event, RelationName};
pub use snapshot::{
    DataBag, ModelSnapshot, ProcessState, RelationId, RelationView, UnitIdentity,
};
pub use status::{StatusKind, UnitStatus};
