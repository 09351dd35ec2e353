pub mod message;
pub mod registry;
pub mod store;
pub mod tasks;
pub mod types;

pub use message::*;
pub use registry::{PresenceEntry, SessionRegistry};
pub use store::{DocumentStore, MemoryStore, StoreError};
pub use tasks::{LocalTaskService, TaskError, TaskService};
pub use types::*;
