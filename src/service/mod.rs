//! Entity data access: the generic [`Dao`], its hooks, and the per-entity registry.

mod crud;
mod hooks;
mod record;
mod registry;
mod transition;

pub use crud::{Dao, ExportSource};
pub use hooks::{EntityHooks, NoHooks};
pub use record::{ChangedField, ChangedFields, LoadPlan, Record, Related, Values};
pub use registry::{Registry, RegistryBuilder};
pub use transition::TransitionGraph;
