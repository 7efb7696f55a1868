pub mod paths;
pub mod registry;
pub mod tasks;
pub mod tools;

pub use registry::{RegistryError, ToolRegistry};
pub use tasks::{TaskPatch, TaskStore};
pub use tools::{create_default_registry, RegistryDeps};
