//! Testing utilities shared by unit and integration tests
//!
//! - **Fixtures**: a sample registry modelled on a project structure
//!   (modules, content roots, facets, libraries) and constructors for its
//!   entities
//! - **Reference Model**: plain in-memory model of expected modules and
//!   facets, compared against a storage after a sequence of operations
//!
//! # Example
//!
//! ```ignore
//! use wsmodel_storage::testing::{module, sample_registry, Operation, ReferenceModel};
//!
//! let registry = sample_registry();
//! let mut builder = Builder::new(registry.clone());
//! builder.add_entity(module(&registry, "app"), &[])?;
//!
//! let mut model = ReferenceModel::new();
//! model.apply(&Operation::AddModule { name: "app".into() });
//! assert!(model.compare(&builder).is_empty());
//! ```

mod fixtures;
mod reference_model;

pub use fixtures::{
    child, content_root, facet, library, module, module_id, module_with_deps, parent,
    reversed_registry, sample_registry, settings, source, url,
};
pub use reference_model::{Operation, ReferenceModel, StateMismatch};
