//! Reference model of a module/facet workspace
//!
//! The reference model keeps the expected state of a small workspace as
//! plain maps, applies the same operations a builder receives, and compares
//! itself against any storage afterwards.
//!
//! # Example
//!
//! ```ignore
//! use wsmodel_storage::testing::{sample_registry, Operation, ReferenceModel};
//!
//! let registry = sample_registry();
//! let mut builder = Builder::new(registry.clone());
//! let mut model = ReferenceModel::new();
//!
//! let op = Operation::AddModule { name: "app".into() };
//! if model.apply(&op) {
//!     op.execute(&mut builder)?;
//! }
//! assert!(model.compare(&builder).is_empty());
//! ```

use crate::builder::Builder;
use crate::storage::EntityStorage;
use crate::testing::fixtures::{facet, module};
use std::collections::{BTreeMap, BTreeSet};
use wsmodel_core::{EntityData, EntityId, Result, Value};

/// Operation recorded in the reference model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Add a module
    AddModule {
        /// Module name
        name: String,
    },
    /// Rename a module
    RenameModule {
        /// Current name
        from: String,
        /// New name
        to: String,
    },
    /// Remove a module; its facets are detached
    RemoveModule {
        /// Module name
        name: String,
    },
    /// Add a facet, optionally under a module
    AddFacet {
        /// Facet name
        name: String,
        /// Owning module
        module: Option<String>,
    },
    /// Point a facet at another module, or detach it
    MoveFacet {
        /// Facet name
        name: String,
        /// New owning module
        module: Option<String>,
    },
    /// Remove a facet
    RemoveFacet {
        /// Facet name
        name: String,
    },
}

impl Operation {
    /// Perform the operation on a builder
    ///
    /// Only call this for operations the model accepted.
    pub fn execute(&self, builder: &mut Builder) -> Result<()> {
        let registry = builder.registry().clone();
        match self {
            Operation::AddModule { name } => {
                builder.add_entity(module(&registry, name), &[])?;
            }
            Operation::RenameModule { from, to } => {
                let id = find_named(&*builder, "Module", from)?;
                builder.modify_entity(id, |m| m.set("name", Value::string(to.as_str())))?;
            }
            Operation::RemoveModule { name } => {
                let id = find_named(&*builder, "Module", name)?;
                builder.remove_entity(id)?;
            }
            Operation::AddFacet { name, module: owner } => {
                let mut parents = Vec::new();
                if let Some(owner) = owner {
                    let parent = find_named(&*builder, "Module", owner)?;
                    parents.push((registry.connection("Facet", "module")?, parent));
                }
                builder.add_entity(facet(&registry, name), &parents)?;
            }
            Operation::MoveFacet { name, module: owner } => {
                let id = find_named(&*builder, "Facet", name)?;
                let parent = match owner {
                    Some(owner) => Some(find_named(&*builder, "Module", owner)?),
                    None => None,
                };
                builder.update_parent_of_child(registry.connection("Facet", "module")?, id, parent)?;
            }
            Operation::RemoveFacet { name } => {
                let id = find_named(&*builder, "Facet", name)?;
                builder.remove_entity(id)?;
            }
        }
        Ok(())
    }
}

// Panics when the model accepted an operation the storage cannot follow
fn find_named(storage: &dyn EntityStorage, type_name: &str, name: &str) -> Result<EntityId> {
    let found = storage
        .entities_named(type_name)?
        .find(|(_, data)| data.get("name").and_then(|v| v.as_str()) == Some(name))
        .map(|(id, _)| id);
    Ok(found.unwrap_or_else(|| panic!("{} {} diverged from the reference model", type_name, name)))
}

/// Expected workspace state
#[derive(Debug, Clone, Default)]
pub struct ReferenceModel {
    modules: BTreeSet<String>,
    /// facet name -> owning module
    facets: BTreeMap<String, Option<String>>,
    committed_ops: Vec<Operation>,
}

impl ReferenceModel {
    /// Create a new empty reference model
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an operation to the model
    ///
    /// Returns `false` (and records nothing) when the operation does not
    /// apply: unknown names, or a name already taken. Module names are
    /// persistent ids, so duplicates would be rejected by the builder too.
    pub fn apply(&mut self, op: &Operation) -> bool {
        let applied = match op {
            Operation::AddModule { name } => self.modules.insert(name.clone()),
            Operation::RenameModule { from, to } => {
                if !self.modules.contains(from) || self.modules.contains(to) {
                    false
                } else {
                    self.modules.remove(from);
                    self.modules.insert(to.clone());
                    for owner in self.facets.values_mut() {
                        if owner.as_deref() == Some(from.as_str()) {
                            *owner = Some(to.clone());
                        }
                    }
                    true
                }
            }
            Operation::RemoveModule { name } => {
                let removed = self.modules.remove(name);
                if removed {
                    for owner in self.facets.values_mut() {
                        if owner.as_deref() == Some(name.as_str()) {
                            *owner = None;
                        }
                    }
                }
                removed
            }
            Operation::AddFacet { name, module } => {
                if self.facets.contains_key(name) || !self.module_known(module) {
                    false
                } else {
                    self.facets.insert(name.clone(), module.clone());
                    true
                }
            }
            Operation::MoveFacet { name, module } => {
                if !self.facets.contains_key(name) || !self.module_known(module) {
                    false
                } else {
                    self.facets.insert(name.clone(), module.clone());
                    true
                }
            }
            Operation::RemoveFacet { name } => self.facets.remove(name).is_some(),
        };
        if applied {
            self.committed_ops.push(op.clone());
        }
        applied
    }

    fn module_known(&self, module: &Option<String>) -> bool {
        module.as_ref().map_or(true, |m| self.modules.contains(m))
    }

    /// Expected module names
    pub fn modules(&self) -> &BTreeSet<String> {
        &self.modules
    }

    /// Expected facets with their owners
    pub fn facets(&self) -> &BTreeMap<String, Option<String>> {
        &self.facets
    }

    /// Operations accepted so far
    pub fn operations(&self) -> &[Operation] {
        &self.committed_ops
    }

    /// Compare the expected state against a storage
    ///
    /// Returns list of mismatches found.
    pub fn compare(&self, storage: &dyn EntityStorage) -> Vec<StateMismatch> {
        let mut mismatches = Vec::new();
        let (actual_modules, actual_facets) = match observe(storage) {
            Ok(state) => state,
            Err(e) => {
                mismatches.push(StateMismatch {
                    entity: "registry".to_string(),
                    expected: "Module and Facet types".to_string(),
                    actual: e.to_string(),
                });
                return mismatches;
            }
        };

        for name in self.modules.symmetric_difference(&actual_modules) {
            let expected_here = self.modules.contains(name);
            mismatches.push(StateMismatch {
                entity: format!("module:{}", name),
                expected: if expected_here { "present" } else { "not present" }.to_string(),
                actual: if expected_here { "not found" } else { "found" }.to_string(),
            });
        }

        for (name, expected_owner) in &self.facets {
            match actual_facets.get(name) {
                Some(owner) if owner == expected_owner => {}
                Some(owner) => mismatches.push(StateMismatch {
                    entity: format!("facet:{}", name),
                    expected: format!("{:?}", expected_owner),
                    actual: format!("{:?}", owner),
                }),
                None => mismatches.push(StateMismatch {
                    entity: format!("facet:{}", name),
                    expected: format!("{:?}", expected_owner),
                    actual: "not found".to_string(),
                }),
            }
        }
        for name in actual_facets.keys() {
            if !self.facets.contains_key(name) {
                mismatches.push(StateMismatch {
                    entity: format!("facet:{}", name),
                    expected: "not present".to_string(),
                    actual: "found".to_string(),
                });
            }
        }
        mismatches
    }
}

fn name_of(data: &EntityData) -> String {
    data.get("name")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

type ObservedState = (BTreeSet<String>, BTreeMap<String, Option<String>>);

fn observe(storage: &dyn EntityStorage) -> Result<ObservedState> {
    let modules = storage
        .entities_named("Module")?
        .map(|(_, data)| name_of(data))
        .collect();
    let link = storage.registry().connection("Facet", "module")?;
    let facets = storage
        .entities_named("Facet")?
        .map(|(id, data)| {
            let owner = storage
                .extract_parent(link, id)
                .and_then(|m| storage.entity_data(m))
                .map(|m| name_of(m));
            (name_of(data), owner)
        })
        .collect();
    Ok((modules, facets))
}

/// State mismatch found during comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMismatch {
    /// Entity identifier (e.g., "facet:web")
    pub entity: String,
    /// Expected value
    pub expected: String,
    /// Actual value
    pub actual: String,
}

impl std::fmt::Display for StateMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: expected {}, got {}", self.entity, self.expected, self.actual)
    }
}
