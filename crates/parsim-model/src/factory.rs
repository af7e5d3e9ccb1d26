//! # parsim-model::factory
//!
//! The factory the core consumes to turn a type name plus a parameter map
//! into a component instance. Builders come in named libraries; "loading"
//! a library registers its builder set, and the set of loaded library
//! names is checkpointed so a restart can re-load them before any
//! component state is deserialized.
//!
//! The registry is guarded by an internal mutex; concurrent loads from
//! multiple partition threads are serialized.

use crate::api::{Component, CoreCtx};
use crate::params::Params;
use fxhash::FxHashMap;
use parsim_types::errors::SimError;
use parsim_types::ids::ComponentId;
use std::collections::BTreeSet;
use std::sync::Mutex;

/// Constructs one component. The context is live: constructors configure
/// links, register clocks, and may register as primary.
pub type BuildFn = fn(ComponentId, &Params, &mut dyn CoreCtx) -> Box<dyn Component>;

/// A named set of component builders.
pub struct Library {
    pub name: &'static str,
    pub builders: &'static [(&'static str, BuildFn)],
}

struct Registry {
    available: FxHashMap<String, &'static Library>,
    loaded: BTreeSet<String>,
    builders: FxHashMap<String, BuildFn>,
}

/// The component factory.
pub struct Factory {
    registry: Mutex<Registry>,
    /// Opaque library search path, persisted verbatim into checkpoints.
    search_paths: String,
}

impl Factory {
    pub fn new(search_paths: impl Into<String>) -> Self {
        Self {
            registry: Mutex::new(Registry {
                available: FxHashMap::default(),
                loaded: BTreeSet::new(),
                builders: FxHashMap::default(),
            }),
            search_paths: search_paths.into(),
        }
    }

    pub fn search_paths(&self) -> &str {
        &self.search_paths
    }

    /// Makes a library available for loading.
    pub fn register_library(&self, lib: &'static Library) {
        let mut reg = self.registry.lock().expect("factory registry poisoned");
        reg.available.insert(lib.name.to_string(), lib);
    }

    /// Loads a library: its builders become creatable under
    /// `"<lib>.<Type>"` names. Idempotent.
    pub fn load_library(&self, name: &str) -> Result<(), SimError> {
        let mut reg = self.registry.lock().expect("factory registry poisoned");
        if reg.loaded.contains(name) {
            return Ok(());
        }
        let lib = reg
            .available
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownComponentType(name.to_string()))?;
        for (type_name, build) in lib.builders {
            reg.builders
                .insert(format!("{}.{}", lib.name, type_name), *build);
        }
        reg.loaded.insert(name.to_string());
        tracing::debug!(library = name, "component library loaded");
        Ok(())
    }

    /// The names of all loaded libraries, for the checkpoint blob.
    pub fn loaded_libraries(&self) -> BTreeSet<String> {
        let reg = self.registry.lock().expect("factory registry poisoned");
        reg.loaded.clone()
    }

    /// Resolves a full type name (`"<lib>.<Type>"`), loading its library
    /// on demand when the prefix names one.
    fn resolve(&self, type_name: &str) -> Result<BuildFn, SimError> {
        {
            let reg = self.registry.lock().expect("factory registry poisoned");
            if let Some(build) = reg.builders.get(type_name) {
                return Ok(*build);
            }
        }
        if let Some((lib, _)) = type_name.split_once('.') {
            self.load_library(lib)?;
            let reg = self.registry.lock().expect("factory registry poisoned");
            if let Some(build) = reg.builders.get(type_name) {
                return Ok(*build);
            }
        }
        Err(SimError::UnknownComponentType(type_name.to_string()))
    }

    /// Builds a component instance.
    pub fn create(
        &self,
        type_name: &str,
        id: ComponentId,
        params: &Params,
        ctx: &mut dyn CoreCtx,
    ) -> Result<Box<dyn Component>, SimError> {
        let build = self.resolve(type_name)?;
        Ok(build(id, params, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::DEMO_LIBRARY;

    #[test]
    fn load_is_idempotent_and_tracked() {
        let factory = Factory::new("");
        factory.register_library(&DEMO_LIBRARY);
        factory.load_library("demo").unwrap();
        factory.load_library("demo").unwrap();
        assert_eq!(
            factory.loaded_libraries().into_iter().collect::<Vec<_>>(),
            vec!["demo".to_string()]
        );
    }

    #[test]
    fn unknown_library_is_an_error() {
        let factory = Factory::new("");
        assert!(factory.load_library("nope").is_err());
        assert!(matches!(
            factory.resolve("nope.Widget"),
            Err(SimError::UnknownComponentType(_))
        ));
    }
}
