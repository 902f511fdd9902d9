//! Lookup of classifiers by identifier.
use crate::codec::ModelFamily;
use crate::error::{AttackError, Result};
use crate::model::Classifier;
use log::debug;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// A loaded classifier together with the input contract it was trained on.
#[derive(Clone, Debug)]
pub struct ModelHandle {
    pub model: Arc<dyn Classifier>,
    pub family: ModelFamily,
}

impl ModelHandle {
    /// # Errors
    /// `ShapeMismatch` if the model's input shape differs from the family's.
    pub fn new(model: Arc<dyn Classifier>, family: ModelFamily) -> Result<Self> {
        let shape = model.input_shape();
        if shape != family.input_shape {
            return Err(AttackError::shape_mismatch(
                &family.input_shape.dims(),
                &shape.dims(),
            ));
        }
        Ok(Self { model, family })
    }
}

pub trait ModelProvider: Send + Sync {
    /// # Errors
    /// `UnknownModel` if nothing is registered under `id`.
    fn load(&self, id: &str) -> Result<ModelHandle>;
}

/// Handles registered up front, shared between callers.
#[derive(Debug, Default)]
pub struct InMemoryModelProvider {
    handles: RwLock<BTreeMap<String, ModelHandle>>,
}

impl InMemoryModelProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any handle already registered under `id`.
    pub fn register(&self, id: impl Into<String>, handle: ModelHandle) {
        let id = id.into();
        debug!("registering model {} ({})", id, handle.family.name);
        let mut handles = match self.handles.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handles.insert(id, handle);
    }

    pub fn ids(&self) -> Vec<String> {
        match self.handles.read() {
            Ok(guard) => guard.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
        }
    }
}

impl ModelProvider for InMemoryModelProvider {
    fn load(&self, id: &str) -> Result<ModelHandle> {
        let handles = match self.handles.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handles
            .get(id)
            .cloned()
            .ok_or_else(|| AttackError::UnknownModel(id.to_string()))
    }
}
