//! Per-step feature storage carried through a denoising run.

use std::borrow::Cow;
use std::collections::HashMap;

use ndarray::{Dimension, Ix4};

use crate::error::{Error, Result};
use crate::latent::LatentTensor;

/// What a cached tensor holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    /// Background latent noised to the level reached after the step.
    Background,
    /// Transformer velocity prediction at the step.
    Velocity,
}

/// Cache key: diffusion step index and feature kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureKey {
    pub step: usize,
    pub kind: FeatureKind,
}

impl FeatureKey {
    #[must_use]
    pub const fn background(step: usize) -> Self {
        Self {
            step,
            kind: FeatureKind::Background,
        }
    }

    #[must_use]
    pub const fn velocity(step: usize) -> Self {
        Self {
            step,
            kind: FeatureKind::Velocity,
        }
    }
}

/// Mapping from [`FeatureKey`] to latent-shaped tensors.
///
/// Every entry has the shape of the template latent the cache was built
/// from. A key without an entry reads as a zero tensor of that shape.
#[derive(Debug, Clone)]
pub struct FeatureCache {
    dim: Ix4,
    entries: HashMap<FeatureKey, LatentTensor>,
}

impl FeatureCache {
    /// Create an empty cache whose default value is `zeros_like(template)`.
    #[must_use]
    pub fn new(template: &LatentTensor) -> Self {
        Self {
            dim: template.raw_dim(),
            entries: HashMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &FeatureKey) -> Option<&LatentTensor> {
        self.entries.get(key)
    }

    /// The entry for `key`, or zeros when absent. Does not insert.
    #[must_use]
    pub fn get_or_default(&self, key: &FeatureKey) -> Cow<'_, LatentTensor> {
        self.entries.get(key).map_or_else(
            || Cow::Owned(LatentTensor::zeros(self.dim.clone())),
            Cow::Borrowed,
        )
    }

    /// Mutable access to the entry for `key`, inserting zeros when absent.
    pub fn entry(&mut self, key: FeatureKey) -> &mut LatentTensor {
        let dim = self.dim.clone();
        self.entries
            .entry(key)
            .or_insert_with(|| LatentTensor::zeros(dim))
    }

    /// Store `value` under `key`, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if `value` is not template-shaped.
    pub fn insert(&mut self, key: FeatureKey, value: LatentTensor) -> Result<()> {
        if value.raw_dim() != self.dim {
            return Err(Error::ShapeMismatch {
                expected: format!("{:?}", self.dim.slice()),
                actual: format!("{:?}", value.shape()),
            });
        }
        self.entries.insert(key, value);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Starting step and feature cache handed to a [`Denoiser`](super::Denoiser).
#[derive(Debug, Clone)]
pub struct StepInfo {
    /// Index into the timestep schedule where denoising starts.
    pub t: usize,
    pub feature: FeatureCache,
}

impl StepInfo {
    #[must_use]
    pub const fn new(t: usize, feature: FeatureCache) -> Self {
        Self { t, feature }
    }
}
