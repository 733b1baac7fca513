//! Vector tile styles which are relevant for bucketing and drawing lines.

use std::{
    ops::Deref,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use serde::Deserialize;

use crate::style::layer::StyleLayer;

pub mod expression;
pub mod layer;
pub mod paint;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Identifies one version of a style layer set. Two sets carry the same generation only if one
/// is a clone of the other.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StyleGeneration(u64);

impl StyleGeneration {
    fn next() -> Self {
        StyleGeneration(NEXT_GENERATION.fetch_add(1, Ordering::Relaxed))
    }
}

/// The ordered style layers of a map style.
///
/// Every call to [`StyleLayerSet::new`] yields a fresh generation, even for layers which are
/// structurally equal to an earlier set.
#[derive(Debug, Clone)]
pub struct StyleLayerSet {
    generation: StyleGeneration,
    layers: Arc<[StyleLayer]>,
}

impl StyleLayerSet {
    pub fn new(layers: Vec<StyleLayer>) -> Self {
        Self {
            generation: StyleGeneration::next(),
            layers: layers.into(),
        }
    }

    /// Reads the `layers` array of a style document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct StyleDocument {
            #[serde(default)]
            layers: Vec<StyleLayer>,
        }

        let document: StyleDocument = serde_json::from_str(json)?;
        Ok(Self::new(document.layers))
    }

    pub fn generation(&self) -> StyleGeneration {
        self.generation
    }

    pub fn layers(&self) -> &[StyleLayer] {
        &self.layers
    }

    pub fn layer(&self, id: &str) -> Option<&StyleLayer> {
        self.layers.iter().find(|layer| layer.id == id)
    }
}

impl Deref for StyleLayerSet {
    type Target = [StyleLayer];

    fn deref(&self) -> &Self::Target {
        &self.layers
    }
}
