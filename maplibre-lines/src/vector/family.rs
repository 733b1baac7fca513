//! Groups style layers into families which share one geometry buffer.

use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::style::{
    layer::{LayerLayout, StyleLayer},
    StyleGeneration, StyleLayerSet,
};

/// Style layers which read the same source layer and tessellate identically. Paint properties may
/// differ between the layers of a family.
#[derive(Debug, Clone)]
pub struct LayerFamily {
    pub source_layer: String,
    pub layout: LayerLayout,
    /// Never empty, in style declaration order.
    pub layers: Vec<StyleLayer>,
}

impl LayerFamily {
    /// The id of the first layer.
    pub fn id(&self) -> &str {
        self.layers.first().map_or("", |layer| layer.id.as_str())
    }

    pub fn layer_ids(&self) -> Vec<String> {
        self.layers.iter().map(|layer| layer.id.clone()).collect()
    }

    pub fn has_line_pattern(&self) -> bool {
        self.layers.iter().any(|layer| {
            layer
                .line_paint()
                .map_or(false, |paint| paint.line_pattern.is_some())
        })
    }
}

/// Partitions `layers` into families. Families are ordered by their first layer, layers without
/// a source layer or without a bucket layout are skipped.
pub fn group_layers(layers: &[StyleLayer]) -> Vec<LayerFamily> {
    let mut families: Vec<LayerFamily> = Vec::new();

    for layer in layers {
        let (Some(source_layer), Some(layout)) = (&layer.source_layer, &layer.layout) else {
            continue;
        };

        match families
            .iter_mut()
            .find(|family| family.source_layer == *source_layer && family.layout == *layout)
        {
            Some(family) => family.layers.push(layer.clone()),
            None => families.push(LayerFamily {
                source_layer: source_layer.clone(),
                layout: layout.clone(),
                layers: vec![layer.clone()],
            }),
        }
    }

    families
}

#[derive(Debug)]
struct CachedFamilies {
    generation: StyleGeneration,
    families: Arc<[LayerFamily]>,
}

/// Groups style layers into families and keeps the result of the latest style generation.
///
/// The cache holds a single entry. It is replaced as a whole, so concurrent readers observe
/// either the previous or the new entry.
#[derive(Debug, Default)]
pub struct LayerFamilyGrouper {
    cache: RwLock<Option<CachedFamilies>>,
}

impl LayerFamilyGrouper {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process wide grouper.
    pub fn global() -> &'static LayerFamilyGrouper {
        static GROUPER: OnceLock<LayerFamilyGrouper> = OnceLock::new();
        GROUPER.get_or_init(LayerFamilyGrouper::new)
    }

    /// Returns the families of `style`. Calls with a set of the cached generation return the
    /// cached families, any other generation recomputes and replaces the cache.
    pub fn group(&self, style: &StyleLayerSet) -> Arc<[LayerFamily]> {
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = cache.as_ref() {
                if cached.generation == style.generation() {
                    return cached.families.clone();
                }
            }
        }

        let families: Arc<[LayerFamily]> = group_layers(style.layers()).into();
        tracing::debug!(
            "grouped {} layers into {} families",
            style.layers().len(),
            families.len()
        );

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        *cache = Some(CachedFamilies {
            generation: style.generation(),
            families: families.clone(),
        });
        families
    }

    /// Drops the cached families, the next call of [`LayerFamilyGrouper::group`] recomputes.
    pub fn invalidate(&self) {
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn cached_generation(&self) -> Option<StyleGeneration> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|cached| cached.generation)
    }
}
