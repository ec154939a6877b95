//! Metered / free classification of tile requests.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Zoom up to which unknown layers are free.
pub const DEFAULT_MAX_FREE_ZOOM: u8 = 16;

/// Whether a request consumes paid upstream quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// No paid call happens: served from cache, or within the free zoom range.
    Free,
    /// The upstream charges for this request.
    Metered,
}

impl Classification {
    /// Both classifications, free first.
    pub const ALL: [Classification; 2] = [Classification::Free, Classification::Metered];

    /// Lowercase name used in keys, logs and metric labels.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Classification::Free => "free",
            Classification::Metered => "metered",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Highest free zoom level per tile layer.
///
/// A request is metered when its zoom is strictly above the layer's
/// threshold. Layers not in the table use the default threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerTable {
    layers: HashMap<SmolStr, u8>,
    default_max_free_zoom: u8,
}

impl Default for LayerTable {
    /// OS Maps API layers: web-mercator layers are free up to 16, British
    /// National Grid layers up to 9, the Leisure layer up to 5.
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FREE_ZOOM)
            .with_layer("Outdoor_3857", 16)
            .with_layer("Road_3857", 16)
            .with_layer("Light_3857", 16)
            .with_layer("Outdoor_27700", 9)
            .with_layer("Road_27700", 9)
            .with_layer("Light_27700", 9)
            .with_layer("Leisure_27700", 5)
    }
}

impl LayerTable {
    /// Empty table whose layers are all free up to `default_max_free_zoom`.
    pub fn new(default_max_free_zoom: u8) -> Self {
        Self {
            layers: HashMap::new(),
            default_max_free_zoom,
        }
    }

    /// Sets the threshold for `layer`.
    pub fn with_layer(mut self, layer: impl AsRef<str>, max_free_zoom: u8) -> Self {
        self.layers.insert(SmolStr::new(layer), max_free_zoom);
        self
    }

    /// Sets the threshold for layers not in the table.
    pub fn with_default_max_free_zoom(mut self, max_free_zoom: u8) -> Self {
        self.default_max_free_zoom = max_free_zoom;
        self
    }

    /// Threshold for `layer`.
    pub fn max_free_zoom(&self, layer: &str) -> u8 {
        self.layers
            .get(layer)
            .copied()
            .unwrap_or(self.default_max_free_zoom)
    }

    /// Classifies a request.
    ///
    /// Anything served from a local cache is free regardless of layer and
    /// zoom.
    pub fn classify(&self, from_cache: bool, layer: &str, zoom: u8) -> Classification {
        if from_cache || zoom <= self.max_free_zoom(layer) {
            Classification::Free
        } else {
            Classification::Metered
        }
    }
}
