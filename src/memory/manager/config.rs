/*!
 * Manager Configuration
 * Routing thresholds, standard heap sizes and the slab class table
 */

use crate::core::errors::ConfigError;
use crate::core::limits::{
    ENV_PREFIX, LARGE_ALLOC_THRESHOLD, MINIMUM_BUFFER_SUBDIV_SIZE, MINIMUM_IMAGE_SUBDIV_SIZE,
    SMALL_ALLOC_THRESHOLD, SMALL_HEAP_CLASSES, STANDARD_BUFFER_HEAP_SIZE, STANDARD_IMAGE_HEAP_SIZE,
};
use crate::core::types::DeviceSize;
use crate::memory::types::SlabClass;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Requests strictly above this go to unique heaps
    pub large_alloc_threshold: DeviceSize,
    /// Requests at or below this go to slab heaps
    pub small_alloc_threshold: DeviceSize,
    pub standard_buffer_heap_size: DeviceSize,
    pub standard_image_heap_size: DeviceSize,
    pub min_buffer_subdivision: DeviceSize,
    pub min_image_subdivision: DeviceSize,
    pub slab_classes: Vec<SlabClass>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            large_alloc_threshold: LARGE_ALLOC_THRESHOLD,
            small_alloc_threshold: SMALL_ALLOC_THRESHOLD,
            standard_buffer_heap_size: STANDARD_BUFFER_HEAP_SIZE,
            standard_image_heap_size: STANDARD_IMAGE_HEAP_SIZE,
            min_buffer_subdivision: MINIMUM_BUFFER_SUBDIV_SIZE,
            min_image_subdivision: MINIMUM_IMAGE_SUBDIV_SIZE,
            slab_classes: SMALL_HEAP_CLASSES
                .iter()
                .map(|&(size, count)| SlabClass::new(size, count))
                .collect(),
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_large_threshold(mut self, bytes: DeviceSize) -> Self {
        self.large_alloc_threshold = bytes;
        self
    }

    pub fn with_small_threshold(mut self, bytes: DeviceSize) -> Self {
        self.small_alloc_threshold = bytes;
        self
    }

    pub fn with_buffer_heap_size(mut self, bytes: DeviceSize) -> Self {
        self.standard_buffer_heap_size = bytes;
        self
    }

    pub fn with_image_heap_size(mut self, bytes: DeviceSize) -> Self {
        self.standard_image_heap_size = bytes;
        self
    }

    pub fn with_buffer_subdivision(mut self, bytes: DeviceSize) -> Self {
        self.min_buffer_subdivision = bytes;
        self
    }

    pub fn with_image_subdivision(mut self, bytes: DeviceSize) -> Self {
        self.min_image_subdivision = bytes;
        self
    }

    pub fn with_slab_classes(mut self, classes: Vec<SlabClass>) -> Self {
        self.slab_classes = classes;
        self
    }

    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `GPU_HEAP_*` environment variables
    ///
    /// Environment variables (byte counts):
    /// - GPU_HEAP_LARGE_ALLOC_THRESHOLD
    /// - GPU_HEAP_SMALL_ALLOC_THRESHOLD
    /// - GPU_HEAP_STANDARD_BUFFER_HEAP_SIZE
    /// - GPU_HEAP_STANDARD_IMAGE_HEAP_SIZE
    /// - GPU_HEAP_MIN_BUFFER_SUBDIV_SIZE
    /// - GPU_HEAP_MIN_IMAGE_SUBDIV_SIZE
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let fields: [(&str, &mut DeviceSize); 6] = [
            ("LARGE_ALLOC_THRESHOLD", &mut config.large_alloc_threshold),
            ("SMALL_ALLOC_THRESHOLD", &mut config.small_alloc_threshold),
            ("STANDARD_BUFFER_HEAP_SIZE", &mut config.standard_buffer_heap_size),
            ("STANDARD_IMAGE_HEAP_SIZE", &mut config.standard_image_heap_size),
            ("MIN_BUFFER_SUBDIV_SIZE", &mut config.min_buffer_subdivision),
            ("MIN_IMAGE_SUBDIV_SIZE", &mut config.min_image_subdivision),
        ];

        for (suffix, field) in fields {
            let var = format!("{}{}", ENV_PREFIX, suffix);
            if let Ok(value) = std::env::var(&var) {
                *field = value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidEnv {
                        var: var.clone(),
                        value: value.clone(),
                    })?;
                debug!(%var, %value, "Configuration override from environment");
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would route a request to a heap that can never hold it
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.small_alloc_threshold >= self.large_alloc_threshold {
            return Err(ConfigError::InvalidThresholds {
                small: self.small_alloc_threshold,
                large: self.large_alloc_threshold,
            });
        }

        for class in &self.slab_classes {
            if class.size == 0 || class.count == 0 || !class.size.is_power_of_two() {
                return Err(ConfigError::InvalidSlabClass {
                    size: class.size,
                    count: class.count,
                });
            }
        }

        let largest = self.slab_classes.iter().map(|c| c.size).max().unwrap_or(0);
        if largest < self.small_alloc_threshold {
            return Err(ConfigError::SlabClassesTooSmall {
                largest,
                small_threshold: self.small_alloc_threshold,
            });
        }

        for heap_size in [self.standard_buffer_heap_size, self.standard_image_heap_size] {
            if heap_size < self.large_alloc_threshold {
                return Err(ConfigError::HeapTooSmall {
                    heap_size,
                    large_threshold: self.large_alloc_threshold,
                });
            }
        }

        for subdivision in [self.min_buffer_subdivision, self.min_image_subdivision] {
            if !subdivision.is_power_of_two() {
                return Err(ConfigError::InvalidSubdivision(subdivision));
            }
        }

        Ok(())
    }
}
