//! Configuration of instance data management.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunable parameters for instance data management and animation bank
/// registration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceDataConfig {
    /// Spatial hash optimization is skipped for primitives with fewer
    /// instances than this.
    pub min_instances_to_optimize: usize,
    /// The edge length of the smallest spatial hash cells.
    pub min_spatial_hash_cell_size: f32,
    /// Whether the platform supports the culling hierarchy that consumes
    /// spatial hash ordered instances. Optimization is skipped otherwise.
    pub culling_hierarchy_supported: bool,
    /// Whether animation bank registrations should resolve to the reference
    /// pose instead of the requested sequence.
    pub force_ref_pose: bool,
    /// Whether bounds of skinned instances come from the bounds sampled over
    /// the animation rather than the mesh bounds.
    pub use_sampled_bounds: bool,
    /// Whether updates of proxies that are visible to consumers are executed
    /// on the task pool rather than on the flushing thread.
    pub async_updates: bool,
}

impl InstanceDataConfig {
    /// Reads the configuration from the RON file at the given path. Missing
    /// fields get their default values.
    pub fn from_ron_file(file_path: impl AsRef<Path>) -> Result<Self> {
        impact_io::parse_ron_file(file_path)
    }

    /// Returns the smallest cell size, clamped to stay positive.
    pub(crate) fn spatial_hash_cell_size(&self) -> f32 {
        self.min_spatial_hash_cell_size.max(1e-6)
    }
}

impl Default for InstanceDataConfig {
    fn default() -> Self {
        Self {
            min_instances_to_optimize: 64,
            min_spatial_hash_cell_size: 1.0,
            culling_hierarchy_supported: true,
            force_ref_pose: false,
            use_sampled_bounds: true,
            async_updates: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_get_defaults() {
        let config: InstanceDataConfig =
            impact_io::parse_ron_str("(min_instances_to_optimize: 8, force_ref_pose: true)").unwrap();

        assert_eq!(config.min_instances_to_optimize, 8);
        assert!(config.force_ref_pose);
        assert_eq!(
            config.min_spatial_hash_cell_size,
            InstanceDataConfig::default().min_spatial_hash_cell_size
        );
        assert!(config.async_updates);
    }

    #[test]
    fn config_is_read_from_ron_file() {
        let file_path = std::env::temp_dir().join("impact_instance_config_test.ron");
        std::fs::write(&file_path, "(async_updates: false, min_spatial_hash_cell_size: 4.0)")
            .unwrap();

        let config = InstanceDataConfig::from_ron_file(&file_path).unwrap();
        std::fs::remove_file(&file_path).unwrap();

        assert!(!config.async_updates);
        assert_eq!(config.min_spatial_hash_cell_size, 4.0);
        assert_eq!(config.min_instances_to_optimize, 64);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        assert!(InstanceDataConfig::from_ron_file("/nonexistent/instance_config.ron").is_err());
    }

    #[test]
    fn nonpositive_cell_size_is_clamped() {
        let config = InstanceDataConfig {
            min_spatial_hash_cell_size: 0.0,
            ..Default::default()
        };
        assert!(config.spatial_hash_cell_size() > 0.0);
    }
}
