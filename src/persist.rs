//! Persistence of the instance ID map and precomputed ordering data.

use crate::{
    id_index_map::{InstanceID, InstanceIDIndexMap},
    spatial_hash::CompressedSpatialHash,
};
use anyhow::{Context, Result, bail};
use impact_containers::BitVector;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Spatial hash ordering computed ahead of time for a primitive.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PrecomputedInstanceData {
    /// Run-length encoded spatial hash cells of the instances in their
    /// ordered sequence.
    pub spatial_hashes: Vec<CompressedSpatialHash>,
    /// The source index of the instance at each ordered index. Empty if the
    /// source instances are already in spatial hash order.
    pub reorder_table: Vec<u32>,
}

/// The persisted state of an
/// [`InstanceDataManager`](crate::manager::InstanceDataManager). Fields are
/// encoded in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedInstanceData {
    /// Empty if the map is in identity mode.
    pub index_to_id: Vec<InstanceID>,
    pub num_instances: u32,
    pub max_instance_id: u32,
    pub precomputed: Option<PrecomputedInstanceData>,
}

impl PersistedInstanceData {
    /// Captures the state of the given ID map.
    ///
    /// # Errors
    /// Returns an error if the instance count or ID space does not fit in 32
    /// bits.
    pub fn from_id_map(
        id_map: &InstanceIDIndexMap,
        precomputed: Option<PrecomputedInstanceData>,
    ) -> Result<Self> {
        Ok(Self {
            index_to_id: id_map.index_to_id_table().to_vec(),
            num_instances: u32::try_from(id_map.max_instance_index())
                .context("Too many instances to persist")?,
            max_instance_id: u32::try_from(id_map.max_instance_id())
                .context("Instance ID space too large to persist")?,
            precomputed,
        })
    }

    /// Encodes the data into bytes.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self).context("Failed to serialize instance data")
    }

    /// Decodes and validates data previously encoded with
    /// [`Self::to_bytes`].
    ///
    /// # Errors
    /// Returns an error if:
    /// - The bytes are not valid encoded instance data.
    /// - The index-to-ID table has the wrong length or repeats an ID.
    /// - The reorder table is not a permutation of the instance indices.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let data: Self =
            postcard::from_bytes(bytes).context("Failed to deserialize instance data")?;
        data.validate()?;
        Ok(data)
    }

    /// Rebuilds the persisted ID map.
    pub fn id_map(&self) -> InstanceIDIndexMap {
        InstanceIDIndexMap::from_index_to_id(
            self.index_to_id.clone(),
            self.num_instances as usize,
            self.max_instance_id as usize,
        )
    }

    /// Serializes the data and saves it at the given path.
    ///
    /// # Errors
    /// Returns an error if the data cannot be serialized or written.
    pub fn save_to_file(&self, output_file_path: impl AsRef<Path>) -> Result<()> {
        impact_io::save_data_as_binary(output_file_path, &self.to_bytes()?)
    }

    /// Loads and validates the data saved at the given path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or does not contain valid
    /// instance data.
    pub fn read_from_file(file_path: impl AsRef<Path>) -> Result<Self> {
        let file_path = file_path.as_ref();
        impact_log::debug!("Reading instance data at {}", file_path.display());
        let bytes = impact_io::read_binary_file(file_path)?;
        Self::from_bytes(&bytes).with_context(|| format!("Invalid data in {}", file_path.display()))
    }

    fn validate(&self) -> Result<()> {
        let num_instances = self.num_instances as usize;

        if !self.index_to_id.is_empty() {
            if self.index_to_id.len() != num_instances {
                bail!(
                    "Index-to-ID table has {} entries for {} instances",
                    self.index_to_id.len(),
                    num_instances
                );
            }
            let mut seen = BitVector::zeroed(self.max_instance_id as usize);
            for id in &self.index_to_id {
                let idx = id.as_u32() as usize;
                if idx >= seen.len() {
                    bail!(
                        "Instance ID {id} exceeds ID space of size {}",
                        self.max_instance_id
                    );
                }
                if seen.set_bit(idx) {
                    bail!("Instance ID {id} occurs more than once");
                }
            }
        }

        if let Some(precomputed) = &self.precomputed {
            let reorder_table = &precomputed.reorder_table;
            if !reorder_table.is_empty() {
                if reorder_table.len() != num_instances {
                    bail!(
                        "Reorder table has {} entries for {} instances",
                        reorder_table.len(),
                        num_instances
                    );
                }
                let mut seen = BitVector::zeroed(num_instances);
                for &index in reorder_table {
                    if index as usize >= num_instances || seen.set_bit(index as usize) {
                        bail!("Reorder table is not a permutation of the instance indices");
                    }
                }
            }
        }

        Ok(())
    }
}
