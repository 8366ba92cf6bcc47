//! Management of per-instance data for rendered primitives.
//!
//! A primitive source owns an array of instances and edits it freely. An
//! [`InstanceDataManager`] records every edit, maintains stable
//! [`InstanceID`]s for the instances, and turns the recorded edits into
//! [`InstanceUpdateChangeSet`]s that carry only the data that changed. The
//! change sets are applied to an [`InstanceDataSceneProxy`], which holds the
//! render-side copy of the instance data, either inline or on a task pool.

pub mod anim_bank;
pub mod change_set;
pub mod config;
pub mod delta;
pub mod flags;
pub mod geometry;
pub mod id_index_map;
pub mod manager;
pub mod persist;
pub mod proxy;
pub mod remap;
pub mod scatter_gather;
pub mod source;
pub mod spatial_hash;
pub mod tracker;
pub mod transform;

pub use anim_bank::{AnimBankDesc, AnimBankRecord, AnimBankRecordHandle, AnimBankRecordMap};
pub use change_set::{AttributeDeltas, IdMapUpdate, InstanceUpdateChangeSet};
pub use config::InstanceDataConfig;
pub use delta::DeltaRange;
pub use flags::{InstanceDataFlags, MaterialUsageFlags};
pub use id_index_map::{InstanceID, InstanceIDIndexMap};
pub use manager::{InstanceDataManager, InstanceTrackingState};
pub use persist::{PersistedInstanceData, PrecomputedInstanceData};
pub use proxy::{InstanceDataSceneProxy, InstanceSceneData};
pub use source::{InstanceDataSource, InstanceSourceDesc};
