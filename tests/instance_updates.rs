use approx::assert_abs_diff_eq;
use impact_instance::{
    InstanceDataConfig, InstanceDataFlags, InstanceDataManager, InstanceDataSource, InstanceID,
    InstanceSourceDesc, InstanceTrackingState, InstanceUpdateChangeSet, MaterialUsageFlags,
    geometry::AxisAlignedBox,
};
use impact_thread::TaskPool;
use nalgebra::{Matrix4, Vector3};
use std::{num::NonZeroUsize, sync::Arc};

const NUM_CUSTOM_DATA_FLOATS: usize = 2;

#[derive(Debug, Default)]
struct VecSource {
    transforms: Vec<Matrix4<f32>>,
    custom_data: Vec<f32>,
    editor_data: Vec<u32>,
    flags: InstanceDataFlags,
}

impl VecSource {
    fn with_translations(translations: impl IntoIterator<Item = Vector3<f32>>) -> Self {
        Self {
            transforms: translations
                .into_iter()
                .map(|translation| Matrix4::new_translation(&translation))
                .collect(),
            ..Default::default()
        }
    }

    fn line(num_instances: usize) -> Self {
        Self::with_translations((0..num_instances).map(|i| Vector3::new(i as f32, 0.0, 0.0)))
    }
}

impl InstanceDataSource for VecSource {
    fn source_desc(&self) -> InstanceSourceDesc {
        InstanceSourceDesc {
            num_instances: self.transforms.len(),
            requested_flags: self.flags,
            material_usage: MaterialUsageFlags::all(),
            mesh_bounds: AxisAlignedBox::centered_with_half_extents(Vector3::repeat(0.5)),
            num_custom_data_floats: NUM_CUSTOM_DATA_FLOATS,
            ..Default::default()
        }
    }

    fn build_change_set(&self, change_set: &mut InstanceUpdateChangeSet) {
        change_set.gather_transforms(&self.transforms);
        change_set.gather_custom_data(&self.custom_data);
        change_set.gather_editor_data(&self.editor_data);
    }

    fn instance_transforms(&self) -> &[Matrix4<f32>] {
        &self.transforms
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn manager_tracking(source: &VecSource) -> InstanceDataManager {
    let mut manager = InstanceDataManager::new(InstanceDataConfig::default(), None);
    for index in 0..source.transforms.len() {
        manager.add(index);
    }
    manager
}

fn assert_proxy_mirrors_source(manager: &InstanceDataManager, source: &VecSource) {
    let scene_data = manager.proxy().unwrap().scene_data();
    assert_eq!(scene_data.num_instances(), source.transforms.len());
    for (proxy_transform, source_transform) in scene_data
        .instance_to_world_transforms()
        .iter()
        .zip(&source.transforms)
    {
        assert_abs_diff_eq!(proxy_transform, source_transform, epsilon = 1e-6);
    }
}

#[test]
fn first_flush_builds_proxy_with_all_instances() {
    init_logging();
    let source = VecSource {
        transforms: vec![Matrix4::identity(); 3],
        ..Default::default()
    };
    let mut manager = manager_tracking(&source);
    assert!(manager.id_map().is_identity());

    assert!(manager.flush_changes(&source));

    let proxy = manager.proxy().unwrap();
    assert_eq!(proxy.num_builds(), 1);
    assert_eq!(proxy.num_updates(), 0);
    assert_proxy_mirrors_source(&manager, &source);
    assert_eq!(manager.state(), InstanceTrackingState::Tracked);
}

#[test]
fn changing_one_transform_updates_proxy_incrementally() {
    let mut source = VecSource::line(3);
    let mut manager = manager_tracking(&source);
    manager.flush_changes(&source);

    source.transforms[1] = Matrix4::new_translation(&Vector3::new(5.0, 5.0, 5.0));
    manager.transform_changed(1);
    assert!(manager.flush_changes(&source));

    let proxy = manager.proxy().unwrap();
    assert_eq!(proxy.num_builds(), 1);
    assert_eq!(proxy.num_updates(), 1);
    assert_proxy_mirrors_source(&manager, &source);
}

#[test]
fn inserting_at_front_makes_mapping_explicit() {
    let mut source = VecSource::line(2);
    let mut manager = manager_tracking(&source);
    manager.flush_changes(&source);

    source
        .transforms
        .insert(0, Matrix4::new_translation(&Vector3::new(-1.0, 0.0, 0.0)));
    let new_id = manager.add(0).unwrap();

    let id_map = manager.id_map();
    assert!(!id_map.is_identity());
    assert_eq!(id_map.index_to_id(0), new_id);
    assert_eq!(id_map.index_to_id(1), InstanceID::from_u32(0));
    assert_eq!(id_map.index_to_id(2), InstanceID::from_u32(1));

    assert!(manager.flush_changes(&source));

    let proxy = manager.proxy().unwrap();
    assert_eq!(proxy.num_builds(), 1);
    assert_eq!(proxy.num_updates(), 1);
    assert_proxy_mirrors_source(&manager, &source);
    let scene_data = proxy.scene_data();
    for index in 0..3 {
        assert_eq!(
            scene_data.id_map().index_to_id(index),
            manager.id_map().index_to_id(index)
        );
    }
}

#[test]
fn swap_removal_relocates_last_instance_in_proxy() {
    let mut source = VecSource::line(4);
    let mut manager = manager_tracking(&source);
    manager.flush_changes(&source);

    source.transforms.swap_remove(1);
    manager.remove_at_swap(1);
    assert!(manager.flush_changes(&source));

    let proxy = manager.proxy().unwrap();
    assert_eq!(proxy.num_updates(), 1);
    assert_proxy_mirrors_source(&manager, &source);

    let scene_data = proxy.scene_data();
    assert_eq!(scene_data.id_map().index_to_id(1), InstanceID::from_u32(3));
    assert!(!scene_data.id_map().is_valid_id(InstanceID::from_u32(1)));
}

#[test]
fn custom_and_editor_data_follow_their_changes() {
    let mut source = VecSource {
        flags: InstanceDataFlags::CUSTOM_DATA | InstanceDataFlags::EDITOR_DATA,
        custom_data: vec![0.0; 3 * NUM_CUSTOM_DATA_FLOATS],
        editor_data: vec![0; 3],
        ..VecSource::line(3)
    };
    let mut manager = manager_tracking(&source);
    manager.flush_changes(&source);

    source.custom_data[4..6].copy_from_slice(&[7.0, 8.0]);
    manager.custom_data_changed(2);
    source.editor_data[0] = 1;
    manager.editor_data_changed(0);
    assert!(manager.flush_changes(&source));

    let scene_data = manager.proxy().unwrap().scene_data();
    assert_eq!(scene_data.custom_data(), &source.custom_data[..]);
    assert_eq!(scene_data.editor_data(), &[1, 0, 0]);
}

#[test]
fn attached_proxy_is_updated_on_task_pool() {
    let task_pool = Arc::new(TaskPool::new(NonZeroUsize::new(2).unwrap()).unwrap());
    let mut source = VecSource::line(16);
    let mut manager = InstanceDataManager::new(InstanceDataConfig::default(), Some(task_pool));
    for index in 0..16 {
        manager.add(index);
    }
    manager.flush_changes(&source);
    manager.proxy().unwrap().mark_attached();

    for index in (0..16).step_by(3) {
        source.transforms[index] = Matrix4::new_scaling(2.0);
        manager.transform_changed(index);
    }
    assert!(manager.flush_changes(&source));

    manager.proxy().unwrap().wait_for_update_completion();
    assert_eq!(manager.proxy().unwrap().num_updates(), 1);
    assert_proxy_mirrors_source(&manager, &source);
}

#[test]
fn primitive_transform_is_applied_to_every_instance() {
    let source = VecSource::line(3);
    let mut manager = manager_tracking(&source);
    manager.flush_changes(&source);

    struct MovedSource<'a>(&'a VecSource, Matrix4<f32>);

    impl InstanceDataSource for MovedSource<'_> {
        fn source_desc(&self) -> InstanceSourceDesc {
            InstanceSourceDesc {
                primitive_to_world: self.1,
                ..self.0.source_desc()
            }
        }

        fn build_change_set(&self, change_set: &mut InstanceUpdateChangeSet) {
            self.0.build_change_set(change_set);
        }

        fn instance_transforms(&self) -> &[Matrix4<f32>] {
            self.0.instance_transforms()
        }
    }

    let primitive_to_world = Matrix4::new_translation(&Vector3::new(0.0, 10.0, 0.0));
    manager.primitive_transform_changed();
    assert!(manager.flush_changes(&MovedSource(&source, primitive_to_world)));

    let proxy = manager.proxy().unwrap();
    assert_eq!(proxy.num_builds(), 1);
    let scene_data = proxy.scene_data();
    for (proxy_transform, local_transform) in scene_data
        .instance_to_world_transforms()
        .iter()
        .zip(&source.transforms)
    {
        assert_abs_diff_eq!(
            proxy_transform,
            &(primitive_to_world * local_transform),
            epsilon = 1e-6
        );
    }
}

#[test]
fn proxy_bounds_enclose_all_instances() {
    let source = VecSource::line(4);
    let mut manager = manager_tracking(&source);
    manager.flush_changes(&source);

    let bounds = manager.proxy().unwrap().compute_bounds().unwrap();
    assert_abs_diff_eq!(
        bounds,
        AxisAlignedBox::new([-0.5, -0.5, -0.5].into(), [3.5, 0.5, 0.5].into()),
        epsilon = 1e-6
    );
}
