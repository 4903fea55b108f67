use vizcull_routine::expansion::WorkExpansion;
use vizcull_test::TestRunner;
use vizcull_types::{AlphaMode, ReadbackValues};

/// 105 disjoint triangles make exactly five meshlets.
const FIVE_MESHLETS: u32 = 105;

#[test]
pub fn visible_meshlets_move_to_the_first_pass() -> anyhow::Result<()> {
    let mut runner = TestRunner::builder().build()?;
    let material = runner.add_material(AlphaMode::Opaque);
    runner.triangle_grid(material, FIVE_MESHLETS, 0.5)?;

    let first = runner.render_frame()?;
    assert_eq!(
        first.readback,
        ReadbackValues {
            first_pass_meshlet_count: [0, 0],
            second_pass_meshlet_count: [5, 0],
            visible_meshlets: 5,
            visible_meshes: 1,
        }
    );

    // 5 = 4 + 1
    let [opaque, masked] = runner.routine.work_expansions();
    let WorkExpansion::Po2Packed(opaque) = opaque else {
        panic!("expected the power of two expansion");
    };
    assert_eq!(opaque.bucket_len(0), 1);
    assert_eq!(opaque.bucket_len(2), 1);
    assert_eq!(opaque.total_meshlets(), 5);
    assert_eq!(masked.total_meshlets(), 0);

    let second = runner.render_frame()?;
    assert_eq!(second.readback.first_pass_meshlet_count, [5, 0]);
    assert_eq!(second.readback.second_pass_meshlet_count, [0, 0]);
    assert_eq!(second.readback.visible_meshlets, 5);

    let instances = runner.routine.meshlet_instances();
    let mut meshlets: Vec<u32> = instances.read().iter().map(|i| i.meshlet_index).collect();
    meshlets.sort_unstable();
    assert_eq!(meshlets, vec![0, 1, 2, 3, 4]);
    assert_eq!(runner.routine.frame_index(), 2);

    Ok(())
}

#[test]
pub fn masked_materials_use_their_own_list() -> anyhow::Result<()> {
    let mut runner = TestRunner::builder().build()?;
    let masked = runner.add_material(AlphaMode::Masked);
    runner.triangle_grid(masked, 21, 0.5)?;

    let first = runner.render_frame()?;
    assert_eq!(first.readback.second_pass_meshlet_count, [0, 1]);
    assert_eq!(first.readback.visible_meshlets, 1);

    let second = runner.render_frame()?;
    assert_eq!(second.readback.first_pass_meshlet_count, [0, 1]);
    assert_eq!(second.readback.second_pass_meshlet_count, [0, 0]);

    Ok(())
}

#[test]
pub fn prefix_sum_expansion_matches_po2() -> anyhow::Result<()> {
    let mut readbacks = Vec::new();
    for prefix_sum in [false, true] {
        let mut runner = TestRunner::builder()
            .modify_settings(|s| s.enable_prefix_sum_work_expansion = prefix_sum)
            .build()?;
        let material = runner.add_material(AlphaMode::Opaque);
        runner.triangle_grid(material, FIVE_MESHLETS, 0.5)?;
        runner.triangle_grid(material, 21, 0.25)?;

        let frames = runner.render_frames(2)?;
        if let WorkExpansion::PrefixSum(expansion) = &runner.routine.work_expansions()[0] {
            assert!(prefix_sum);
            assert_eq!(expansion.len(), 2);
            assert_eq!(expansion.total_meshlets(), 6);
        }
        readbacks.push(frames.into_iter().map(|f| f.readback).collect::<Vec<_>>());
    }

    assert_eq!(readbacks[0], readbacks[1]);
    assert_eq!(readbacks[0][0].second_pass_meshlet_count, [6, 0]);

    Ok(())
}

#[test]
pub fn full_instance_list_drops_meshlets() -> anyhow::Result<()> {
    let mut runner = TestRunner::builder().limits(16, 3).build()?;
    let material = runner.add_material(AlphaMode::Opaque);
    runner.triangle_grid(material, FIVE_MESHLETS, 0.5)?;

    let first = runner.render_frame()?;
    assert_eq!(first.readback.second_pass_meshlet_count, [3, 0]);
    assert_eq!(first.readback.visible_meshlets, 3);

    // The first pass fills the list, nothing fits behind it
    let second = runner.render_frame()?;
    assert_eq!(second.readback.first_pass_meshlet_count, [3, 0]);
    assert_eq!(second.readback.second_pass_meshlet_count, [0, 0]);
    assert_eq!(runner.routine.meshlet_instances().len(), 3);

    Ok(())
}

#[test]
pub fn mesh_instances_past_the_limit_are_dropped() -> anyhow::Result<()> {
    let mut runner = TestRunner::builder().limits(2, 64).build()?;
    let material = runner.add_material(AlphaMode::Opaque);
    for depth in [0.2, 0.4, 0.6] {
        runner.triangle_grid(material, 21, depth)?;
    }

    let frame = runner.render_frame()?;
    assert_eq!(frame.readback.second_pass_meshlet_count, [2, 0]);
    // Both grids cover the same pixels, the nearer one wins everywhere
    assert_eq!(frame.readback.visible_meshes, 1);

    Ok(())
}

#[test]
pub fn disabling_culling_draws_everything() -> anyhow::Result<()> {
    let mut runner = TestRunner::builder()
        .modify_settings(|s| s.cull_meshes = false)
        .build()?;
    let material = runner.add_material(AlphaMode::Opaque);
    runner.triangle_grid(material, 21, 0.5)?;
    // Entirely off screen
    let off_screen = runner.triangle_grid(material, 21, 0.5)?;
    runner
        .scene
        .set_transform(off_screen, glam::Mat4::from_translation(glam::Vec3::new(10.0, 0.0, 0.0)));

    let frame = runner.render_frame()?;
    assert_eq!(frame.readback.second_pass_meshlet_count, [2, 0]);
    assert_eq!(frame.readback.visible_meshlets, 1);

    Ok(())
}
