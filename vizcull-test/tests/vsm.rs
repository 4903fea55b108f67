use glam::{Mat4, Vec3};
use vizcull_routine::vsm::{get_vsm_projections, VSM_NDC_PAGE_SIZE};
use vizcull_test::TestRunner;
use vizcull_types::{AlphaMode, Camera, CameraProjection, VsmSettings, VSM_CLIP_LEVELS};

#[test]
pub fn clip_counts_grow_with_the_clip() -> anyhow::Result<()> {
    let mut runner = TestRunner::builder().modify_settings(|s| s.vsm.enable = true).build()?;
    runner.camera = Camera::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, CameraProjection::default());
    let material = runner.add_material(AlphaMode::Opaque);
    runner.plane(material, Mat4::from_scale(Vec3::splat(10.0)))?;
    runner.cube(material, Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0)))?;
    // Far from the camera, only the coarse clips reach it
    runner.cube(material, Mat4::from_translation(Vec3::new(400.0, 0.0, 0.0)))?;

    let output = runner.render_frame()?;
    let counts = output.vsm_meshlet_counts.ok_or_else(|| anyhow::anyhow!("no shadow counts"))?;

    assert!(counts[0] >= 1, "{counts:?}");
    assert!(counts[0] < 3, "{counts:?}");
    assert_eq!(counts[VSM_CLIP_LEVELS - 1], 3, "{counts:?}");
    assert!(counts.windows(2).all(|w| w[0] <= w[1]), "{counts:?}");

    // Shadow culling leaves the main view alone
    assert_eq!(output.readback.visible_meshlets, 1);

    Ok(())
}

#[test]
pub fn clips_snap_to_whole_pages() {
    let settings = VsmSettings::default();
    let sun = settings.sun_direction.normalize();
    let light_view = Mat4::look_to_rh(Vec3::ZERO, -sun, Vec3::Z);

    let projections = get_vsm_projections(Vec3::new(3.0, -2.0, 1.0), sun, &settings);
    for (clip, projection) in projections.iter().enumerate() {
        let page = VSM_NDC_PAGE_SIZE * settings.clip_0_scale * (1u32 << clip) as f32;

        // The eye sits on the page grid, at the height offset above the origin
        let eye = projection.view.inverse().w_axis.truncate();
        let eye_light = light_view.transform_point3(eye);
        let expected = -projection.page_offset.as_vec2() * page;
        assert!((eye_light.x - expected.x).abs() <= page * 1.0e-3, "clip {clip}: {eye_light}");
        assert!((eye_light.y - expected.y).abs() <= page * 1.0e-3, "clip {clip}: {eye_light}");
        let height = projection.height_offset as f32;
        assert!(
            (eye_light.z - height).abs() <= (height.abs() * 1.0e-5).max(1.0e-2),
            "clip {clip}: {eye_light}"
        );
    }

    // Moving within a page keeps every clip where it was
    let nudged = get_vsm_projections(Vec3::new(3.0001, -2.0, 1.0), sun, &settings);
    let moved = projections
        .iter()
        .zip(&nudged)
        .filter(|(a, b)| a.page_offset != b.page_offset)
        .count();
    assert!(moved <= 1, "{moved} clips moved");
}
