use std::sync::Arc;

use glam::UVec2;
use vizcull::{
    device::{Device, DeviceStatistics},
    format_sso,
    graph::{BufferHandle, DataHandle, GraphStatistics, ImageHandle, NodeResourceUsage, RenderGraph},
    image::{AtomicVisbuffer, FloatImage, UintImage},
    scene::GpuScene,
    Renderer,
};
use vizcull_types::{Camera, DispatchIndirectStruct, DrawPass, ReadbackValues, RenderSettings, VSM_CLIP_LEVELS};

use crate::{
    analyze::VisibilityAnalysis,
    culling::{cull_meshes, cull_meshlets, CameraInfo, CullData, CullMeshesArgs, CullMeshletsArgs, CullView, OcclusionView},
    expansion::WorkExpansion,
    hi_z::{create_hiz, HiZRoutine},
    meshlet_instances::{MeshletInstanceLists, MeshletInstancesBuffer},
    prepopulate::{self, FirstPassBitfield, PrepopulateArgs},
    raster::RasterTarget,
    readback::Readback,
    visbuffer::{draw_pass, split_atomic_visbuffer, DrawPassArgs, VisbufferTargets},
    vsm::{get_vsm_projections, VsmClipCuller, VsmClipProjection},
};

type MeshletExpansions = [WorkExpansion; 2];

/// What a frame did.
#[derive(Debug, Clone)]
pub struct FrameOutput {
    pub graph: GraphStatistics,
    pub device: DeviceStatistics,
    pub readback: ReadbackValues,
    /// Meshlets surviving each shadow clip level, with shadows enabled.
    pub vsm_meshlet_counts: Option<[u32; VSM_CLIP_LEVELS]>,
}

/// Settings that size or select the persistent buffers.
#[derive(Debug, Copy, Clone, PartialEq)]
struct ResourceKey {
    render_target_size: UVec2,
    max_mesh_instances: u32,
    max_meshlet_instances: u32,
    atomic_visbuffer: bool,
    prefix_sum_expansion: bool,
}

impl ResourceKey {
    fn new(settings: &RenderSettings) -> Self {
        Self {
            render_target_size: settings.render_target_size,
            max_mesh_instances: settings.limits.max_mesh_instances,
            max_meshlet_instances: settings.limits.max_meshlet_instances,
            atomic_visbuffer: settings.enable_atomic_visbuffer,
            prefix_sum_expansion: settings.enable_prefix_sum_work_expansion,
        }
    }
}

/// Every buffer that lives across frames.
struct PersistentResources {
    key: ResourceKey,
    cull_data: CullData,
    expansions: MeshletExpansions,
    lists: MeshletInstanceLists,
    first_pass: FirstPassBitfield,
    analysis: VisibilityAnalysis,
    targets: VisbufferTargets,
    hiz: FloatImage,
    last_frame_hiz: FloatImage,
    vsm: VsmClipCuller,
}

impl PersistentResources {
    fn new(key: ResourceKey) -> Self {
        profiling::scope!("PersistentResources::new");

        let cull_data = CullData::new(key.render_target_size);
        log::debug!(
            "Creating visbuffer resources: {} target, HiZ {} with {} mips, {} mesh instances, {} meshlet instances",
            key.render_target_size,
            cull_data.physical_hiz_size,
            cull_data.mip_count,
            key.max_mesh_instances,
            key.max_meshlet_instances
        );

        Self {
            key,
            cull_data,
            expansions: [
                WorkExpansion::new(key.prefix_sum_expansion, key.max_mesh_instances),
                WorkExpansion::new(key.prefix_sum_expansion, key.max_mesh_instances),
            ],
            lists: MeshletInstanceLists::new(key.max_meshlet_instances),
            first_pass: FirstPassBitfield::new(key.max_mesh_instances, key.max_meshlet_instances),
            analysis: VisibilityAnalysis::new(key.max_mesh_instances, key.max_meshlet_instances),
            targets: VisbufferTargets::new(key.render_target_size, key.atomic_visbuffer),
            hiz: create_hiz("hiz", &cull_data),
            last_frame_hiz: create_hiz("last frame hiz", &cull_data),
            vsm: VsmClipCuller::new(key.prefix_sum_expansion, key.max_mesh_instances),
        }
    }
}

/// Handles to the visibility buffer images inside a graph.
#[derive(Clone, Copy)]
struct TargetHandles {
    depth: ImageHandle<FloatImage>,
    visbuffer: ImageHandle<UintImage>,
    atomic: Option<ImageHandle<AtomicVisbuffer>>,
}

/// Drives a whole frame of two pass visibility buffer culling.
pub struct VisbufferRoutine {
    renderer: Arc<Renderer>,
    settings: RenderSettings,
    resources: PersistentResources,
    hi_z: HiZRoutine,
    readback: Readback,
    previous_camera: Option<Camera>,
    frame_index: u64,
}

impl VisbufferRoutine {
    pub fn new(renderer: &Arc<Renderer>) -> Self {
        profiling::scope!("VisbufferRoutine::new");

        let settings = renderer.settings();
        Self {
            renderer: Arc::clone(renderer),
            resources: PersistentResources::new(ResourceKey::new(&settings)),
            settings,
            hi_z: HiZRoutine::new(),
            readback: Readback::new(),
            previous_camera: None,
            frame_index: 0,
        }
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn targets(&self) -> &VisbufferTargets {
        &self.resources.targets
    }

    pub fn meshlet_instances(&self) -> &MeshletInstancesBuffer {
        &self.resources.lists.current
    }

    pub fn last_frame_meshlet_instances(&self) -> &MeshletInstancesBuffer {
        &self.resources.lists.last_frame
    }

    pub fn analysis(&self) -> &VisibilityAnalysis {
        &self.resources.analysis
    }

    /// Expansions of the last frame, indexed by draw list.
    pub fn work_expansions(&self) -> &[WorkExpansion; 2] {
        &self.resources.expansions
    }

    pub fn first_pass_bitfield(&self) -> &FirstPassBitfield {
        &self.resources.first_pass
    }

    /// HiZ pyramid built from this frame's first pass.
    pub fn hiz(&self) -> &FloatImage {
        &self.resources.hiz
    }

    pub fn cull_data(&self) -> CullData {
        self.resources.cull_data
    }

    /// Counters of the last finished frame.
    pub fn readback(&self) -> ReadbackValues {
        self.readback.latest()
    }

    /// Forgets everything carried between frames.
    pub fn reset_history(&mut self) {
        self.resources = PersistentResources::new(self.resources.key);
        self.previous_camera = None;
    }

    fn begin_frame(&mut self) {
        let settings = self.renderer.settings();
        let key = ResourceKey::new(&settings);
        if key != self.resources.key {
            log::debug!("Render settings changed buffer sizes, recreating visbuffer resources");
            self.resources = PersistentResources::new(key);
            self.previous_camera = None;
        }
        self.settings = settings;

        self.resources.lists.swap();
        std::mem::swap(&mut self.resources.hiz, &mut self.resources.last_frame_hiz);
    }

    /// Renders and culls `scene` from `camera`.
    pub fn render_frame(&mut self, scene: &GpuScene, camera: &Camera) -> FrameOutput {
        profiling::scope!("VisbufferRoutine::render_frame");

        self.begin_frame();
        let device = &self.renderer.device;
        device.reset_statistics();

        let settings = self.settings;
        let camera_info = CameraInfo::new(camera, self.previous_camera.as_ref(), settings.aspect_ratio());
        let vsm_projections = settings
            .vsm
            .enable
            .then(|| get_vsm_projections(camera_info.position, settings.vsm.sun_direction, &settings.vsm));

        let mut graph = RenderGraph::new();
        self.add_to_graph(&mut graph, scene, &camera_info, vsm_projections.as_ref());
        let graph_statistics = graph.execute(device);

        let output = FrameOutput {
            graph: graph_statistics,
            device: device.statistics(),
            readback: self.readback.latest(),
            vsm_meshlet_counts: vsm_projections.map(|_| self.resources.vsm.meshlet_counts()),
        };
        log::debug!(
            "Frame {}: {} nodes, {} dispatches, drew {} + {} meshlets, {} visible",
            self.frame_index,
            output.graph.executed.len(),
            output.device.dispatches,
            output.readback.first_pass_meshlet_count.iter().sum::<u32>(),
            output.readback.second_pass_meshlet_count.iter().sum::<u32>(),
            output.readback.visible_meshlets
        );

        self.previous_camera = Some(*camera);
        self.frame_index += 1;
        output
    }

    /// Records every node of a frame into `graph`.
    pub fn add_to_graph<'node>(
        &'node self,
        graph: &mut RenderGraph<'node>,
        scene: &'node GpuScene,
        camera: &CameraInfo,
        vsm_projections: Option<&'node [VsmClipProjection; VSM_CLIP_LEVELS]>,
    ) {
        let settings = self.settings;
        let res = &self.resources;
        let camera = *camera;

        let expansions = graph.add_imported_buffer("work expansions", &res.expansions);
        let current = graph.add_imported_buffer("meshlet instances", &*res.lists.current);
        let last_frame = graph.add_imported_buffer("last frame meshlet instances", &*res.lists.last_frame);
        let first_pass = graph.add_imported_buffer("first pass bitfield", &res.first_pass);
        let analysis = graph.add_imported_buffer("visibility analysis", &res.analysis);
        let targets = TargetHandles {
            depth: graph.add_imported_image("depth", &res.targets.depth),
            visbuffer: graph.add_imported_image("visbuffer", &res.targets.visbuffer),
            atomic: res
                .targets
                .atomic
                .as_ref()
                .map(|atomic| graph.add_imported_image("atomic visbuffer", atomic)),
        };
        let hiz = graph.add_imported_image("hiz", &res.hiz);
        let last_frame_hiz = graph.add_imported_image("last frame hiz", &res.last_frame_hiz);
        let camera_handle = graph.add_data::<CameraInfo, _>("camera");

        let mut node = graph.add_node("Upload Camera");
        let camera_dep = node.add_data(camera_handle, NodeResourceUsage::Output);
        node.build(move |ctx| ctx.graph_data.set_data(camera_dep, Some(camera)));

        let mut node = graph.add_node("Clear Meshlet Instances");
        let current_dep = node.add_buffer(current, NodeResourceUsage::Output);
        node.build(move |ctx| ctx.graph_data.get_buffer(current_dep).clear());

        add_prepopulate_to_graph(graph, scene, current, last_frame, first_pass, analysis);

        let mut node = graph.add_node("Clear Visbuffer");
        let depth_dep = node.add_image(targets.depth, NodeResourceUsage::Output);
        let visbuffer_dep = node.add_image(targets.visbuffer, NodeResourceUsage::Output);
        let atomic_dep = node.add_optional_image(targets.atomic, NodeResourceUsage::Output);
        node.build(move |ctx| {
            profiling::scope!("clear visbuffer");
            ctx.graph_data.get_image(depth_dep).clear(0.0);
            ctx.graph_data.get_image(visbuffer_dep).clear(vizcull_types::INVALID_TRIANGLE_ID);
            if let Some(atomic_dep) = atomic_dep {
                ctx.graph_data
                    .get_image(atomic_dep)
                    .clear(VisbufferTargets::atomic_clear_value());
            }
        });

        add_draw_to_graph(graph, scene, &settings, camera_handle, current, targets, DrawPass::VisibleLastFrame);

        self.hi_z.add_hi_z_to_graph(graph, targets.depth, hiz);

        let mut node = graph.add_node("Clear Work Expansion");
        let expansions_dep = node.add_buffer(expansions, NodeResourceUsage::Output);
        node.build(move |ctx| {
            for expansion in ctx.graph_data.get_buffer(expansions_dep) {
                expansion.clear(DispatchIndirectStruct::CLEAR);
            }
        });

        // Against last frame, occlusion uses last frame's pyramid, camera and transforms
        let against_last_frame = settings.cull_against_last_frame;
        let occlusion_hiz = if against_last_frame { last_frame_hiz } else { hiz };
        let cull_data = res.cull_data;

        let mut node = graph.add_node("Expand Meshes To Meshlets");
        let expansions_dep = node.add_buffer(expansions, NodeResourceUsage::InputOutput);
        let hiz_dep = node.add_image(occlusion_hiz, NodeResourceUsage::Input);
        let camera_dep = node.add_data(camera_handle, NodeResourceUsage::Input);
        node.build(move |ctx| {
            let Some(camera) = ctx.graph_data.get_data(camera_dep).map(|camera| *camera) else {
                return;
            };
            let view = CullView {
                frustum: camera.frustum,
                occlusion: Some(OcclusionView {
                    hiz: ctx.graph_data.get_image(hiz_dep),
                    cull_data,
                    view_proj: camera.occlusion_view_proj(against_last_frame),
                    previous_transforms: against_last_frame,
                }),
            };
            let [opaque, masked] = ctx.graph_data.get_buffer(expansions_dep);
            cull_meshes(
                ctx.device,
                ctx.label,
                CullMeshesArgs {
                    scene,
                    view: &view,
                    cull_meshes: settings.cull_meshes,
                    max_mesh_instances: settings.limits.max_mesh_instances,
                    expansions: [opaque, masked],
                },
            );
        });

        let mut node = graph.add_node("Cull Meshlets");
        let expansions_dep = node.add_buffer(expansions, NodeResourceUsage::Input);
        let first_pass_dep = node.add_buffer(first_pass, NodeResourceUsage::Input);
        let hiz_dep = node.add_image(occlusion_hiz, NodeResourceUsage::Input);
        let current_dep = node.add_buffer(current, NodeResourceUsage::InputOutput);
        let camera_dep = node.add_data(camera_handle, NodeResourceUsage::Input);
        node.build(move |ctx| {
            let Some(camera) = ctx.graph_data.get_data(camera_dep).map(|camera| *camera) else {
                return;
            };
            let view = CullView {
                frustum: camera.frustum,
                occlusion: Some(OcclusionView {
                    hiz: ctx.graph_data.get_image(hiz_dep),
                    cull_data,
                    view_proj: camera.occlusion_view_proj(against_last_frame),
                    previous_transforms: against_last_frame,
                }),
            };
            let [opaque, masked] = ctx.graph_data.get_buffer(expansions_dep);
            cull_meshlets(
                ctx.device,
                ctx.label,
                CullMeshletsArgs {
                    scene,
                    view: &view,
                    cull_meshlets: settings.cull_meshes,
                    expansions: [opaque, masked],
                    first_pass: ctx.graph_data.get_buffer(first_pass_dep),
                    instances: ctx.graph_data.get_buffer(current_dep),
                },
            );
        });

        add_draw_to_graph(graph, scene, &settings, camera_handle, current, targets, DrawPass::PostCull);

        if let Some(projections) = vsm_projections {
            res.vsm
                .add_vsm_culling_to_graph(graph, scene, projections, settings.limits.max_mesh_instances);
        }

        let mut node = graph.add_node("Analyze Visbuffer");
        let visbuffer_dep = node.add_image(targets.visbuffer, NodeResourceUsage::Input);
        let current_dep = node.add_buffer(current, NodeResourceUsage::Input);
        let analysis_dep = node.add_buffer(analysis, NodeResourceUsage::Output);
        node.build(move |ctx| {
            ctx.graph_data.get_buffer(analysis_dep).analyze(
                ctx.device,
                ctx.graph_data.get_image(visbuffer_dep),
                ctx.graph_data.get_buffer(current_dep),
            );
        });

        self.readback.add_readback_to_graph(graph, current, analysis);
    }
}

fn add_prepopulate_to_graph<'node>(
    graph: &mut RenderGraph<'node>,
    scene: &'node GpuScene,
    current: BufferHandle<MeshletInstancesBuffer>,
    last_frame: BufferHandle<MeshletInstancesBuffer>,
    first_pass: BufferHandle<FirstPassBitfield>,
    analysis: BufferHandle<VisibilityAnalysis>,
) {
    type Stage = fn(&Device, &PrepopulateArgs<'_>);
    let stages: [(&str, Stage); 3] = [
        ("Prepopulate Mark", prepopulate::mark),
        ("Prepopulate Allocate", prepopulate::allocate),
        ("Prepopulate Populate", prepopulate::populate),
    ];

    for (label, stage) in stages {
        let mut node = graph.add_node(label);
        let analysis_dep = node.add_buffer(analysis, NodeResourceUsage::Input);
        let last_frame_dep = node.add_buffer(last_frame, NodeResourceUsage::Input);
        let first_pass_dep = node.add_buffer(first_pass, NodeResourceUsage::InputOutput);
        let current_dep = node.add_buffer(current, NodeResourceUsage::InputOutput);
        node.build(move |ctx| {
            let args = PrepopulateArgs {
                scene,
                visible: &ctx.graph_data.get_buffer(analysis_dep).visible_meshlets,
                last_frame: ctx.graph_data.get_buffer(last_frame_dep),
                current: ctx.graph_data.get_buffer(current_dep),
                bitfield: ctx.graph_data.get_buffer(first_pass_dep),
            };
            stage(ctx.device, &args);
        });
    }
}

fn add_draw_to_graph<'node>(
    graph: &mut RenderGraph<'node>,
    scene: &'node GpuScene,
    settings: &RenderSettings,
    camera: DataHandle<CameraInfo>,
    instances: BufferHandle<MeshletInstancesBuffer>,
    targets: TargetHandles,
    pass: DrawPass,
) {
    let pass_number = pass.index();
    let cull_backfaces = settings.enable_mesh_shader;

    let mut node = graph.add_node(format_sso!("Draw Visbuffer Pass {pass_number}"));
    let instances_dep = node.add_buffer(instances, NodeResourceUsage::Input);
    let camera_dep = node.add_data(camera, NodeResourceUsage::Input);
    let ordered = match targets.atomic {
        Some(_) => None,
        None => Some((
            node.add_image(targets.depth, NodeResourceUsage::InputOutput),
            node.add_image(targets.visbuffer, NodeResourceUsage::InputOutput),
        )),
    };
    let atomic_dep = node.add_optional_image(targets.atomic, NodeResourceUsage::InputOutput);
    node.build(move |ctx| {
        let Some(view_proj) = ctx.graph_data.get_data(camera_dep).map(|camera| camera.view_proj) else {
            return;
        };
        let target = match (ordered, atomic_dep) {
            (_, Some(atomic)) => RasterTarget::Atomic(ctx.graph_data.get_image(atomic)),
            (Some((depth, visbuffer)), None) => RasterTarget::Ordered {
                depth: ctx.graph_data.get_image(depth),
                visbuffer: ctx.graph_data.get_image(visbuffer),
            },
            (None, None) => return,
        };
        draw_pass(
            ctx.device,
            ctx.label,
            target,
            DrawPassArgs {
                scene,
                instances: ctx.graph_data.get_buffer(instances_dep),
                pass,
                view_proj,
                cull_backfaces,
            },
        );
    });

    let Some(atomic) = targets.atomic else {
        return;
    };
    let mut node = graph.add_node(format_sso!("Split Atomic Visbuffer Pass {pass_number}"));
    let atomic_dep = node.add_image(atomic, NodeResourceUsage::Input);
    let depth_dep = node.add_image(targets.depth, NodeResourceUsage::Output);
    let visbuffer_dep = node.add_image(targets.visbuffer, NodeResourceUsage::Output);
    node.build(move |ctx| {
        split_atomic_visbuffer(
            ctx.device,
            ctx.label,
            ctx.graph_data.get_image(atomic_dep),
            ctx.graph_data.get_image(depth_dep),
            ctx.graph_data.get_image(visbuffer_dep),
        );
    });
}
