//! Load-time assembly of the ray traced scene and the per-frame entry point.
//!
//! [`Renderer::load`] runs the full setup in order: bottom level structures, the top level structure, a flush so
//! both are built, the pipeline state with its root signatures, the output image and descriptor heap, the instance
//! constant buffers and finally the shader binding table. After that, [`Renderer::render_frame`] only refits the top
//! level structure and dispatches.

use anyhow::{ensure, Result};
use ash::vk;

use crate::allocator::traits::Allocator;
use crate::core::app_info::AppSettings;
use crate::core::context::GraphicsContext;
use crate::core::device::{Device, ResourceState};
use crate::core::error::Error;
use crate::pipeline::raytracing::{HitGroup, PipelineState, RayTracingPipelineBuilder, ShaderConfig};
use crate::pipeline::root_signature::{DescriptorRange, DescriptorRangeType, RootParameter, RootSignature, RootSignatureDesc};
use crate::pipeline::shader::{ShaderCompiler, ShaderExport, ShaderLibrary, ShaderStage};
use crate::pipeline::shader_binding_table::{RootArgument, ShaderBindingTable, ShaderBindingTableBuilder};
use crate::pipeline::topology::ShaderTableTopology;
use crate::resource::descriptor_heap::{DescriptorHeap, DescriptorView};
use crate::resource::image::{Image, ImageCreateInfo};
use crate::resource::raytracing::{build_bottom_level, BottomLevelStructure, TopLevelStructure};
use crate::scene::{self, Scene, TriVertex};
use crate::wsi::frame::{FrameDispatcher, FrameResources};
use crate::wsi::swapchain::Swapchain;

/// Ray generation export
pub const RAY_GEN_SHADER: &str = "rayGen";
/// Miss export for primary rays
pub const MISS_SHADER: &str = "miss";
/// Closest hit export for the triangles
pub const CLOSEST_HIT_SHADER: &str = "chs";
/// Closest hit export for the plane
pub const PLANE_CLOSEST_HIT_SHADER: &str = "planeChs";
/// Closest hit export for shadow rays
pub const SHADOW_CLOSEST_HIT_SHADER: &str = "shadowChs";
/// Miss export for shadow rays
pub const SHADOW_MISS_SHADER: &str = "shadowMiss";
/// Hit group of the triangles
pub const HIT_GROUP: &str = "HitGroup";
/// Hit group of the plane
pub const PLANE_HIT_GROUP: &str = "PlaneHitGroup";
/// Hit group for shadow rays
pub const SHADOW_HIT_GROUP: &str = "ShadowHitGroup";

/// Ray types traced by the shaders: primary and shadow.
pub const RAY_TYPE_COUNT: u32 = 2;

/// Descriptor heap slot of the output image
pub const OUTPUT_SLOT: u32 = 0;
/// Descriptor heap slot of the top level structure
pub const TLAS_SLOT: u32 = 1;
/// Descriptor heap slot of the triangle vertex buffer
pub const VERTEX_BUFFER_SLOT: u32 = 2;
const DESCRIPTOR_COUNT: u32 = 3;

/// Format of the ray traced output image
pub const OUTPUT_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// All exports of the shader library
pub fn shader_exports() -> Vec<ShaderExport> {
    vec![
        ShaderExport::new(RAY_GEN_SHADER, ShaderStage::RayGeneration),
        ShaderExport::new(MISS_SHADER, ShaderStage::Miss),
        ShaderExport::new(CLOSEST_HIT_SHADER, ShaderStage::ClosestHit),
        ShaderExport::new(PLANE_CLOSEST_HIT_SHADER, ShaderStage::ClosestHit),
        ShaderExport::new(SHADOW_CLOSEST_HIT_SHADER, ShaderStage::ClosestHit),
        ShaderExport::new(SHADOW_MISS_SHADER, ShaderStage::Miss),
    ]
}

/// Root signatures used by the pipeline. They must outlive it.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct RootSignatures<D: Device> {
    /// Output image and scene, as one descriptor table
    pub ray_gen: RootSignature<D>,
    /// Instance constants and vertex buffer
    pub hit: RootSignature<D>,
    /// Scene, for shadow rays from the plane
    pub plane_hit: RootSignature<D>,
    /// Programs without resources
    pub empty: RootSignature<D>,
    /// Global root signature, empty
    pub global: RootSignature<D>,
}

impl<D: Device> RootSignatures<D> {
    /// Serialize and create all root signatures.
    pub fn new(device: &D) -> Result<Self> {
        Ok(Self {
            ray_gen: RootSignature::new(
                device,
                RootSignatureDesc::local().descriptor_table([
                    DescriptorRange::new(DescriptorRangeType::Uav, 0, 1, OUTPUT_SLOT),
                    DescriptorRange::new(DescriptorRangeType::Srv, 0, 1, TLAS_SLOT),
                ]),
            )?,
            hit: RootSignature::new(
                device,
                RootSignatureDesc::local()
                    .parameter(RootParameter::cbv(0))
                    .descriptor_table([DescriptorRange::new(DescriptorRangeType::Srv, 1, 1, 0)]),
            )?,
            plane_hit: RootSignature::new(
                device,
                RootSignatureDesc::local().descriptor_table([DescriptorRange::new(DescriptorRangeType::Srv, 0, 1, 0)]),
            )?,
            empty: RootSignature::new(device, RootSignatureDesc::local())?,
            global: RootSignature::new(device, RootSignatureDesc::global())?,
        })
    }
}

/// Owns everything needed to render the scene.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct Renderer<D: Device, A: Allocator, S: Swapchain> {
    settings: AppSettings,
    dispatcher: FrameDispatcher,
    sbt: ShaderBindingTable<A>,
    heap: DescriptorHeap<D>,
    output: Image<A>,
    pipeline: PipelineState<D>,
    root_signatures: RootSignatures<D>,
    topology: ShaderTableTopology,
    tlas: TopLevelStructure<A>,
    blases: Vec<BottomLevelStructure<A>>,
    scene: Scene<A>,
    #[derivative(Debug = "ignore")]
    swapchain: S,
    ctx: GraphicsContext<D, A>,
}

impl<D: Device, A: Allocator, S: Swapchain> Renderer<D, A, S> {
    /// Build the scene, the pipeline and the shader binding table.
    /// # Errors
    /// Fails if any step fails. Nothing is retried.
    pub fn load<C: ShaderCompiler + ?Sized>(
        mut ctx: GraphicsContext<D, A>,
        swapchain: S,
        compiler: &C,
        settings: AppSettings,
    ) -> Result<Self> {
        ensure!(
            settings.ray_type_count == RAY_TYPE_COUNT,
            Error::ValueOutOfRange {
                what: "ray type count",
                value: settings.ray_type_count as u64,
                max: RAY_TYPE_COUNT as u64,
            }
        );
        info!("Loading {}", settings.name);

        let mut scene = Scene::new(ctx.allocator_mut(), settings.rotation_step)?;
        let blases = vec![
            build_bottom_level(&mut ctx, &scene.triangle_and_plane_geometry())?,
            build_bottom_level(&mut ctx, &scene.triangle_geometry())?,
        ];
        let references = [blases[0].reference(), blases[1].reference()];
        let topology = scene::topology(&references, settings.ray_type_count);
        let tlas = TopLevelStructure::build(&mut ctx, scene.instances(&references, &topology))?;
        ctx.flush()?;
        info!("Acceleration structures built");

        let library = ShaderLibrary::compile_file(compiler, &settings.shader_path, &settings.shader_profile, shader_exports())?;
        let root_signatures = RootSignatures::new(ctx.device())?;
        let info = RayTracingPipelineBuilder::new(settings.name.clone())
            .library(library)
            .hit_group(HitGroup::new(HIT_GROUP, CLOSEST_HIT_SHADER))
            .hit_group(HitGroup::new(SHADOW_HIT_GROUP, SHADOW_CLOSEST_HIT_SHADER))
            .hit_group(HitGroup::new(PLANE_HIT_GROUP, PLANE_CLOSEST_HIT_SHADER))
            .local_root_signature(&root_signatures.ray_gen, &[RAY_GEN_SHADER])
            .local_root_signature(&root_signatures.hit, &[CLOSEST_HIT_SHADER])
            .local_root_signature(&root_signatures.plane_hit, &[PLANE_HIT_GROUP])
            .local_root_signature(&root_signatures.empty, &[MISS_SHADER, SHADOW_CLOSEST_HIT_SHADER, SHADOW_MISS_SHADER])
            .shader_config(
                ShaderConfig::new(settings.max_payload_size, settings.max_attribute_size),
                &[
                    MISS_SHADER,
                    CLOSEST_HIT_SHADER,
                    RAY_GEN_SHADER,
                    SHADOW_CLOSEST_HIT_SHADER,
                    SHADOW_MISS_SHADER,
                    PLANE_CLOSEST_HIT_SHADER,
                ],
            )
            .max_recursion_depth(settings.max_recursion_depth)
            .global_root_signature(&root_signatures.global)
            .build();
        let pipeline = PipelineState::assemble(&ctx, info)?;

        let output = Image::new(
            ctx.allocator_mut(),
            "output",
            &ImageCreateInfo {
                format: OUTPUT_FORMAT,
                extent: settings.extent,
                usage: vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC,
                initial_state: ResourceState::CopySource,
            },
        )?;
        let heap = DescriptorHeap::new(ctx.device(), DESCRIPTOR_COUNT)?;
        heap.write(
            OUTPUT_SLOT,
            &DescriptorView::UnorderedAccessImage {
                resource: output.handle(),
                format: OUTPUT_FORMAT,
            },
        )?;
        heap.write(
            TLAS_SLOT,
            &DescriptorView::AccelerationStructure {
                location: tlas.address(),
            },
        )?;
        heap.write(
            VERTEX_BUFFER_SLOT,
            &DescriptorView::StructuredBuffer {
                resource: scene.triangle().buffer().handle(),
                first_element: 0,
                element_count: scene.triangle().vertex_count(),
                stride: std::mem::size_of::<TriVertex>() as u32,
            },
        )?;

        scene.create_constant_buffers(ctx.allocator_mut())?;

        let mut sbt = ShaderBindingTableBuilder::new()
            .ray_generation(RAY_GEN_SHADER, [RootArgument::DescriptorTable(heap.gpu_handle(OUTPUT_SLOT))])
            .miss(MISS_SHADER, [])
            .miss(SHADOW_MISS_SHADER, []);
        for (instance, constants) in scene.constant_buffers().iter().enumerate() {
            sbt = sbt
                .hit_group(
                    HIT_GROUP,
                    [
                        RootArgument::GpuAddress(constants.address()),
                        RootArgument::DescriptorTable(heap.gpu_handle(VERTEX_BUFFER_SLOT)),
                    ],
                )
                .hit_group(SHADOW_HIT_GROUP, []);
            // Instance 0 also holds the plane as its second geometry
            if instance == 0 {
                sbt = sbt
                    .hit_group(PLANE_HIT_GROUP, [RootArgument::DescriptorTable(heap.gpu_handle(TLAS_SLOT))])
                    .hit_group(SHADOW_HIT_GROUP, []);
            }
        }
        let sbt = ShaderBindingTable::new(&mut ctx, &pipeline, &topology, sbt)?;

        info!("Loaded {}", settings.name);
        Ok(Self {
            dispatcher: FrameDispatcher::new(settings.extent),
            settings,
            sbt,
            heap,
            output,
            pipeline,
            root_signatures,
            topology,
            tlas,
            blases,
            scene,
            swapchain,
            ctx,
        })
    }

    /// Refit the top level structure at the current rotation, render a frame and advance the rotation by one step.
    /// Blocks until the frame completes.
    /// Returns the fence value of the frame.
    pub fn render_frame(&mut self) -> Result<u64> {
        let transforms = self.scene.transforms();
        let value = self.dispatcher.render_frame(
            &mut self.ctx,
            &mut self.swapchain,
            FrameResources {
                tlas: &mut self.tlas,
                pipeline: &self.pipeline,
                sbt: &self.sbt,
                heap: &self.heap,
                output: &self.output,
                transforms: &transforms,
            },
        )?;
        self.scene.advance();
        Ok(value)
    }

    /// Wait for all submitted work, then release every resource.
    pub fn shutdown(self) -> Result<()> {
        self.ctx.fence().wait_latest()?;
        info!("Shutting down after {} frames", self.dispatcher.frame_count());
        Ok(())
    }

    /// The graphics context
    pub fn ctx(&self) -> &GraphicsContext<D, A> {
        &self.ctx
    }

    /// Mutable access to the graphics context
    pub fn ctx_mut(&mut self) -> &mut GraphicsContext<D, A> {
        &mut self.ctx
    }

    /// The swapchain
    pub fn swapchain(&self) -> &S {
        &self.swapchain
    }

    /// Application settings
    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    /// The scene
    pub fn scene(&self) -> &Scene<A> {
        &self.scene
    }

    /// Bottom level structures: triangle and plane, then triangle only
    pub fn blases(&self) -> &[BottomLevelStructure<A>] {
        &self.blases
    }

    /// The top level structure
    pub fn tlas(&self) -> &TopLevelStructure<A> {
        &self.tlas
    }

    /// Mutable access to the top level structure
    pub fn tlas_mut(&mut self) -> &mut TopLevelStructure<A> {
        &mut self.tlas
    }

    /// Shader table topology of the scene
    pub fn topology(&self) -> &ShaderTableTopology {
        &self.topology
    }

    /// The pipeline
    pub fn pipeline(&self) -> &PipelineState<D> {
        &self.pipeline
    }

    /// Root signatures of the pipeline
    pub fn root_signatures(&self) -> &RootSignatures<D> {
        &self.root_signatures
    }

    /// The shader binding table
    pub fn sbt(&self) -> &ShaderBindingTable<A> {
        &self.sbt
    }

    /// Mutable access to the shader binding table
    pub fn sbt_mut(&mut self) -> &mut ShaderBindingTable<A> {
        &mut self.sbt
    }

    /// The descriptor heap
    pub fn heap(&self) -> &DescriptorHeap<D> {
        &self.heap
    }

    /// The ray traced output image
    pub fn output(&self) -> &Image<A> {
        &self.output
    }

    /// Number of frames rendered
    pub fn frame_count(&self) -> u64 {
        self.dispatcher.frame_count()
    }
}
