use anyhow::Result;

use deimos::headless::{HeadlessCompiler, HeadlessDevice};
use deimos::prelude::*;
use deimos::renderer::{HIT_GROUP, PLANE_HIT_GROUP, RAY_GEN_SHADER, SHADOW_HIT_GROUP, SHADOW_MISS_SHADER, TLAS_SLOT, OUTPUT_SLOT, VERTEX_BUFFER_SLOT};

mod framework;

#[test]
pub fn renderer_table_layout() -> Result<()> {
    let renderer = framework::make_renderer()?;
    let sbt = renderer.sbt();
    assert_eq!(sbt.record_count(), 11);
    assert_eq!(sbt.stride(), 64);

    let layout = sbt.layout();
    assert_eq!(layout.ray_generation.offset, 0);
    assert_eq!(layout.miss.offset, 64);
    assert_eq!(layout.hit_group.offset, 192);
    assert_eq!((layout.ray_generation.count, layout.miss.count, layout.hit_group.count), (1, 2, 8));
    assert_eq!(layout.size, 704);

    let base = sbt.buffer().address();
    let [ray_gen, miss, hit] = *sbt.regions();
    assert_eq!((ray_gen.device_address, ray_gen.size, ray_gen.stride), (base, 64, 64));
    assert_eq!((miss.device_address, miss.size, miss.stride), (base + 64, 128, 64));
    assert_eq!((hit.device_address, hit.size, hit.stride), (base + 192, 512, 64));
    Ok(())
}

#[test]
pub fn renderer_table_contents() -> Result<()> {
    let renderer = framework::make_renderer()?;
    let pipeline = renderer.pipeline();
    let heap = renderer.heap();
    let bytes = renderer.ctx().allocator().contents(renderer.sbt().buffer().handle())?;
    let record = |index: usize| &bytes[index * 64..(index + 1) * 64];
    let argument = |index: usize, slot: usize| u64::from_le_bytes(record(index)[32 + slot * 8..40 + slot * 8].try_into().unwrap());

    assert_eq!(&record(0)[..32], pipeline.identifier(RAY_GEN_SHADER)?.as_bytes());
    assert_eq!(argument(0, 0), heap.gpu_handle(OUTPUT_SLOT).ptr);
    assert_eq!(&record(2)[..32], pipeline.identifier(SHADOW_MISS_SHADER)?.as_bytes());

    // Instance 0: triangle and plane, two ray types each
    let constants = renderer.scene().constant_buffers();
    assert_eq!(&record(3)[..32], pipeline.identifier(HIT_GROUP)?.as_bytes());
    assert_eq!(argument(3, 0), constants[0].address());
    assert_eq!(argument(3, 1), heap.gpu_handle(VERTEX_BUFFER_SLOT).ptr);
    assert_eq!(&record(4)[..32], pipeline.identifier(SHADOW_HIT_GROUP)?.as_bytes());
    assert_eq!(&record(5)[..32], pipeline.identifier(PLANE_HIT_GROUP)?.as_bytes());
    assert_eq!(argument(5, 0), heap.gpu_handle(TLAS_SLOT).ptr);

    // Instances 1 and 2 start at hit group offsets 4 and 6
    assert_eq!(argument(3 + 4, 0), constants[1].address());
    assert_eq!(argument(3 + 6, 0), constants[2].address());
    assert_eq!(&record(10)[..32], pipeline.identifier(SHADOW_HIT_GROUP)?.as_bytes());
    Ok(())
}

#[test]
pub fn instances_point_at_their_hit_records() -> Result<()> {
    let renderer = framework::make_renderer()?;
    let offsets = renderer.tlas().instances().iter().map(|instance| instance.hit_group_offset).collect::<Vec<_>>();
    assert_eq!(offsets, renderer.topology().hit_group_offsets());
    assert_eq!(renderer.topology().hit_record_count(), renderer.sbt().layout().hit_group.count as usize);
    let topology = ShaderTableTopology::from_instances(2, renderer.tlas().instances())?;
    assert_eq!(&topology, renderer.topology());
    Ok(())
}

const SOURCE: &str = "void rayGen() {} void miss() {} void chs() {}";

struct Fixture {
    ctx: framework::Context,
    pipeline: PipelineState<HeadlessDevice>,
    topology: ShaderTableTopology,
    _signature: RootSignature<HeadlessDevice>,
}

fn fixture() -> Result<Fixture> {
    let mut ctx = framework::make_context()?;
    let library = ShaderLibrary::compile_source(
        &HeadlessCompiler::new(),
        SOURCE,
        "test.hlsl",
        "lib_6_3",
        vec![
            ShaderExport::new("rayGen", ShaderStage::RayGeneration),
            ShaderExport::new("miss", ShaderStage::Miss),
            ShaderExport::new("chs", ShaderStage::ClosestHit),
        ],
    )?;
    let signature = RootSignature::new(ctx.device(), RootSignatureDesc::local().parameter(RootParameter::cbv(0)))?;
    let info = RayTracingPipelineBuilder::new("sbt test")
        .library(library)
        .hit_group(HitGroup::new("HitGroup", "chs"))
        .local_root_signature(&signature, &["HitGroup"])
        .shader_config(ShaderConfig::new(12, 8), &["rayGen", "miss", "HitGroup"])
        .build();
    let pipeline = PipelineState::assemble(&ctx, info)?;

    let scene = Scene::new(ctx.allocator_mut(), 0.0)?;
    let blas = build_bottom_level(&mut ctx, &scene.triangle_geometry())?;
    let topology = ShaderTableTopology::new(1, &[blas.reference()]);
    Ok(Fixture {
        ctx,
        pipeline,
        topology,
        _signature: signature,
    })
}

fn valid_builder() -> ShaderBindingTableBuilder {
    ShaderBindingTableBuilder::new()
        .ray_generation("rayGen", [])
        .miss("miss", [])
        .hit_group("HitGroup", [RootArgument::GpuAddress(0x1000)])
}

#[test]
pub fn minimal_table() -> Result<()> {
    let mut f = fixture()?;
    let sbt = ShaderBindingTable::new(&mut f.ctx, &f.pipeline, &f.topology, valid_builder())?;
    // 32 byte identifier and one root argument round up to 64
    assert_eq!(sbt.stride(), 64);
    assert_eq!(sbt.layout().hit_group.offset, 128);
    let bytes = f.ctx.allocator().contents(sbt.buffer().handle())?;
    assert_eq!(u64::from_le_bytes(bytes[160..168].try_into()?), 0x1000);
    Ok(())
}

#[test]
pub fn region_counts_follow_topology() -> Result<()> {
    let mut f = fixture()?;
    let builder = valid_builder().hit_group("HitGroup", [RootArgument::GpuAddress(0x2000)]);
    let err = ShaderBindingTable::new(&mut f.ctx, &f.pipeline, &f.topology, builder).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::ShaderTableRegionMismatch {
            region: "hit group",
            expected: 1,
            actual: 2
        })
    ));

    let builder = ShaderBindingTableBuilder::new()
        .miss("miss", [])
        .hit_group("HitGroup", [RootArgument::GpuAddress(0x1000)]);
    let err = ShaderBindingTable::new(&mut f.ctx, &f.pipeline, &f.topology, builder).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::ShaderTableRegionMismatch { region: "ray generation", .. })));
    Ok(())
}

#[test]
pub fn records_name_the_right_programs() -> Result<()> {
    let mut f = fixture()?;
    let builder = ShaderBindingTableBuilder::new()
        .ray_generation("rayGen", [])
        .miss("rayGen", [])
        .hit_group("HitGroup", [RootArgument::GpuAddress(0x1000)]);
    let err = ShaderBindingTable::new(&mut f.ctx, &f.pipeline, &f.topology, builder).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::WrongShaderStage { .. })));

    let builder = ShaderBindingTableBuilder::new()
        .ray_generation("rayGen", [])
        .miss("miss", [])
        .hit_group("chs", [RootArgument::GpuAddress(0x1000)]);
    let err = ShaderBindingTable::new(&mut f.ctx, &f.pipeline, &f.topology, builder).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::UnknownExport(name)) if name == "chs"));
    Ok(())
}

#[test]
pub fn arguments_follow_root_signature() -> Result<()> {
    let mut f = fixture()?;
    let allocations = f.ctx.allocator().live_allocations()?;
    let builder = ShaderBindingTableBuilder::new()
        .ray_generation("rayGen", [])
        .miss("miss", [])
        .hit_group("HitGroup", [RootArgument::DescriptorTable(DescriptorHandle::default())]);
    let err = ShaderBindingTable::new(&mut f.ctx, &f.pipeline, &f.topology, builder).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::RootArgumentMismatch { export, .. }) if export == "HitGroup"));

    let builder = ShaderBindingTableBuilder::new()
        .ray_generation("rayGen", [])
        .miss("miss", [])
        .hit_group("HitGroup", []);
    assert!(ShaderBindingTable::new(&mut f.ctx, &f.pipeline, &f.topology, builder).is_err());
    assert_eq!(f.ctx.allocator().live_allocations()?, allocations, "Rejected tables must not allocate.");
    Ok(())
}
