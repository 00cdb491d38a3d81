use anyhow::Result;

use deimos::headless::HeadlessCompiler;
use deimos::prelude::*;
use deimos::renderer::{
    HIT_GROUP, MISS_SHADER, PLANE_HIT_GROUP, RAY_GEN_SHADER, SHADOW_HIT_GROUP, SHADOW_MISS_SHADER, CLOSEST_HIT_SHADER,
};

mod framework;

const SOURCE: &str = "
[shader(\"raygeneration\")] void rayGen() {}
[shader(\"miss\")] void miss(inout Payload p) {}
[shader(\"closesthit\")] void chs(inout Payload p, in Attributes a) {}
";

fn library(source: &str) -> Result<ShaderLibrary> {
    ShaderLibrary::compile_source(
        &HeadlessCompiler::new(),
        source,
        "test.hlsl",
        "lib_6_3",
        vec![
            ShaderExport::new("rayGen", ShaderStage::RayGeneration),
            ShaderExport::new("miss", ShaderStage::Miss),
            ShaderExport::new("chs", ShaderStage::ClosestHit),
        ],
    )
}

fn builder(library: ShaderLibrary) -> RayTracingPipelineBuilder {
    RayTracingPipelineBuilder::new("test pipeline")
        .library(library)
        .hit_group(HitGroup::new("HitGroup", "chs"))
        .shader_config(ShaderConfig::new(12, 8), &["rayGen", "miss", "HitGroup"])
}

#[test]
pub fn renderer_pipeline_identifiers() -> Result<()> {
    let renderer = framework::make_renderer()?;
    let pipeline = renderer.pipeline();
    let identifier_size = renderer.ctx().shader_table_properties().identifier_size as usize;
    for name in [RAY_GEN_SHADER, MISS_SHADER, SHADOW_MISS_SHADER, HIT_GROUP, SHADOW_HIT_GROUP, PLANE_HIT_GROUP] {
        assert_eq!(pipeline.identifier(name)?.len(), identifier_size, "identifier of {name}");
    }
    assert_ne!(pipeline.identifier(HIT_GROUP)?, pipeline.identifier(PLANE_HIT_GROUP)?);

    // Closest hit shaders are only reachable through their hit group
    let err = pipeline.identifier(CLOSEST_HIT_SHADER).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::UnknownExport(name)) if name == CLOSEST_HIT_SHADER));
    assert_eq!(pipeline.max_recursion_depth(), 2);
    assert!(pipeline.global_root_signature().is_some());
    Ok(())
}

#[test]
pub fn renderer_pipeline_local_arguments() -> Result<()> {
    let renderer = framework::make_renderer()?;
    let pipeline = renderer.pipeline();
    assert_eq!(pipeline.local_root_arguments(RAY_GEN_SHADER), &[RootArgumentKind::DescriptorTable]);
    assert_eq!(
        pipeline.local_root_arguments(HIT_GROUP),
        &[RootArgumentKind::GpuAddress, RootArgumentKind::DescriptorTable]
    );
    assert_eq!(pipeline.local_root_arguments(PLANE_HIT_GROUP), &[RootArgumentKind::DescriptorTable]);
    assert!(pipeline.local_root_arguments(SHADOW_HIT_GROUP).is_empty());
    assert!(pipeline.local_root_arguments(MISS_SHADER).is_empty());
    assert_eq!(pipeline.shader_config(RAY_GEN_SHADER), Some(ShaderConfig::new(12, 8)));
    Ok(())
}

#[test]
pub fn assemble_minimal_pipeline() -> Result<()> {
    let ctx = framework::make_context()?;
    let pipeline = PipelineState::assemble(&ctx, builder(library(SOURCE)?).build())?;
    assert_eq!(pipeline.name(), "test pipeline");
    assert!(pipeline.identifier("HitGroup").is_ok());
    assert_eq!(pipeline.max_recursion_depth(), 1);
    assert_eq!(ctx.device().live_objects()?.pipelines, 1);
    drop(pipeline);
    assert_eq!(ctx.device().live_objects()?.pipelines, 0, "Dropping the pipeline should destroy it.");
    Ok(())
}

#[test]
pub fn export_missing_from_bytecode() -> Result<()> {
    let ctx = framework::make_context()?;
    let source = "[shader(\"raygeneration\")] void rayGen() {}";
    let err = PipelineState::assemble(&ctx, builder(library(source)?).build()).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Device(_))), "{err}");
    assert_eq!(ctx.device().live_objects()?.pipelines, 0);
    Ok(())
}

#[test]
pub fn root_signature_without_exports() -> Result<()> {
    let ctx = framework::make_context()?;
    let signature = RootSignature::new(ctx.device(), RootSignatureDesc::local().parameter(RootParameter::cbv(0)))?;
    let info = builder(library(SOURCE)?).local_root_signature(&signature, &[]).build();
    let err = PipelineState::assemble(&ctx, info).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::UnassociatedRootSignature(0))));
    Ok(())
}

#[test]
pub fn conflicting_root_signatures() -> Result<()> {
    let ctx = framework::make_context()?;
    let first = RootSignature::new(ctx.device(), RootSignatureDesc::local().parameter(RootParameter::cbv(0)))?;
    let second = RootSignature::new(ctx.device(), RootSignatureDesc::local())?;
    let info = builder(library(SOURCE)?)
        .local_root_signature(&first, &["chs"])
        .local_root_signature(&second, &["chs"])
        .build();
    let err = PipelineState::assemble(&ctx, info).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::ConflictingRootSignature(name)) if name == "chs"));

    let info = builder(library(SOURCE)?)
        .local_root_signature(&first, &["chs"])
        .local_root_signature(&second, &["HitGroup"])
        .build();
    let err = PipelineState::assemble(&ctx, info).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::ConflictingRootSignature(name)) if name == "HitGroup"));
    Ok(())
}

#[test]
pub fn hit_group_inherits_closest_hit_arguments() -> Result<()> {
    let ctx = framework::make_context()?;
    let signature = RootSignature::new(
        ctx.device(),
        RootSignatureDesc::local()
            .parameter(RootParameter::cbv(0))
            .descriptor_table([DescriptorRange::new(DescriptorRangeType::Srv, 0, 1, 0)]),
    )?;
    let info = builder(library(SOURCE)?).local_root_signature(&signature, &["chs"]).build();
    let pipeline = PipelineState::assemble(&ctx, info)?;
    assert_eq!(
        pipeline.local_root_arguments("HitGroup"),
        &[RootArgumentKind::GpuAddress, RootArgumentKind::DescriptorTable]
    );
    Ok(())
}

#[test]
pub fn root_signature_serialization_errors() -> Result<()> {
    let ctx = framework::make_context()?;
    let err = RootSignature::new(ctx.device(), RootSignatureDesc::local().descriptor_table(Vec::<DescriptorRange>::new())).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::RootSignatureSerialization(_))));
    assert_eq!(ctx.device().live_objects()?.root_signatures, 0);
    Ok(())
}

#[test]
pub fn pipeline_limits() -> Result<()> {
    let ctx = framework::make_context()?;
    let info = builder(library(SOURCE)?).max_recursion_depth(32).build();
    let err = PipelineState::assemble(&ctx, info).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::RecursionDepthTooLarge(32))));

    let info = RayTracingPipelineBuilder::new("too many attributes")
        .library(library(SOURCE)?)
        .hit_group(HitGroup::new("HitGroup", "chs"))
        .shader_config(ShaderConfig::new(12, 36), &["rayGen", "miss", "HitGroup"])
        .build();
    let err = PipelineState::assemble(&ctx, info).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::AttributeSizeTooLarge(36))));
    Ok(())
}

#[test]
pub fn shader_compilation_errors() -> Result<()> {
    let err = library("void rayGen() {").unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::ShaderCompilation(diagnostics)) if diagnostics.contains("test.hlsl")));

    let err = ShaderLibrary::compile_file(&HeadlessCompiler::new(), "does/not/exist.hlsl", "lib_6_3", vec![]).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::ShaderSourceUnavailable { .. })));
    Ok(())
}
