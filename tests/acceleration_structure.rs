use anyhow::Result;

use deimos::headless::RecordedCommand;
use deimos::prelude::*;

mod framework;

fn scene(ctx: &mut framework::Context) -> Result<Scene<deimos::headless::HeadlessAllocator>> {
    Scene::new(ctx.allocator_mut(), 0.005)
}

#[test]
pub fn empty_bottom_level_allocates_nothing() -> Result<()> {
    let mut ctx = framework::make_context()?;
    let before = ctx.allocator().live_allocations()?;
    let err = build_bottom_level(&mut ctx, &[]).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::EmptyGeometry)));
    assert_eq!(ctx.allocator().live_allocations()?, before, "No buffers should be allocated for an empty build.");
    assert!(ctx.command_list().commands().is_empty(), "Nothing should be recorded for an empty build.");
    Ok(())
}

#[test]
pub fn bottom_level_records_build_and_barrier() -> Result<()> {
    let mut ctx = framework::make_context()?;
    let scene = scene(&mut ctx)?;
    let blas = build_bottom_level(&mut ctx, &scene.triangle_and_plane_geometry())?;
    assert_eq!(blas.geometry_count(), 2);
    assert_ne!(blas.address(), 0);
    assert_eq!(blas.result_buffer().size(), blas.sizes().size, "Result buffer should have exactly the queried size.");
    assert_eq!(blas.scratch_buffer().size(), blas.sizes().build_scratch_size);

    let commands = ctx.command_list().commands().to_vec();
    assert_eq!(commands.len(), 2);
    let RecordedCommand::BuildAccelerationStructure(info) = &commands[0] else {
        panic!("expected a build, got {:?}", commands[0]);
    };
    assert_eq!(info.ty(), AccelerationStructureType::BottomLevel);
    assert_eq!(info.input_count(), 2);
    assert_eq!(info.destination(), blas.address());
    assert!(!info.is_update());
    assert!(matches!(&commands[1], RecordedCommand::ResourceBarrier(barriers) if barriers == &[ResourceBarrier::uav(blas.result_buffer().handle())]));

    // The device validates buffer states on execution
    ctx.flush()?;
    Ok(())
}

#[test]
pub fn invalid_vertex_count_is_rejected() -> Result<()> {
    let mut ctx = framework::make_context()?;
    let scene = scene(&mut ctx)?;
    let triangle = scene.triangle();
    let geometry = GeometryDescriptor::new(triangle.buffer().address(), triangle.stride(), 4, triangle.format());
    let err = build_bottom_level(&mut ctx, &[geometry]).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::InvalidVertexCount(4))));
    Ok(())
}

fn build_scene_tlas(
    ctx: &mut framework::Context,
    scene: &Scene<deimos::headless::HeadlessAllocator>,
) -> Result<(Vec<BottomLevelStructure<deimos::headless::HeadlessAllocator>>, TopLevelStructure<deimos::headless::HeadlessAllocator>)> {
    let blases = vec![
        build_bottom_level(ctx, &scene.triangle_and_plane_geometry())?,
        build_bottom_level(ctx, &scene.triangle_geometry())?,
    ];
    let references = [blases[0].reference(), blases[1].reference()];
    let topology = deimos::scene::topology(&references, 2);
    let tlas = TopLevelStructure::build(ctx, scene.instances(&references, &topology))?;
    ctx.flush()?;
    Ok((blases, tlas))
}

#[test]
pub fn top_level_build_writes_instance_descriptors() -> Result<()> {
    let mut ctx = framework::make_context()?;
    let scene = scene(&mut ctx)?;
    let (blases, tlas) = build_scene_tlas(&mut ctx, &scene)?;

    assert_eq!(tlas.instance_count(), 3);
    assert_eq!(tlas.update_count(), 0);
    let offsets = tlas.instances().iter().map(|instance| instance.hit_group_offset).collect::<Vec<_>>();
    assert_eq!(offsets, [0, 4, 6]);
    assert_eq!(tlas.instances()[0].blas, blases[0].reference());
    assert_eq!(tlas.instances()[2].blas, blases[1].reference());

    let bytes = ctx.allocator().contents(tlas.instance_buffer().handle())?;
    assert_eq!(bytes.len() as u64, INSTANCE_DESCRIPTOR_SIZE * 3);
    // Last 8 bytes of each descriptor are the bottom level address
    let address = u64::from_le_bytes(bytes[56..64].try_into()?);
    assert_eq!(address, blases[0].address());
    Ok(())
}

#[test]
pub fn top_level_update_refits_in_place() -> Result<()> {
    let mut ctx = framework::make_context()?;
    let mut scene = scene(&mut ctx)?;
    let (_blases, mut tlas) = build_scene_tlas(&mut ctx, &scene)?;
    let allocations = ctx.allocator().live_allocations()?;
    let address = tlas.address();

    scene.advance();
    let transforms = scene.transforms();
    tlas.update(&mut ctx, &transforms)?;
    assert_eq!(tlas.update_count(), 1);
    assert_eq!(tlas.address(), address, "An update must not move the structure.");
    assert_eq!(ctx.allocator().live_allocations()?, allocations, "An update must not allocate.");

    let update = ctx
        .command_list()
        .commands()
        .iter()
        .find_map(|command| match command {
            RecordedCommand::BuildAccelerationStructure(info) => Some(info.clone()),
            _ => None,
        })
        .expect("update should be recorded");
    assert!(update.is_update());
    assert_eq!(update.source(), Some(address));
    assert_eq!(update.destination(), address);
    ctx.flush()?;

    let bytes = ctx.allocator().contents(tlas.instance_buffer().handle())?;
    let start = INSTANCE_DESCRIPTOR_SIZE as usize;
    assert_eq!(&bytes[start..start + 48], bytemuck::cast_slice::<f32, u8>(transforms[1].elements()));
    assert_eq!(tlas.instances()[1].transform, transforms[1]);
    Ok(())
}

#[test]
pub fn unchanged_update_keeps_descriptor_bytes() -> Result<()> {
    let mut ctx = framework::make_context()?;
    let scene = scene(&mut ctx)?;
    let (_blases, mut tlas) = build_scene_tlas(&mut ctx, &scene)?;
    let before = ctx.allocator().contents(tlas.instance_buffer().handle())?;
    let transforms = tlas.instances().iter().map(|instance| instance.transform).collect::<Vec<_>>();
    tlas.update(&mut ctx, &transforms)?;
    tlas.update(&mut ctx, &transforms)?;
    ctx.flush()?;
    assert_eq!(ctx.allocator().contents(tlas.instance_buffer().handle())?, before);
    Ok(())
}

#[test]
pub fn top_level_update_rejects_changed_instance_set() -> Result<()> {
    let mut ctx = framework::make_context()?;
    let scene = scene(&mut ctx)?;
    let (_blases, mut tlas) = build_scene_tlas(&mut ctx, &scene)?;

    let err = tlas.update(&mut ctx, &scene.transforms()[..2]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::InstanceCountChanged {
            expected: 3,
            actual: 2
        })
    ));

    let mut instances = tlas.instances().to_vec();
    instances[2] = instances[2].hit_group_offset(8);
    let err = tlas.refit(&mut ctx, &instances).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::InstanceLayoutChanged(2))));
    Ok(())
}

#[test]
pub fn build_or_update_builds_then_refits() -> Result<()> {
    let mut ctx = framework::make_context()?;
    let mut scene = scene(&mut ctx)?;
    let blas = build_bottom_level(&mut ctx, &scene.triangle_and_plane_geometry())?;
    let references = [blas.reference(), blas.reference()];
    let topology = deimos::scene::topology(&references, 2);

    let mut tlas = None;
    let address = build_or_update_top_level(&mut ctx, &scene.instances(&references, &topology), &mut tlas)?.address();
    ctx.flush()?;
    let allocations = ctx.allocator().live_allocations()?;

    scene.advance();
    let updated = build_or_update_top_level(&mut ctx, &scene.instances(&references, &topology), &mut tlas)?;
    assert_eq!(updated.update_count(), 1);
    assert_eq!(updated.address(), address);
    assert_eq!(ctx.allocator().live_allocations()?, allocations, "A refit must reuse the existing buffers.");
    ctx.flush()?;
    Ok(())
}

#[test]
pub fn rejected_refit_keeps_existing_structure() -> Result<()> {
    let mut ctx = framework::make_context()?;
    let scene = scene(&mut ctx)?;
    let (_blases, tlas) = build_scene_tlas(&mut ctx, &scene)?;
    let address = tlas.address();
    let mut instances = tlas.instances().to_vec();
    let mut existing = Some(tlas);
    let allocations = ctx.allocator().live_allocations()?;

    instances[2] = instances[2].mask(0x0F);
    let err = build_or_update_top_level(&mut ctx, &instances, &mut existing).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::InstanceLayoutChanged(2))));
    assert_eq!(ctx.allocator().live_allocations()?, allocations, "A rejected refit must not free any buffers.");
    assert!(ctx.command_list().commands().is_empty(), "A rejected refit must not record anything.");

    let tlas = existing.as_mut().expect("structure should survive a rejected refit");
    assert_eq!(tlas.address(), address);
    let transforms = scene.transforms();
    tlas.update(&mut ctx, &transforms)?;
    assert_eq!(tlas.update_count(), 1);
    ctx.flush()?;
    Ok(())
}

#[test]
pub fn failed_instance_write_records_nothing() -> Result<()> {
    let mut ctx = framework::make_context()?;
    let scene = scene(&mut ctx)?;
    let (_blases, mut tlas) = build_scene_tlas(&mut ctx, &scene)?;

    // Release the instance memory so the next write fails
    ctx.allocator_mut().free(tlas.instance_buffer().handle())?;
    assert!(tlas.update(&mut ctx, &scene.transforms()).is_err());
    assert!(ctx.command_list().commands().is_empty(), "No barrier may be left behind by a failed update.");
    assert_eq!(tlas.update_count(), 0);
    Ok(())
}

#[test]
pub fn bottom_level_barriers_precede_top_level_build() -> Result<()> {
    let renderer = framework::make_renderer()?;
    let submissions = renderer.ctx().device().submissions()?;
    let commands = submissions
        .iter()
        .find(|commands| commands.iter().any(|command| matches!(command, RecordedCommand::BuildAccelerationStructure(_))))
        .expect("acceleration structure builds should be submitted");

    let top_level = commands
        .iter()
        .position(|command| {
            matches!(command, RecordedCommand::BuildAccelerationStructure(info) if info.ty() == AccelerationStructureType::TopLevel)
        })
        .expect("top level build should be recorded");
    for blas in renderer.blases() {
        let build = commands
            .iter()
            .position(|command| matches!(command, RecordedCommand::BuildAccelerationStructure(info) if info.destination() == blas.address()))
            .expect("bottom level build should be recorded");
        let barrier = ResourceBarrier::uav(blas.result_buffer().handle());
        let barrier = commands
            .iter()
            .position(|command| matches!(command, RecordedCommand::ResourceBarrier(barriers) if barriers.contains(&barrier)))
            .expect("bottom level barrier should be recorded");
        assert!(build < barrier, "Barrier must follow the bottom level build.");
        assert!(barrier < top_level, "Bottom level barrier must precede the top level build.");
    }
    Ok(())
}

#[test]
pub fn empty_instance_set_is_rejected() -> Result<()> {
    let mut ctx = framework::make_context()?;
    let err = build_or_update_top_level(&mut ctx, &[], &mut None).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::EmptyInstanceSet)));
    Ok(())
}

#[test]
pub fn hit_group_offset_must_fit_in_24_bits() -> Result<()> {
    let mut ctx = framework::make_context()?;
    let scene = scene(&mut ctx)?;
    let blas = build_bottom_level(&mut ctx, &scene.triangle_geometry())?;
    let instance = InstanceRecord::new(blas.reference()).hit_group_offset(1 << 24);
    let err = build_or_update_top_level(&mut ctx, &[instance], &mut None).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::ValueOutOfRange { .. })));
    Ok(())
}
