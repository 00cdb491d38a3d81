//! Ray tracing pipeline state assembly.
//!
//! A [`RayTracingPipelineBuilder`] collects typed fragments: the shader library, hit groups, local root signatures with the
//! exports they apply to, shader configs with their exports, the recursion depth and the global root signature. It resolves
//! them into an ordered list of [`StateSubobject`]s, where association subobjects refer to the subobject they associate by
//! index. [`PipelineState::assemble`] validates the result and creates the pipeline in a single device call.
//!
//! # Example
//! ```ignore
//! let info = RayTracingPipelineBuilder::new("scene")
//!     .library(library)
//!     .hit_group(HitGroup::new("HitGroup", "chs"))
//!     .local_root_signature(&hit_signature, &["chs"])
//!     .shader_config(ShaderConfig::new(12, 8), &["rayGen", "miss", "chs"])
//!     .max_recursion_depth(1)
//!     .global_root_signature(&global_signature)
//!     .build();
//! let pipeline = PipelineState::assemble(&ctx, info)?;
//! let identifier = pipeline.identifier("HitGroup")?;
//! ```

use std::collections::{HashMap, HashSet};

use anyhow::{ensure, Result};

use crate::allocator::traits::Allocator;
use crate::core::context::GraphicsContext;
use crate::core::device::{Device, ShaderIdentifier, MAX_ATTRIBUTE_SIZE, MAX_RECURSION_DEPTH};
use crate::core::error::Error;
use crate::core::handle::{PipelineHandle, RootSignatureHandle};
use crate::pipeline::root_signature::{RootArgumentKind, RootSignature, RootSignatureScope};
use crate::pipeline::shader::{ShaderLibrary, ShaderStage};

/// A named hit group: the addressable unit placed into hit group shader records.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct HitGroup {
    name: String,
    closest_hit: String,
    any_hit: Option<String>,
}

impl HitGroup {
    /// Create a hit group that runs `closest_hit` for the closest hit.
    pub fn new(name: impl Into<String>, closest_hit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            closest_hit: closest_hit.into(),
            any_hit: None,
        }
    }

    /// Also run `any_hit` for every candidate hit.
    pub fn any_hit(mut self, any_hit: impl Into<String>) -> Self {
        self.any_hit = Some(any_hit.into());
        self
    }

    /// Hit group name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Closest hit export
    pub fn closest_hit(&self) -> &str {
        &self.closest_hit
    }

    /// Any hit export, if any
    pub fn any_hit_export(&self) -> Option<&str> {
        self.any_hit.as_deref()
    }

    fn uses(&self, export: &str) -> bool {
        self.closest_hit == export || self.any_hit.as_deref() == Some(export)
    }
}

/// Payload and attribute size limits shared by a set of exports.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ShaderConfig {
    /// Maximum ray payload size in bytes
    pub max_payload_size: u32,
    /// Maximum hit attribute size in bytes
    pub max_attribute_size: u32,
}

impl ShaderConfig {
    /// Create a new shader config
    pub fn new(max_payload_size: u32, max_attribute_size: u32) -> Self {
        Self {
            max_payload_size,
            max_attribute_size,
        }
    }
}

/// One entry of the pipeline state description passed to the device.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum StateSubobject {
    /// The shader library, with the names of all exports used from it
    DxilLibrary {
        /// Export names
        exports: Vec<String>,
    },
    /// A hit group
    HitGroup(HitGroup),
    /// A local root signature
    LocalRootSignature(RootSignatureHandle),
    /// The global root signature
    GlobalRootSignature(RootSignatureHandle),
    /// A shader config
    ShaderConfig(ShaderConfig),
    /// Pipeline-wide limits
    PipelineConfig {
        /// Maximum trace recursion depth
        max_recursion_depth: u32,
    },
    /// Associates the subobject at index `subobject` with a set of exports or hit groups
    ExportsAssociation {
        /// Index of the associated subobject
        subobject: usize,
        /// Export or hit group names
        exports: Vec<String>,
    },
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub(crate) struct LocalRootSignatureAssociation {
    pub(crate) handle: RootSignatureHandle,
    pub(crate) arguments: Vec<RootArgumentKind>,
    pub(crate) exports: Vec<String>,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub(crate) struct ShaderConfigAssociation {
    pub(crate) config: ShaderConfig,
    pub(crate) exports: Vec<String>,
}

/// Ray tracing pipeline create info. Prefer using the builder to construct this correctly
#[derive(Debug, Clone)]
pub struct RayTracingPipelineCreateInfo {
    pub(crate) name: String,
    pub(crate) library: Option<ShaderLibrary>,
    pub(crate) hit_groups: Vec<HitGroup>,
    pub(crate) local_root_signatures: Vec<LocalRootSignatureAssociation>,
    pub(crate) shader_configs: Vec<ShaderConfigAssociation>,
    pub(crate) max_recursion_depth: u32,
    pub(crate) global_root_signature: Option<RootSignatureHandle>,
    subobjects: Vec<StateSubobject>,
}

impl RayTracingPipelineCreateInfo {
    /// Pipeline name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shader library
    pub fn library(&self) -> Option<&ShaderLibrary> {
        self.library.as_ref()
    }

    /// The hit groups
    pub fn hit_groups(&self) -> &[HitGroup] {
        &self.hit_groups
    }

    /// Ordered subobjects, with association indices resolved
    pub fn subobjects(&self) -> &[StateSubobject] {
        &self.subobjects
    }

    /// Max recursion depth
    pub fn max_recursion_depth(&self) -> u32 {
        self.max_recursion_depth
    }

    fn hit_group(&self, name: &str) -> Option<&HitGroup> {
        self.hit_groups.iter().find(|group| group.name == name)
    }

    /// Check the description for errors the device would otherwise reject, or that would make shader records
    /// impossible to validate.
    pub fn validate(&self) -> Result<()> {
        let library = self.library.as_ref().ok_or(Error::MissingShaderLibrary)?;

        let mut names = HashSet::new();
        for export in library.exports() {
            ensure!(names.insert(export.name()), Error::DuplicateExport(export.name().to_owned()));
        }
        for group in &self.hit_groups {
            ensure!(names.insert(group.name()), Error::DuplicateExport(group.name.clone()));
            check_stage(library, &group.closest_hit, ShaderStage::ClosestHit)?;
            if let Some(any_hit) = &group.any_hit {
                check_stage(library, any_hit, ShaderStage::AnyHit)?;
            }
        }
        ensure!(library.exports_of(ShaderStage::RayGeneration).next().is_some(), Error::MissingRayGeneration);

        let mut root_signature_of = HashMap::new();
        for (index, association) in self.local_root_signatures.iter().enumerate() {
            ensure!(!association.exports.is_empty(), Error::UnassociatedRootSignature(index));
            for export in &association.exports {
                ensure!(names.contains(export.as_str()), Error::UnknownExport(export.clone()));
                ensure!(
                    root_signature_of.insert(export.as_str(), index).is_none(),
                    Error::ConflictingRootSignature(export.clone())
                );
            }
        }
        // A hit group and the exports inside it cannot each get their own root signature
        for group in &self.hit_groups {
            if root_signature_of.contains_key(group.name()) {
                ensure!(
                    !root_signature_of.contains_key(group.closest_hit())
                        && group.any_hit_export().map_or(true, |any_hit| !root_signature_of.contains_key(any_hit)),
                    Error::ConflictingRootSignature(group.name.clone())
                );
            }
        }

        for association in &self.shader_configs {
            ensure!(
                association.config.max_attribute_size <= MAX_ATTRIBUTE_SIZE,
                Error::AttributeSizeTooLarge(association.config.max_attribute_size)
            );
            for export in &association.exports {
                ensure!(names.contains(export.as_str()), Error::UnknownExport(export.clone()));
            }
        }
        let mut required = library
            .exports()
            .iter()
            .filter(|export| matches!(export.stage(), ShaderStage::RayGeneration | ShaderStage::Miss))
            .map(|export| export.name())
            .collect::<Vec<_>>();
        for group in &self.hit_groups {
            required.push(group.closest_hit());
            required.extend(group.any_hit_export());
        }
        for export in required {
            let configs = self
                .shader_configs
                .iter()
                .filter(|association| {
                    association.exports.iter().any(|name| {
                        name == export || self.hit_group(name).map_or(false, |group| group.uses(export))
                    })
                })
                .count();
            ensure!(configs > 0, Error::MissingShaderConfig(export.to_owned()));
            ensure!(configs == 1, Error::DuplicateShaderConfig(export.to_owned()));
        }

        ensure!(
            self.max_recursion_depth <= MAX_RECURSION_DEPTH,
            Error::RecursionDepthTooLarge(self.max_recursion_depth)
        );
        Ok(())
    }
}

fn check_stage(library: &ShaderLibrary, name: &str, stage: ShaderStage) -> Result<()> {
    let export = library
        .export(name)
        .ok_or_else(|| Error::UnknownExport(name.to_owned()))?;
    ensure!(
        export.stage() == stage,
        Error::WrongShaderStage {
            export: name.to_owned(),
            expected: stage,
        }
    );
    Ok(())
}

/// Ray tracing pipeline builder to easily create raytracing pipelines.
pub struct RayTracingPipelineBuilder {
    inner: RayTracingPipelineCreateInfo,
}

impl RayTracingPipelineBuilder {
    /// Create a new raytracing pipeline with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: RayTracingPipelineCreateInfo {
                name: name.into(),
                library: None,
                hit_groups: vec![],
                local_root_signatures: vec![],
                shader_configs: vec![],
                max_recursion_depth: 1,
                global_root_signature: None,
                subobjects: vec![],
            },
        }
    }

    /// Set the shader library
    pub fn library(mut self, library: ShaderLibrary) -> Self {
        self.inner.library = Some(library);
        self
    }

    /// Add a hit group
    pub fn hit_group(mut self, group: HitGroup) -> Self {
        self.inner.hit_groups.push(group);
        self
    }

    /// Associate a local root signature with a set of exports or hit groups.
    pub fn local_root_signature<D: Device>(mut self, signature: &RootSignature<D>, exports: &[&str]) -> Self {
        if signature.scope() != RootSignatureScope::Local {
            warn!("Global root signature {:?} used as a local root signature", signature.handle());
        }
        self.inner.local_root_signatures.push(LocalRootSignatureAssociation {
            handle: signature.handle(),
            arguments: signature.desc().argument_kinds(),
            exports: exports.iter().map(|export| export.to_string()).collect(),
        });
        self
    }

    /// Associate a shader config with a set of exports or hit groups.
    pub fn shader_config(mut self, config: ShaderConfig, exports: &[&str]) -> Self {
        self.inner.shader_configs.push(ShaderConfigAssociation {
            config,
            exports: exports.iter().map(|export| export.to_string()).collect(),
        });
        self
    }

    /// Set the max recursion depth for this pipeline
    pub fn max_recursion_depth(mut self, depth: u32) -> Self {
        self.inner.max_recursion_depth = depth;
        self
    }

    /// Set the global root signature
    pub fn global_root_signature<D: Device>(mut self, signature: &RootSignature<D>) -> Self {
        if signature.scope() != RootSignatureScope::Global {
            warn!("Local root signature {:?} used as the global root signature", signature.handle());
        }
        self.inner.global_root_signature = Some(signature.handle());
        self
    }

    /// Get the pipeline name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Build the pipeline create info, resolving subobject order and association indices.
    pub fn build(mut self) -> RayTracingPipelineCreateInfo {
        let mut subobjects = vec![];
        if let Some(library) = &self.inner.library {
            subobjects.push(StateSubobject::DxilLibrary {
                exports: library.exports().iter().map(|export| export.name().to_owned()).collect(),
            });
        }
        subobjects.extend(self.inner.hit_groups.iter().cloned().map(StateSubobject::HitGroup));
        for association in &self.inner.local_root_signatures {
            subobjects.push(StateSubobject::LocalRootSignature(association.handle));
            subobjects.push(StateSubobject::ExportsAssociation {
                subobject: subobjects.len() - 1,
                exports: association.exports.clone(),
            });
        }
        for association in &self.inner.shader_configs {
            subobjects.push(StateSubobject::ShaderConfig(association.config));
            subobjects.push(StateSubobject::ExportsAssociation {
                subobject: subobjects.len() - 1,
                exports: association.exports.clone(),
            });
        }
        subobjects.push(StateSubobject::PipelineConfig {
            max_recursion_depth: self.inner.max_recursion_depth,
        });
        if let Some(global) = self.inner.global_root_signature {
            subobjects.push(StateSubobject::GlobalRootSignature(global));
        }
        self.inner.subobjects = subobjects;
        self.inner
    }
}

/// An assembled ray tracing pipeline. Immutable, destroyed when dropped.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct PipelineState<D: Device> {
    #[derivative(Debug = "ignore")]
    device: D,
    handle: PipelineHandle,
    name: String,
    library: ShaderLibrary,
    hit_groups: Vec<HitGroup>,
    #[derivative(Debug = "ignore")]
    identifiers: HashMap<String, ShaderIdentifier>,
    local_arguments: HashMap<String, Vec<RootArgumentKind>>,
    shader_configs: Vec<ShaderConfigAssociation>,
    global_root_signature: Option<RootSignatureHandle>,
    max_recursion_depth: u32,
}

impl<D: Device> PipelineState<D> {
    /// Validate `info`, create the pipeline and cache the identifiers of all ray generation and miss exports and all hit groups.
    pub fn assemble<A: Allocator>(ctx: &GraphicsContext<D, A>, info: RayTracingPipelineCreateInfo) -> Result<Self> {
        info.validate()?;
        let device = ctx.device().clone();
        let handle = device.create_pipeline_state(&info)?;
        #[cfg(feature = "log-objects")]
        trace!("Created new pipeline state {:?}", handle);

        // Exists after validation
        let library = info.library.ok_or(Error::MissingShaderLibrary)?;
        let identifier_size = ctx.shader_table_properties().identifier_size as usize;
        let addressable = library
            .exports()
            .iter()
            .filter(|export| matches!(export.stage(), ShaderStage::RayGeneration | ShaderStage::Miss))
            .map(|export| export.name())
            .chain(info.hit_groups.iter().map(|group| group.name()));
        let mut identifiers = HashMap::new();
        for name in addressable {
            let identifier = match device.shader_identifier(handle, name) {
                Some(identifier) => identifier,
                None => {
                    device.destroy_pipeline_state(handle);
                    return Err(Error::Device(format!("no shader identifier for `{name}`")).into());
                }
            };
            if identifier.len() != identifier_size {
                device.destroy_pipeline_state(handle);
                return Err(Error::Device(format!(
                    "shader identifier for `{name}` is {} bytes, expected {identifier_size}",
                    identifier.len()
                ))
                .into());
            }
            identifiers.insert(name.to_owned(), identifier);
        }

        let mut local_arguments = HashMap::new();
        for association in &info.local_root_signatures {
            for export in &association.exports {
                local_arguments.insert(export.clone(), association.arguments.clone());
            }
        }

        info!(
            "Assembled ray tracing pipeline {} ({} subobjects, {} program identifiers)",
            info.name,
            info.subobjects.len(),
            identifiers.len()
        );
        Ok(Self {
            device,
            handle,
            name: info.name,
            library,
            hit_groups: info.hit_groups,
            identifiers,
            local_arguments,
            shader_configs: info.shader_configs,
            global_root_signature: info.global_root_signature,
            max_recursion_depth: info.max_recursion_depth,
        })
    }

    /// Program identifier of a ray generation export, miss export or hit group.
    /// # Errors
    /// [`Error::UnknownExport`] if there is no such program.
    pub fn identifier(&self, name: &str) -> Result<&ShaderIdentifier> {
        self.identifiers
            .get(name)
            .ok_or_else(|| Error::UnknownExport(name.to_owned()).into())
    }

    /// The shader record arguments expected by the local root signature of an export or hit group. A hit group without
    /// its own association uses the one of its closest hit or any hit export. Programs without a local root signature
    /// take no arguments.
    pub fn local_root_arguments(&self, name: &str) -> &[RootArgumentKind] {
        if let Some(arguments) = self.local_arguments.get(name) {
            return arguments;
        }
        self.hit_groups
            .iter()
            .find(|group| group.name() == name)
            .and_then(|group| {
                self.local_arguments
                    .get(group.closest_hit())
                    .or_else(|| group.any_hit_export().and_then(|any_hit| self.local_arguments.get(any_hit)))
            })
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Shader config that applies to an export or hit group.
    pub fn shader_config(&self, name: &str) -> Option<ShaderConfig> {
        self.shader_configs
            .iter()
            .find(|association| association.exports.iter().any(|export| export == name))
            .map(|association| association.config)
    }

    /// Get the raw pipeline handle
    pub fn handle(&self) -> PipelineHandle {
        self.handle
    }

    /// Pipeline name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shader library
    pub fn library(&self) -> &ShaderLibrary {
        &self.library
    }

    /// The hit groups
    pub fn hit_groups(&self) -> &[HitGroup] {
        &self.hit_groups
    }

    /// The global root signature, bound before dispatching
    pub fn global_root_signature(&self) -> Option<RootSignatureHandle> {
        self.global_root_signature
    }

    /// Max recursion depth
    pub fn max_recursion_depth(&self) -> u32 {
        self.max_recursion_depth
    }
}

impl<D: Device> Drop for PipelineState<D> {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying pipeline state {:?}", self.handle);
        self.device.destroy_pipeline_state(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::shader::ShaderExport;

    fn library() -> ShaderLibrary {
        ShaderLibrary::from_bytecode(
            vec![],
            vec![
                ShaderExport::new("rayGen", ShaderStage::RayGeneration),
                ShaderExport::new("miss", ShaderStage::Miss),
                ShaderExport::new("chs", ShaderStage::ClosestHit),
            ],
        )
    }

    fn builder() -> RayTracingPipelineBuilder {
        RayTracingPipelineBuilder::new("test")
            .library(library())
            .hit_group(HitGroup::new("HitGroup", "chs"))
            .max_recursion_depth(1)
    }

    fn error_of(info: RayTracingPipelineCreateInfo) -> Error {
        match info.validate() {
            Ok(()) => panic!("validation should fail"),
            Err(err) => err.downcast::<Error>().expect("deimos error"),
        }
    }

    #[test]
    fn subobject_order() {
        let info = builder()
            .shader_config(ShaderConfig::new(12, 8), &["rayGen", "miss", "chs"])
            .build();
        let subobjects = info.subobjects();
        assert!(matches!(subobjects[0], StateSubobject::DxilLibrary { .. }));
        assert!(matches!(subobjects[1], StateSubobject::HitGroup(_)));
        assert!(matches!(subobjects[2], StateSubobject::ShaderConfig(_)));
        assert_eq!(
            subobjects[3],
            StateSubobject::ExportsAssociation {
                subobject: 2,
                exports: vec!["rayGen".into(), "miss".into(), "chs".into()],
            }
        );
        assert!(matches!(subobjects[4], StateSubobject::PipelineConfig { max_recursion_depth: 1 }));
        assert!(info.validate().is_ok());
    }

    #[test]
    fn shader_config_through_hit_group() {
        let info = builder()
            .shader_config(ShaderConfig::new(12, 8), &["rayGen", "miss", "HitGroup"])
            .build();
        assert!(info.validate().is_ok());
    }

    #[test]
    fn missing_shader_config() {
        let info = builder()
            .shader_config(ShaderConfig::new(12, 8), &["rayGen", "chs"])
            .build();
        assert!(matches!(error_of(info), Error::MissingShaderConfig(name) if name == "miss"));
    }

    #[test]
    fn duplicate_shader_config() {
        let info = builder()
            .shader_config(ShaderConfig::new(12, 8), &["rayGen", "miss", "chs"])
            .shader_config(ShaderConfig::new(16, 8), &["HitGroup"])
            .build();
        assert!(matches!(error_of(info), Error::DuplicateShaderConfig(name) if name == "chs"));
    }

    #[test]
    fn limits() {
        let info = builder()
            .shader_config(ShaderConfig::new(12, 36), &["rayGen", "miss", "chs"])
            .build();
        assert!(matches!(error_of(info), Error::AttributeSizeTooLarge(36)));

        let info = builder()
            .shader_config(ShaderConfig::new(12, 8), &["rayGen", "miss", "chs"])
            .max_recursion_depth(32)
            .build();
        assert!(matches!(error_of(info), Error::RecursionDepthTooLarge(32)));
    }

    #[test]
    fn hit_group_stage_checked() {
        let info = builder()
            .hit_group(HitGroup::new("Broken", "miss"))
            .shader_config(ShaderConfig::new(12, 8), &["rayGen", "miss", "chs"])
            .build();
        assert!(matches!(error_of(info), Error::WrongShaderStage { .. }));
    }

    #[test]
    fn requires_library_and_ray_generation() {
        let info = RayTracingPipelineBuilder::new("empty").build();
        assert!(matches!(error_of(info), Error::MissingShaderLibrary));

        let info = RayTracingPipelineBuilder::new("no raygen")
            .library(ShaderLibrary::from_bytecode(vec![], vec![ShaderExport::new("miss", ShaderStage::Miss)]))
            .shader_config(ShaderConfig::new(12, 8), &["miss"])
            .build();
        assert!(matches!(error_of(info), Error::MissingRayGeneration));
    }
}
