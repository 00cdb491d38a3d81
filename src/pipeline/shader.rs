//! Shader libraries and their exports.
//!
//! A ray tracing pipeline is built from a single compiled shader library that exports all ray generation, miss and hit
//! programs by name. Compilation is done by an external [`ShaderCompiler`]. The library source is read from disk by
//! [`ShaderLibrary::compile_file`] itself, so an unreadable file and a failed compile are reported separately.

use std::path::Path;

use anyhow::Result;

use crate::core::error::Error;

/// Stage of a shader library export
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ShaderStage {
    /// Ray generation program, the entry point of a dispatch
    RayGeneration,
    /// Executed when a ray hits nothing
    Miss,
    /// Executed for the closest hit of a ray
    ClosestHit,
    /// Executed for every candidate hit of a ray
    AnyHit,
}

/// A named entry point in a shader library.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ShaderExport {
    name: String,
    stage: ShaderStage,
}

impl ShaderExport {
    /// Create a new export
    pub fn new(name: impl Into<String>, stage: ShaderStage) -> Self {
        Self {
            name: name.into(),
            stage,
        }
    }

    /// Export name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Export stage
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }
}

/// Compiles shader library source text into bytecode.
pub trait ShaderCompiler {
    /// Compile `source` for `target_profile`. `source_name` is only used in diagnostics.
    /// On failure, returns the compiler diagnostics as text.
    fn compile(&self, source: &str, source_name: &str, target_profile: &str) -> std::result::Result<Vec<u8>, String>;
}

/// A compiled shader library with the exports the pipeline uses from it.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct ShaderLibrary {
    #[derivative(Debug = "ignore")]
    bytecode: Vec<u8>,
    exports: Vec<ShaderExport>,
}

impl ShaderLibrary {
    /// Wrap precompiled bytecode.
    pub fn from_bytecode(bytecode: Vec<u8>, exports: Vec<ShaderExport>) -> Self {
        Self {
            bytecode,
            exports,
        }
    }

    /// Compile library source text.
    /// # Errors
    /// [`Error::ShaderCompilation`] with the compiler diagnostics.
    pub fn compile_source<C: ShaderCompiler + ?Sized>(
        compiler: &C,
        source: &str,
        source_name: &str,
        target_profile: &str,
        exports: Vec<ShaderExport>,
    ) -> Result<Self> {
        let bytecode = compiler
            .compile(source, source_name, target_profile)
            .map_err(Error::ShaderCompilation)?;
        info!("Compiled shader library {source_name} ({target_profile}, {} bytes)", bytecode.len());
        Ok(Self::from_bytecode(bytecode, exports))
    }

    /// Read and compile a library source file.
    /// # Errors
    /// - [`Error::ShaderSourceUnavailable`] if the file cannot be read.
    /// - [`Error::ShaderCompilation`] with the compiler diagnostics.
    pub fn compile_file<C: ShaderCompiler + ?Sized>(
        compiler: &C,
        path: impl AsRef<Path>,
        target_profile: &str,
        exports: Vec<ShaderExport>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| Error::ShaderSourceUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::compile_source(compiler, &source, &path.display().to_string(), target_profile, exports)
    }

    /// The compiled bytecode
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    /// All exports used from this library
    pub fn exports(&self) -> &[ShaderExport] {
        &self.exports
    }

    /// Look up an export by name
    pub fn export(&self, name: &str) -> Option<&ShaderExport> {
        self.exports.iter().find(|export| export.name == name)
    }

    /// All exports of a given stage, in declaration order
    pub fn exports_of(&self, stage: ShaderStage) -> impl Iterator<Item = &ShaderExport> {
        self.exports.iter().filter(move |export| export.stage == stage)
    }
}
