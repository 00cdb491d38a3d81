//! Exposes the deimos error type

use std::path::PathBuf;
use std::sync::PoisonError;

use ash::vk;
use thiserror::Error;

use crate::pipeline::shader::ShaderStage;

/// Error type that deimos can return. Functions return these wrapped in an [`anyhow::Error`],
/// use [`anyhow::Error::downcast_ref`] to inspect them.
#[derive(Error, Debug)]
pub enum Error {
    /// The device does not expose a usable ray tracing tier.
    #[error("Ray tracing is not supported by this device.")]
    RayTracingUnsupported,
    /// The device reported a shader table alignment of zero.
    #[error("Shader table {0} must be non-zero.")]
    ZeroAlignment(&'static str),
    /// The shader library source could not be read.
    #[error("Could not read shader source `{path}`")]
    ShaderSourceUnavailable {
        /// Path that was opened
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },
    /// The shader compiler reported diagnostics.
    #[error("Shader compilation failed:\n{0}")]
    ShaderCompilation(String),
    /// Root signature serialization failed. Contains the serializer diagnostic.
    #[error("Root signature serialization failed: {0}")]
    RootSignatureSerialization(String),
    /// A pipeline was assembled without a shader library.
    #[error("No shader library was given to the pipeline builder.")]
    MissingShaderLibrary,
    /// Tried to build a bottom level acceleration structure without geometry.
    #[error("Cannot build an acceleration structure without geometry.")]
    EmptyGeometry,
    /// Non-indexed triangle geometry needs a non-zero multiple of three vertices.
    #[error("Invalid vertex count {0}, expected a non-zero multiple of 3.")]
    InvalidVertexCount(u32),
    /// The vertex stride does not fit a single vertex position.
    #[error("Vertex stride {stride} is smaller than the vertex format size {required}.")]
    VertexStrideTooSmall {
        /// Stride that was given
        stride: vk::DeviceSize,
        /// Size of the vertex format
        required: vk::DeviceSize,
    },
    /// The vertex format cannot be used as acceleration structure position data.
    #[error("Unsupported vertex format {0:?}")]
    UnsupportedVertexFormat(vk::Format),
    /// Tried to build a top level acceleration structure without instances.
    #[error("Cannot build a top level acceleration structure without instances.")]
    EmptyInstanceSet,
    /// The number of instances changed between two updates of the same top level structure.
    #[error("Instance count changed from {expected} to {actual}. Top level updates cannot add or remove instances.")]
    InstanceCountChanged {
        /// Instance count at build time
        expected: usize,
        /// Instance count of the update
        actual: usize,
    },
    /// Something other than the transform changed for an instance during an update.
    #[error("Instance {0} changed more than its transform during an update.")]
    InstanceLayoutChanged(usize),
    /// A value does not fit in the bits available for it.
    #[error("{what} {value} out of range (max {max})")]
    ValueOutOfRange {
        /// Name of the value
        what: &'static str,
        /// The value that was given
        value: u64,
        /// The largest allowed value
        max: u64,
    },
    /// An export or hit group name that the pipeline does not know.
    #[error("Unknown shader export `{0}`")]
    UnknownExport(String),
    /// Two exports or hit groups use the same name.
    #[error("Export name `{0}` is used more than once.")]
    DuplicateExport(String),
    /// A hit group refers to an export of the wrong stage.
    #[error("Export `{export}` is not a {expected:?} shader.")]
    WrongShaderStage {
        /// Name of the export
        export: String,
        /// Stage the hit group slot requires
        expected: ShaderStage,
    },
    /// A local root signature was added without any exports.
    #[error("Local root signature {0} is not associated with any export.")]
    UnassociatedRootSignature(usize),
    /// More than one local root signature is associated with an export.
    #[error("Export `{0}` is associated with more than one local root signature.")]
    ConflictingRootSignature(String),
    /// An export is not covered by any shader config.
    #[error("Export `{0}` is not associated with a shader config.")]
    MissingShaderConfig(String),
    /// An export is covered by more than one shader config.
    #[error("Export `{0}` is associated with more than one shader config.")]
    DuplicateShaderConfig(String),
    /// The pipeline has no ray generation shader.
    #[error("Ray tracing pipeline has no ray generation export.")]
    MissingRayGeneration,
    /// Recursion depth is above the hardware limit.
    #[error("Max recursion depth {0} is larger than the supported maximum.")]
    RecursionDepthTooLarge(u32),
    /// Attribute size is above the hardware limit.
    #[error("Max attribute size {0} is larger than the supported maximum.")]
    AttributeSizeTooLarge(u32),
    /// A root descriptor would be written to an offset that is not 8-byte aligned.
    #[error("Root argument in shader record {record} lands on misaligned offset {offset}.")]
    MisalignedRootDescriptor {
        /// Index of the record in the table
        record: usize,
        /// Offset of the argument within the record
        offset: u64,
    },
    /// A shader record does not fit the maximum record stride.
    #[error("Shader record of {size} bytes exceeds the maximum stride of {max} bytes.")]
    ShaderRecordTooLarge {
        /// Aligned size of the record
        size: u64,
        /// Maximum stride
        max: u64,
    },
    /// The records in a shader table region do not match the instance topology.
    #[error("Shader table {region} region has {actual} records, expected {expected}.")]
    ShaderTableRegionMismatch {
        /// Region name
        region: &'static str,
        /// Record count required by the topology
        expected: usize,
        /// Record count that was given
        actual: usize,
    },
    /// The hit group offset of an instance does not match its position in the hit group region.
    #[error("Instance {instance} has hit group offset {actual}, expected {expected}.")]
    HitGroupOffsetMismatch {
        /// Index of the instance
        instance: usize,
        /// Offset required by the instances before it
        expected: u32,
        /// Offset the instance carries
        actual: u32,
    },
    /// Root arguments of a record do not match the local root signature of its export.
    #[error("Root arguments for `{export}` do not match its local root signature: {reason}")]
    RootArgumentMismatch {
        /// Export or hit group name
        export: String,
        /// What did not match
        reason: String,
    },
    /// Mappable buffer expected
    #[error("Requested mappable buffer, but buffer does not have a memory map")]
    UnmappableBuffer,
    /// Buffer write out of range of the buffer
    #[error("Buffer range is not a valid range in the buffer.")]
    BufferViewOutOfRange,
    /// Poisoned mutex
    #[error("Poisoned mutex")]
    PoisonError,
    /// A device call failed.
    #[error("Device error: `{0}`")]
    Device(String),
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Error::PoisonError
    }
}
