//! Root signatures declare the resource bindings of shader programs.
//!
//! A local root signature describes the arguments stored in the shader record of each program it is associated
//! with. Every root parameter takes one 8-byte slot in the record: root descriptors hold a GPU address,
//! descriptor tables hold a [`DescriptorHandle`](crate::core::handle::DescriptorHandle). The global root signature
//! is bound once per dispatch and shared by all programs.

use anyhow::Result;

use crate::core::device::Device;
use crate::core::error::Error;
use crate::core::handle::RootSignatureHandle;

/// Whether a root signature is bound per shader record or per dispatch.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RootSignatureScope {
    /// Arguments live in shader records
    Local,
    /// Arguments are set on the command list
    Global,
}

/// Type of the descriptors in a descriptor range.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DescriptorRangeType {
    /// Shader resource views (`t` registers)
    Srv,
    /// Unordered access views (`u` registers)
    Uav,
    /// Constant buffer views (`b` registers)
    Cbv,
}

/// A range of consecutive descriptors in a descriptor table.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DescriptorRange {
    /// Descriptor type
    pub ty: DescriptorRangeType,
    /// First shader register
    pub base_register: u32,
    /// Register space
    pub space: u32,
    /// Number of descriptors
    pub count: u32,
    /// Offset in descriptors from the start of the table
    pub offset_in_table: u32,
}

impl DescriptorRange {
    /// A range of `count` descriptors in register space 0.
    pub fn new(ty: DescriptorRangeType, base_register: u32, count: u32, offset_in_table: u32) -> Self {
        Self {
            ty,
            base_register,
            space: 0,
            count,
            offset_in_table,
        }
    }
}

/// The kind of value a root parameter consumes from a shader record.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RootArgumentKind {
    /// An 8-byte GPU virtual address
    GpuAddress,
    /// An 8-byte GPU descriptor handle
    DescriptorTable,
}

/// A single root parameter.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum RootParameter {
    /// Root constant buffer view
    ConstantBufferView {
        /// Shader register
        register: u32,
        /// Register space
        space: u32,
    },
    /// Root shader resource view
    ShaderResourceView {
        /// Shader register
        register: u32,
        /// Register space
        space: u32,
    },
    /// Root unordered access view
    UnorderedAccessView {
        /// Shader register
        register: u32,
        /// Register space
        space: u32,
    },
    /// Table of descriptor ranges
    DescriptorTable(Vec<DescriptorRange>),
}

impl RootParameter {
    /// Root constant buffer view in space 0
    pub fn cbv(register: u32) -> Self {
        Self::ConstantBufferView {
            register,
            space: 0,
        }
    }

    /// Root shader resource view in space 0
    pub fn srv(register: u32) -> Self {
        Self::ShaderResourceView {
            register,
            space: 0,
        }
    }

    /// Root unordered access view in space 0
    pub fn uav(register: u32) -> Self {
        Self::UnorderedAccessView {
            register,
            space: 0,
        }
    }

    /// The argument this parameter consumes from a shader record
    pub fn argument_kind(&self) -> RootArgumentKind {
        match self {
            RootParameter::DescriptorTable(_) => RootArgumentKind::DescriptorTable,
            _ => RootArgumentKind::GpuAddress,
        }
    }
}

/// Description of a root signature, serialized by the device.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct RootSignatureDesc {
    scope: RootSignatureScope,
    parameters: Vec<RootParameter>,
}

impl RootSignatureDesc {
    /// Create an empty local root signature description
    pub fn local() -> Self {
        Self {
            scope: RootSignatureScope::Local,
            parameters: vec![],
        }
    }

    /// Create an empty global root signature description
    pub fn global() -> Self {
        Self {
            scope: RootSignatureScope::Global,
            parameters: vec![],
        }
    }

    /// Append a root parameter
    pub fn parameter(mut self, parameter: RootParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Append a descriptor table parameter
    pub fn descriptor_table(self, ranges: impl Into<Vec<DescriptorRange>>) -> Self {
        self.parameter(RootParameter::DescriptorTable(ranges.into()))
    }

    /// The scope
    pub fn scope(&self) -> RootSignatureScope {
        self.scope
    }

    /// The root parameters, in order
    pub fn parameters(&self) -> &[RootParameter] {
        &self.parameters
    }

    /// The shader record arguments a program with this root signature expects, in order
    pub fn argument_kinds(&self) -> Vec<RootArgumentKind> {
        self.parameters.iter().map(RootParameter::argument_kind).collect()
    }
}

/// A compiled root signature. Destroyed when dropped.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct RootSignature<D: Device> {
    #[derivative(Debug = "ignore")]
    device: D,
    handle: RootSignatureHandle,
    desc: RootSignatureDesc,
}

impl<D: Device> RootSignature<D> {
    /// Serialize and create a root signature.
    /// # Errors
    /// [`Error::RootSignatureSerialization`] with the serializer diagnostic if the description is invalid.
    pub fn new(device: &D, desc: RootSignatureDesc) -> Result<Self> {
        let blob = device
            .serialize_root_signature(&desc)
            .map_err(Error::RootSignatureSerialization)?;
        let handle = device.create_root_signature(&blob)?;
        #[cfg(feature = "log-objects")]
        trace!("Created new {:?} root signature {:?}", desc.scope(), handle);
        Ok(Self {
            device: device.clone(),
            handle,
            desc,
        })
    }

    /// Get the raw root signature handle
    pub fn handle(&self) -> RootSignatureHandle {
        self.handle
    }

    /// The description this root signature was created from
    pub fn desc(&self) -> &RootSignatureDesc {
        &self.desc
    }

    /// The scope of this root signature
    pub fn scope(&self) -> RootSignatureScope {
        self.desc.scope()
    }
}

impl<D: Device> Drop for RootSignature<D> {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying root signature {:?}", self.handle);
        self.device.destroy_root_signature(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_kinds_follow_parameters() {
        let desc = RootSignatureDesc::local()
            .parameter(RootParameter::cbv(0))
            .descriptor_table(vec![DescriptorRange::new(DescriptorRangeType::Srv, 1, 1, 0)]);
        assert_eq!(desc.argument_kinds(), vec![RootArgumentKind::GpuAddress, RootArgumentKind::DescriptorTable]);
        assert_eq!(desc.scope(), RootSignatureScope::Local);
    }
}
