//! Acceleration structure levels

/// The level of an acceleration structure.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
pub enum AccelerationStructureType {
    /// Instances of bottom level structures, with transforms.
    TopLevel,
    /// Triangle geometry.
    BottomLevel,
}
