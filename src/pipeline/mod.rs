//! Ray tracing pipeline state, its root signatures and the shader binding table that feeds it.

pub mod raytracing;
pub mod root_signature;
pub mod shader;
pub mod shader_binding_table;
pub mod topology;
