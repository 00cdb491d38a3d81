//! A shader compiler that checks library source without producing real bytecode.

use crate::pipeline::shader::ShaderCompiler;

/// Prefix of the bytecode produced by [`HeadlessCompiler`]. The source text follows it.
pub const BYTECODE_MAGIC: &[u8] = b"DXIL";

/// Accepts library profiles (`lib_*`) and source with balanced braces. The produced bytecode embeds the source, so
/// the headless device can check that every export of a pipeline is defined in its library.
#[derive(Debug, Default, Copy, Clone)]
pub struct HeadlessCompiler;

impl HeadlessCompiler {
    /// Create a new compiler
    pub fn new() -> Self {
        Self
    }
}

impl ShaderCompiler for HeadlessCompiler {
    fn compile(&self, source: &str, source_name: &str, target_profile: &str) -> Result<Vec<u8>, String> {
        if !target_profile.starts_with("lib_") {
            return Err(format!("{source_name}: target profile `{target_profile}` is not a library profile"));
        }
        let mut depth = 0i64;
        for (number, line) in source.lines().enumerate() {
            for c in line.chars() {
                match c {
                    '{' => depth += 1,
                    '}' => depth -= 1,
                    _ => {}
                }
                if depth < 0 {
                    return Err(format!("{source_name}({}): error: unexpected '}}'", number + 1));
                }
            }
        }
        if depth != 0 {
            return Err(format!("{source_name}: error: expected '}}' at end of file"));
        }
        let mut bytecode = BYTECODE_MAGIC.to_vec();
        bytecode.extend_from_slice(source.as_bytes());
        Ok(bytecode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_library_source() {
        let bytecode = HeadlessCompiler.compile("void rayGen() {}", "test.hlsl", "lib_6_3").unwrap();
        assert!(bytecode.starts_with(BYTECODE_MAGIC));
    }

    #[test]
    fn reports_diagnostics() {
        let err = HeadlessCompiler.compile("void rayGen() {\n", "test.hlsl", "lib_6_3").unwrap_err();
        assert!(err.contains("test.hlsl"));
        let err = HeadlessCompiler.compile("void rayGen() {}\n}", "test.hlsl", "lib_6_3").unwrap_err();
        assert!(err.starts_with("test.hlsl(2)"));
        assert!(HeadlessCompiler.compile("", "test.hlsl", "cs_6_3").is_err());
    }
}
