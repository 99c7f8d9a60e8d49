//! The mesh's shader program. GLSL source is compiled to SPIR-V with naga at startup.
use anyhow::{format_err, Context, Result};
use naga::back::spv;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::ShaderStage;

/// Transforms the mesh by the pushed matrices and forwards its normal
pub const VERTEX_SHADER_GLSL: &str = r"#version 450
layout(location = 0) in vec3 position;
layout(location = 1) in vec3 normal;

layout(push_constant) uniform Transforms {
    mat4 model;
    mat4 view_projection;
} transforms;

layout(location = 0) out vec3 v_normal;

void main() {
    gl_Position = transforms.view_projection * transforms.model * vec4(position, 1.0);
    v_normal = normal;
}
";

/// Colors each fragment by its interpolated normal
pub const FRAGMENT_SHADER_GLSL: &str = r"#version 450
layout(location = 0) in vec3 v_normal;
layout(location = 0) out vec4 out_color;

void main() {
    out_color = vec4(v_normal * 0.5 + 0.5, 1.0);
}
";

/// Compile GLSL `source` for `stage` into SPIR-V words
pub fn compile(source: &str, stage: ShaderStage) -> Result<Vec<u32>> {
    let module = naga::front::glsl::Frontend::default()
        .parse(&naga::front::glsl::Options::from(stage), source)
        .map_err(|e| format_err!("Failed to parse {:?} shader: {:?}", stage, e))?;

    let info = Validator::new(ValidationFlags::all(), Capabilities::PUSH_CONSTANT)
        .validate(&module)
        .map_err(|e| format_err!("Invalid {:?} shader: {:?}", stage, e))?;

    // Clip space is corrected on the CPU side
    let mut options = spv::Options::default();
    options
        .flags
        .remove(spv::WriterFlags::ADJUST_COORDINATE_SPACE);

    spv::write_vec(&module, &info, &options, None)
        .with_context(|| format!("Failed to emit SPIR-V for {:?} shader", stage))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn vertex_shader_compiles() {
        let words = compile(VERTEX_SHADER_GLSL, ShaderStage::Vertex).unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn fragment_shader_compiles() {
        let words = compile(FRAGMENT_SHADER_GLSL, ShaderStage::Fragment).unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn syntax_errors_are_reported() {
        let err = compile("#version 450\nvoid main() { nope }", ShaderStage::Fragment);
        assert!(err.is_err());
    }
}
