// SPDX-License-Identifier: CEPL-1.0
use std::fmt::Write as _;

use anyhow::anyhow;
use glow::HasContext as _;
use quadrant_render::Result;

pub const VERTEX_SRC: &str = r#"#version 330 core
layout(location = 0) in vec3 a_Position;
layout(location = 1) in vec4 a_Color;
layout(location = 2) in vec2 a_TexCoord;
layout(location = 3) in float a_TexIndex;
layout(location = 4) in float a_TilingFactor;
layout(location = 5) in uint a_ObjectID;

uniform mat4 u_ViewProjection;

out vec4 v_Color;
out vec2 v_TexCoord;
flat out float v_TexIndex;
out float v_TilingFactor;
flat out uint v_ObjectID;

void main() {
    v_Color = a_Color;
    v_TexCoord = a_TexCoord;
    v_TexIndex = a_TexIndex;
    v_TilingFactor = a_TilingFactor;
    v_ObjectID = a_ObjectID;
    gl_Position = u_ViewProjection * vec4(a_Position, 1.0);
}
"#;

/// Fragment program for `slots` samplers. GLSL 3.30 only allows constant
/// sampler indices, so the slot is picked through a switch.
pub fn fragment_source(slots: u32) -> String {
    let mut src = String::from(
        "#version 330 core\n\
         in vec4 v_Color;\n\
         in vec2 v_TexCoord;\n\
         flat in float v_TexIndex;\n\
         in float v_TilingFactor;\n\
         flat in uint v_ObjectID;\n",
    );
    let _ = writeln!(src, "uniform sampler2D u_Textures[{slots}];");
    src.push_str(
        "layout(location = 0) out vec4 o_Color;\n\
         void main() {\n\
         \x20   vec2 uv = v_TexCoord * v_TilingFactor;\n\
         \x20   vec4 texel = vec4(1.0);\n\
         \x20   switch (int(v_TexIndex)) {\n",
    );
    for n in 0..slots {
        let _ = writeln!(
            src,
            "        case {n}: texel = texture(u_Textures[{n}], uv); break;"
        );
    }
    src.push_str(
        "    }\n\
         \x20   o_Color = texel * v_Color;\n\
         \x20   if (o_Color.a == 0.0) {\n\
         \x20       discard;\n\
         \x20   }\n\
         }\n",
    );
    src
}

unsafe fn compile_shader(gl: &glow::Context, kind: u32, src: &str) -> Result<glow::Shader> {
    let stage = if kind == glow::VERTEX_SHADER { "vert" } else { "frag" };
    unsafe {
        let shader = gl.create_shader(kind).map_err(anyhow::Error::msg)?;
        gl.shader_source(shader, src);
        gl.compile_shader(shader);
        if !gl.get_shader_compile_status(shader) {
            let log = gl.get_shader_info_log(shader);
            gl.delete_shader(shader);
            return Err(anyhow!("GL {stage} compile: {log}").into());
        }
        Ok(shader)
    }
}

/// Links the quad program and points `u_Textures[i]` at texture unit `i`.
pub fn compile_program(gl: &glow::Context, slots: u32) -> Result<glow::Program> {
    unsafe {
        let vs = compile_shader(gl, glow::VERTEX_SHADER, VERTEX_SRC)?;
        let fs = match compile_shader(gl, glow::FRAGMENT_SHADER, &fragment_source(slots)) {
            Ok(fs) => fs,
            Err(e) => {
                gl.delete_shader(vs);
                return Err(e);
            }
        };

        let program = gl.create_program().map_err(anyhow::Error::msg)?;
        gl.attach_shader(program, vs);
        gl.attach_shader(program, fs);
        gl.link_program(program);
        gl.detach_shader(program, vs);
        gl.detach_shader(program, fs);
        gl.delete_shader(vs);
        gl.delete_shader(fs);

        if !gl.get_program_link_status(program) {
            let log = gl.get_program_info_log(program);
            gl.delete_program(program);
            return Err(anyhow!("GL link: {log}").into());
        }

        let units: Vec<i32> = (0..slots as i32).collect();
        gl.use_program(Some(program));
        let loc = gl.get_uniform_location(program, "u_Textures");
        gl.uniform_1_i32_slice(loc.as_ref(), &units);
        gl.use_program(None);

        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_case_per_slot() {
        let src = fragment_source(8);
        assert!(src.contains("uniform sampler2D u_Textures[8];"));
        assert_eq!(src.matches("case ").count(), 8);
        assert!(src.contains("case 7: texel = texture(u_Textures[7], uv); break;"));
        assert!(!src.contains("u_Textures[8], uv"));
    }

    #[test]
    fn fragment_inputs_match_vertex_outputs() {
        let frag = fragment_source(1);
        for var in ["v_Color", "v_TexCoord", "v_TexIndex", "v_TilingFactor", "v_ObjectID"] {
            assert!(VERTEX_SRC.contains(&format!(" {var};")));
            assert!(frag.contains(&format!(" {var};")));
        }
    }
}
