// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _};
use ash::util::read_spv;
use ash::vk;
use quadrant_render::vertex::AttributeFormat;
use quadrant_render::{QuadVertex, RenderError, Result};
use tracing::{debug, warn};

/// Length of the sampler array in `quad.frag`.
pub const TEXTURE_SLOTS: u32 = 32;

const PUSH_CONSTANT_BYTES: u32 = size_of::<[f32; 16]>() as u32;

const QUAD_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/quad.vert.spv"));
const QUAD_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/quad.frag.spv"));

pub struct ShaderCode {
    pub vert: Vec<u32>,
    pub frag: Vec<u32>,
}

/// SPIR-V for the quad program: the build-time binaries, or `quad.vert.spv`
/// and `quad.frag.spv` from `dir` when an override directory is configured.
pub fn load_shader_code(dir: Option<&Path>) -> Result<ShaderCode> {
    match dir {
        Some(dir) => Ok(ShaderCode {
            vert: read_spv_file(&dir.join("quad.vert.spv"))?,
            frag: read_spv_file(&dir.join("quad.frag.spv"))?,
        }),
        None => Ok(ShaderCode {
            vert: read_spv(&mut Cursor::new(QUAD_VERT)).context("read_spv(quad.vert)")?,
            frag: read_spv(&mut Cursor::new(QUAD_FRAG)).context("read_spv(quad.frag)")?,
        }),
    }
}

fn read_spv_file(path: &Path) -> Result<Vec<u32>> {
    let shader_err = |source| RenderError::ShaderLoad {
        path: path.to_path_buf(),
        source,
    };
    let bytes = fs::read(path).map_err(shader_err)?;
    read_spv(&mut Cursor::new(&bytes)).map_err(shader_err)
}

pub fn vk_format(format: AttributeFormat) -> vk::Format {
    match format {
        AttributeFormat::Float => vk::Format::R32_SFLOAT,
        AttributeFormat::Float2 => vk::Format::R32G32_SFLOAT,
        AttributeFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
        AttributeFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
        AttributeFormat::UInt => vk::Format::R32_UINT,
    }
}

pub fn vertex_attributes() -> Vec<vk::VertexInputAttributeDescription> {
    QuadVertex::ATTRIBUTES
        .iter()
        .map(|a| vk::VertexInputAttributeDescription {
            location: a.location,
            binding: 0,
            format: vk_format(a.format),
            offset: a.offset,
        })
        .collect()
}

/// Descriptor set layout and pipeline layout shared by every quad pipeline.
pub struct QuadLayout {
    pub set_layout: vk::DescriptorSetLayout,
    pub pipeline_layout: vk::PipelineLayout,
}

impl QuadLayout {
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        let binding = vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: TEXTURE_SLOTS,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        };
        let set_ci = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: 1,
            p_bindings: &binding,
            ..Default::default()
        };
        let set_layout = unsafe { device.create_descriptor_set_layout(&set_ci, None) }
            .context("create_descriptor_set_layout")?;

        let push = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: PUSH_CONSTANT_BYTES,
        };
        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: 1,
            p_set_layouts: &set_layout,
            push_constant_range_count: 1,
            p_push_constant_ranges: &push,
            ..Default::default()
        };
        let pipeline_layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .context("create_pipeline_layout")?;

        Ok(Self {
            set_layout,
            pipeline_layout,
        })
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

unsafe fn shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * 4,
        ..Default::default()
    };
    let module = unsafe { device.create_shader_module(&ci, None) }.context("create_shader_module")?;
    Ok(module)
}

// STRICT: `pass` MUST have the color format the pipeline will render into.
// On swapchain format change, the swapchain pipeline must be rebuilt before recording.
pub unsafe fn create_quad_pipeline(
    device: &ash::Device,
    cache: vk::PipelineCache,
    layout: &QuadLayout,
    pass: vk::RenderPass,
    code: &ShaderCode,
) -> Result<vk::Pipeline> {
    let vs = unsafe { shader_module(device, &code.vert)? };
    let fs = match unsafe { shader_module(device, &code.frag) } {
        Ok(fs) => fs,
        Err(e) => {
            unsafe { device.destroy_shader_module(vs, None) };
            return Err(e);
        }
    };
    let entry = c"main";

    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
    ];

    let binding = vk::VertexInputBindingDescription {
        binding: 0,
        stride: QuadVertex::STRIDE,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let attributes = vertex_attributes();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &binding,
        vertex_attribute_description_count: attributes.len() as u32,
        p_vertex_attribute_descriptions: attributes.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: dyn_states.len() as u32,
        p_dynamic_states: dyn_states.as_ptr(),
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };
    // quads may be mirrored by negative scale
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::NONE,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: vk::TRUE,
        depth_write_enable: vk::TRUE,
        depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::TRUE,
        src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
        dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        color_blend_op: vk::BlendOp::ADD,
        src_alpha_blend_factor: vk::BlendFactor::ONE,
        dst_alpha_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        alpha_blend_op: vk::BlendOp::ADD,
        color_write_mask: vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A,
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_depth_stencil_state: &depth_stencil,
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout: layout.pipeline_layout,
        render_pass: pass,
        subpass: 0,
        ..Default::default()
    };

    let created = unsafe {
        device.create_graphics_pipelines(cache, std::slice::from_ref(&pipeline_info), None)
    };
    unsafe {
        device.destroy_shader_module(vs, None);
        device.destroy_shader_module(fs, None);
    }
    match created {
        Ok(p) => Ok(p[0]),
        Err((_, err)) => Err(anyhow!("create_graphics_pipelines failed: {err:?}").into()),
    }
}

fn hex_bytes(b: &[u8]) -> String {
    let mut s = String::with_capacity(b.len() * 2);
    for x in b {
        use std::fmt::Write as _;
        let _ = write!(&mut s, "{:02x}", x);
    }
    s
}

/// One cache file per driver build, next to the binary.
pub fn pipeline_cache_path(props: &vk::PhysicalDeviceProperties) -> PathBuf {
    let uuid = hex_bytes(&props.pipeline_cache_uuid);
    PathBuf::from(format!(
        "quadrant_pipeline_cache_{:04x}_{:04x}_{:08x}_{}.bin",
        props.vendor_id, props.device_id, props.driver_version, uuid
    ))
}

pub unsafe fn create_or_load_pipeline_cache(
    device: &ash::Device,
    path: &Path,
) -> Result<vk::PipelineCache> {
    let data = fs::read(path).ok();
    if data.is_some() {
        debug!("vk: pipeline cache loaded from {}", path.display());
    }
    let bytes = data.as_deref().unwrap_or(&[]);
    let ci = vk::PipelineCacheCreateInfo {
        s_type: vk::StructureType::PIPELINE_CACHE_CREATE_INFO,
        initial_data_size: bytes.len(),
        p_initial_data: bytes.as_ptr().cast(),
        ..Default::default()
    };
    match unsafe { device.create_pipeline_cache(&ci, None) } {
        Ok(cache) => Ok(cache),
        // drivers may reject stale data; start empty
        Err(_) if !bytes.is_empty() => {
            warn!("vk: discarding unusable pipeline cache {}", path.display());
            let empty = vk::PipelineCacheCreateInfo::default();
            let cache = unsafe { device.create_pipeline_cache(&empty, None) }
                .context("create_pipeline_cache")?;
            Ok(cache)
        }
        Err(e) => Err(anyhow!("create_pipeline_cache: {e:?}").into()),
    }
}

pub unsafe fn save_pipeline_cache(
    device: &ash::Device,
    cache: vk::PipelineCache,
    path: &Path,
) -> Result<()> {
    // an empty cache or a lost device is not worth reporting
    if let Ok(bytes) = unsafe { device.get_pipeline_cache_data(cache) } {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        fs::write(path, &bytes).context("write pipeline cache")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_follow_vertex_layout() {
        let attrs = vertex_attributes();
        assert_eq!(attrs.len(), QuadVertex::ATTRIBUTES.len());
        assert_eq!(attrs[0].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(attrs[5].format, vk::Format::R32_UINT);
        assert!(attrs.windows(2).all(|w| w[0].offset < w[1].offset));
        assert!(attrs.iter().all(|a| a.offset < QuadVertex::STRIDE));
    }

    #[test]
    fn embedded_shaders_are_spirv() {
        let code = load_shader_code(None).unwrap();
        assert_eq!(code.vert[0], 0x0723_0203);
        assert_eq!(code.frag[0], 0x0723_0203);
    }

    #[test]
    fn missing_override_is_a_shader_load_error() {
        let dir = std::env::temp_dir().join("quadrant-no-such-shader-dir");
        match load_shader_code(Some(&dir)) {
            Err(RenderError::ShaderLoad { path, .. }) => {
                assert!(path.ends_with("quad.vert.spv"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("missing override directory loaded"),
        }
    }

    #[test]
    fn cache_name_is_device_specific() {
        let mut props = vk::PhysicalDeviceProperties {
            vendor_id: 0x10de,
            device_id: 0x2204,
            ..Default::default()
        };
        props.pipeline_cache_uuid[0] = 0xab;
        let name = pipeline_cache_path(&props);
        let name = name.to_string_lossy();
        assert!(name.starts_with("quadrant_pipeline_cache_10de_2204_"));
        assert!(name.contains("ab00"));
    }
}
