//! graphics / compute pipeline 的 native 创建
//!
//! layout 由反射结果推导并缓存，这里只负责组装 create info

use std::ffi::CString;

use ash::vk;
use itertools::Itertools;

use crate::error::{RhiError, RhiResult};
use crate::foundation::device::GfxDevice;
use crate::pipelines::shader::GfxShaderModule;
use crate::resources::descs::{GraphicsPipelineDesc, ShaderStageDesc};

/// viewport 和 scissor 总是动态设置
const DYNAMIC_STATES: [vk::DynamicState; 2] = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];

/// 不开启混合，写入全部通道
pub fn opaque_blend_state() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(false)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
}

/// 为每个 color attachment 生成相同的 blend 状态
pub fn color_blend_states(
    blend: Option<vk::PipelineColorBlendAttachmentState>,
    color_attachment_count: usize,
) -> Vec<vk::PipelineColorBlendAttachmentState> {
    vec![blend.unwrap_or_else(opaque_blend_state); color_attachment_count]
}

fn entry_name(stage: &ShaderStageDesc) -> RhiResult<CString> {
    CString::new(stage.entry_point.as_str()).map_err(|e| RhiError::ShaderReflection(e.to_string()))
}

/// 基于 render pass 的 graphics pipeline
pub fn create_graphics_pipeline(
    device: &GfxDevice,
    desc: &GraphicsPipelineDesc,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    color_attachment_count: usize,
    samples: vk::SampleCountFlags,
) -> RhiResult<vk::Pipeline> {
    let _span = tracy_client::span!("create_graphics_pipeline");

    let mut stages = vec![(vk::ShaderStageFlags::VERTEX, &desc.vertex)];
    if let Some(fragment) = &desc.fragment {
        stages.push((vk::ShaderStageFlags::FRAGMENT, fragment));
    }

    let mut modules = Vec::with_capacity(stages.len());
    let result = (|| -> RhiResult<vk::Pipeline> {
        let mut names = Vec::with_capacity(stages.len());
        for (stage, stage_desc) in &stages {
            modules.push(GfxShaderModule::new(device, &stage_desc.spirv, &format!("{}-{:?}", desc.name, stage))?);
            names.push(entry_name(stage_desc)?);
        }
        let shader_stages_info = stages
            .iter()
            .zip_eq(modules.iter().zip_eq(names.iter()))
            .map(|((stage, _), (module, name))| {
                vk::PipelineShaderStageCreateInfo::default().stage(*stage).module(module.handle()).name(name.as_c_str())
            })
            .collect_vec();

        // 顶点和 index
        let vertex_input_state_info = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&desc.vertex_bindings)
            .vertex_attribute_descriptions(&desc.vertex_attributes);
        let input_assembly_info = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(desc.topology)
            .primitive_restart_enable(false);

        // viewport 和 scissor 具体值由 dynamic 决定，但是数量由该 create info 决定
        let viewport_info = vk::PipelineViewportStateCreateInfo::default().viewport_count(1).scissor_count(1);

        let rasterize_state_info = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(desc.polygon_mode)
            .line_width(1.0)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face)
            .depth_bias_enable(false);
        let msaa_info = vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(samples);

        // 混合设置：需要为每个 color attachment 分别指定
        let blend_states = color_blend_states(desc.blend, color_attachment_count);
        let color_blend_info = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&blend_states)
            .blend_constants([0.0, 0.0, 0.0, 0.0]);

        let depth_stencil_info = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_write)
            .depth_compare_op(desc.depth_compare_op)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let dynamic_state_info = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&DYNAMIC_STATES);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages_info)
            .vertex_input_state(&vertex_input_state_info)
            .input_assembly_state(&input_assembly_info)
            .viewport_state(&viewport_info)
            .rasterization_state(&rasterize_state_info)
            .multisample_state(&msaa_info)
            .color_blend_state(&color_blend_info)
            .depth_stencil_state(&depth_stencil_info)
            .dynamic_state(&dynamic_state_info)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(desc.subpass);

        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
        }
        .map_err(|(_, e)| RhiError::creation("graphics pipeline")(e))?;
        Ok(pipelines[0])
    })();

    modules.into_iter().for_each(|module| module.destroy(device));
    let pipeline = result?;
    device.set_object_debug_name(pipeline, &desc.name);
    Ok(pipeline)
}

pub fn create_compute_pipeline(
    device: &GfxDevice,
    shader: &ShaderStageDesc,
    layout: vk::PipelineLayout,
    debug_name: &str,
) -> RhiResult<vk::Pipeline> {
    let _span = tracy_client::span!("create_compute_pipeline");

    let module = GfxShaderModule::new(device, &shader.spirv, debug_name)?;
    let result = entry_name(shader).and_then(|name| {
        let stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module.handle())
            .name(name.as_c_str());
        let pipeline_info = vk::ComputePipelineCreateInfo::default().stage(stage_info).layout(layout);
        unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
        }
        .map(|pipelines| pipelines[0])
        .map_err(|(_, e)| RhiError::creation("compute pipeline")(e))
    });
    module.destroy(device);

    let pipeline = result?;
    device.set_object_debug_name(pipeline, debug_name);
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_state_per_attachment() {
        let states = color_blend_states(None, 2);
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].blend_enable, vk::FALSE);
        assert_eq!(states[1].color_write_mask, vk::ColorComponentFlags::RGBA);

        let additive = opaque_blend_state()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::ONE)
            .dst_color_blend_factor(vk::BlendFactor::ONE);
        let states = color_blend_states(Some(additive), 1);
        assert_eq!(states[0].blend_enable, vk::TRUE);
        assert!(color_blend_states(None, 0).is_empty());
    }
}
