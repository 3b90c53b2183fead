//! 创建资源时使用的描述结构，都是普通的值类型

use ash::vk;

use crate::handles::{
    BufferHandle, ComputePipelineHandle, GraphicsPipelineHandle, RenderPassHandle, SamplerHandle, TextureHandle,
};

/// buffer 所在的内存位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryLocation {
    /// device local，只能通过 copy 写入
    #[default]
    GpuOnly,
    /// host 可见，持久映射，适合每帧写入的数据
    CpuToGpu,
    /// host 可见，用于回读
    GpuToCpu,
}

impl MemoryLocation {
    #[inline]
    pub fn is_host_visible(self) -> bool {
        !matches!(self, Self::GpuOnly)
    }
}

#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
    pub name: String,
}

impl BufferDesc {
    pub fn new(size: vk::DeviceSize, usage: vk::BufferUsageFlags, name: impl Into<String>) -> Self {
        Self {
            size,
            usage,
            location: MemoryLocation::GpuOnly,
            name: name.into(),
        }
    }

    /// builder
    #[inline]
    pub fn location(mut self, location: MemoryLocation) -> Self {
        self.location = location;
        self
    }
}

#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    /// 创建时为每个 aspect 的 view 在 bindless 表中分配 index
    pub bindless: bool,
    pub name: String,
}

impl TextureDesc {
    pub fn new_2d(
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
        name: impl Into<String>,
    ) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: extent.into(),
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            usage,
            bindless: false,
            name: name.into(),
        }
    }

    /// builder
    #[inline]
    pub fn bindless(mut self, bindless: bool) -> Self {
        self.bindless = bindless;
        self
    }

    /// builder
    #[inline]
    pub fn mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    #[inline]
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode: vk::SamplerAddressMode,
    /// None 表示不开启各向异性过滤
    pub max_anisotropy: Option<f32>,
    pub compare_op: Option<vk::CompareOp>,
    pub name: String,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: None,
            compare_op: None,
            name: "sampler".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AttachmentDesc {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

impl AttachmentDesc {
    pub fn color(format: vk::Format, final_layout: vk::ImageLayout) -> Self {
        Self {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout,
        }
    }

    pub fn depth(format: vk::Format) -> Self {
        Self {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    }
}

/// 只有一个 subpass 的 render pass
#[derive(Debug, Clone, Default)]
pub struct RenderPassDesc {
    pub color_attachments: Vec<AttachmentDesc>,
    pub depth_attachment: Option<AttachmentDesc>,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct FramebufferDesc {
    pub render_pass: RenderPassHandle,
    /// 顺序与 render pass 的 attachment 一致，depth 在最后
    pub attachments: Vec<TextureHandle>,
    pub extent: vk::Extent2D,
    pub name: String,
}

/// 一个 shader stage：SPIR-V 以及入口函数
#[derive(Debug, Clone)]
pub struct ShaderStageDesc {
    pub spirv: Vec<u32>,
    pub entry_point: String,
}

impl ShaderStageDesc {
    pub fn new(spirv: Vec<u32>, entry_point: impl Into<String>) -> Self {
        Self {
            spirv,
            entry_point: entry_point.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc {
    pub vertex: ShaderStageDesc,
    pub fragment: Option<ShaderStageDesc>,

    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,

    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,

    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare_op: vk::CompareOp,

    /// 为 None 时每个 color attachment 都不开启混合
    pub blend: Option<vk::PipelineColorBlendAttachmentState>,

    pub render_pass: RenderPassHandle,
    pub subpass: u32,
    pub name: String,
}

impl GraphicsPipelineDesc {
    pub fn new(vertex: ShaderStageDesc, render_pass: RenderPassHandle, name: impl Into<String>) -> Self {
        Self {
            vertex,
            fragment: None,
            vertex_bindings: vec![],
            vertex_attributes: vec![],
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            // 按照 OpenGL 的传统，将 CCW 视为 front face
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: false,
            depth_write: false,
            depth_compare_op: vk::CompareOp::LESS,
            blend: None,
            render_pass,
            subpass: 0,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComputePipelineDesc {
    pub shader: ShaderStageDesc,
    pub name: String,
}

/// Binding 资源所属的 pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineRef {
    Graphics(GraphicsPipelineHandle),
    Compute(ComputePipelineHandle),
}

/// Binding 中的一项资源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingResource {
    UniformBuffer {
        buffer: BufferHandle,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    StorageBuffer {
        buffer: BufferHandle,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    SampledTexture(TextureHandle),
    StorageTexture(TextureHandle),
    Sampler(SamplerHandle),
    CombinedTexture(TextureHandle, SamplerHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingEntry {
    pub binding: u32,
    pub resource: BindingResource,
}

/// 常驻的 descriptor set，对应 pipeline 的某一个 set index
#[derive(Debug, Clone)]
pub struct BindingDesc {
    pub pipeline: PipelineRef,
    pub set: u32,
    pub entries: Vec<BindingEntry>,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct QueryPoolDesc {
    pub query_type: vk::QueryType,
    pub count: u32,
    /// 仅用于 pipeline statistics 类型
    pub pipeline_statistics: vk::QueryPipelineStatisticFlags,
    pub name: String,
}

impl QueryPoolDesc {
    pub fn timestamps(count: u32, name: impl Into<String>) -> Self {
        Self {
            query_type: vk::QueryType::TIMESTAMP,
            count,
            pipeline_statistics: vk::QueryPipelineStatisticFlags::empty(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SemaphoreDesc {
    #[default]
    Binary,
    Timeline {
        initial_value: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FenceDesc {
    pub signaled: bool,
}
