//! HandleTable 中存放的资源记录
//!
//! 记录持有 native 对象以及创建时的描述，native 对象只在 frame graveyard 回收时销毁。

use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;
use itertools::Itertools;

use crate::pipelines::pipeline_layout::PipelineLayoutInfo;
use crate::resources::descs::{
    BufferDesc, FramebufferDesc, QueryPoolDesc, RenderPassDesc, SamplerDesc, SemaphoreDesc, TextureDesc,
};

/// 持久映射的地址
#[derive(Debug, Clone, Copy)]
pub struct MappedPtr(NonNull<u8>);

// 映射的内存属于 buffer 本身，访问由调用方同步
unsafe impl Send for MappedPtr {}
unsafe impl Sync for MappedPtr {}

impl MappedPtr {
    #[inline]
    pub fn new(ptr: *mut u8) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.0.as_ptr()
    }
}

pub struct BufferRecord {
    pub buffer: vk::Buffer,
    pub allocation: vk_mem::Allocation,
    pub mapped: Option<MappedPtr>,
    pub desc: BufferDesc,
}

/// texture 某个 aspect 的 view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AspectView {
    pub aspect: vk::ImageAspectFlags,
    pub view: vk::ImageView,
    pub bindless_index: Option<u32>,
}

pub struct TextureRecord {
    pub image: vk::Image,
    /// swapchain image 不是由 vma 分配的
    pub allocation: Option<vk_mem::Allocation>,
    /// 覆盖 format 全部 aspect 的 view，用作 attachment
    pub attachment_view: vk::ImageView,
    /// color 格式只有一个 COLOR view（与 attachment view 相同）；depth-stencil 格式拆成两个
    pub aspect_views: Vec<AspectView>,
    pub desc: TextureDesc,
}

impl TextureRecord {
    /// 指定 aspect 的 view，找不到时返回 attachment view
    pub fn view(&self, aspect: vk::ImageAspectFlags) -> vk::ImageView {
        self.aspect_views.iter().find(|v| v.aspect == aspect).map_or(self.attachment_view, |v| v.view)
    }

    /// 默认 aspect 的 view：color 或者 depth
    #[inline]
    pub fn default_view(&self) -> vk::ImageView {
        self.aspect_views.first().map_or(self.attachment_view, |v| v.view)
    }

    pub fn bindless_index(&self, aspect: vk::ImageAspectFlags) -> Option<u32> {
        self.aspect_views.iter().find(|v| v.aspect == aspect).and_then(|v| v.bindless_index)
    }

    /// 需要销毁的 view，不会重复
    pub fn owned_views(&self) -> Vec<vk::ImageView> {
        std::iter::once(self.attachment_view).chain(self.aspect_views.iter().map(|v| v.view)).unique().collect_vec()
    }

    #[inline]
    pub fn is_external(&self) -> bool {
        self.allocation.is_none()
    }
}

/// format 包含的 aspect
pub fn format_aspects(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// buffer 与 image 之间复制时，一个 texel 在 buffer 中占用的字节数
///
/// depth-stencil 格式按 aspect 分开计算；压缩格式以及未列出的格式返回 None
pub fn copy_texel_size(format: vk::Format, aspect: vk::ImageAspectFlags) -> Option<u64> {
    if aspect == vk::ImageAspectFlags::STENCIL {
        return matches!(
            format,
            vk::Format::S8_UINT
                | vk::Format::D16_UNORM_S8_UINT
                | vk::Format::D24_UNORM_S8_UINT
                | vk::Format::D32_SFLOAT_S8_UINT
        )
        .then_some(1);
    }

    let size = match format {
        vk::Format::R8_UNORM
        | vk::Format::R8_SNORM
        | vk::Format::R8_UINT
        | vk::Format::R8_SINT
        | vk::Format::R8_SRGB => 1,

        vk::Format::R8G8_UNORM
        | vk::Format::R8G8_SNORM
        | vk::Format::R8G8_UINT
        | vk::Format::R8G8_SINT
        | vk::Format::R16_UNORM
        | vk::Format::R16_SFLOAT
        | vk::Format::R16_UINT
        | vk::Format::R16_SINT
        | vk::Format::D16_UNORM
        | vk::Format::D16_UNORM_S8_UINT => 2,

        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SNORM
        | vk::Format::R8G8B8A8_UINT
        | vk::Format::R8G8B8A8_SINT
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::A2B10G10R10_UNORM_PACK32
        | vk::Format::B10G11R11_UFLOAT_PACK32
        | vk::Format::E5B9G9R9_UFLOAT_PACK32
        | vk::Format::R16G16_UNORM
        | vk::Format::R16G16_SFLOAT
        | vk::Format::R16G16_UINT
        | vk::Format::R16G16_SINT
        | vk::Format::R32_SFLOAT
        | vk::Format::R32_UINT
        | vk::Format::R32_SINT
        | vk::Format::D32_SFLOAT
        | vk::Format::X8_D24_UNORM_PACK32
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => 4,

        vk::Format::R16G16B16A16_UNORM
        | vk::Format::R16G16B16A16_SNORM
        | vk::Format::R16G16B16A16_SFLOAT
        | vk::Format::R16G16B16A16_UINT
        | vk::Format::R16G16B16A16_SINT
        | vk::Format::R32G32_SFLOAT
        | vk::Format::R32G32_UINT
        | vk::Format::R32G32_SINT => 8,

        vk::Format::R32G32B32_SFLOAT | vk::Format::R32G32B32_UINT | vk::Format::R32G32B32_SINT => 12,

        vk::Format::R32G32B32A32_SFLOAT | vk::Format::R32G32B32A32_UINT | vk::Format::R32G32B32A32_SINT => 16,

        _ => return None,
    };
    Some(size)
}

/// 作为 shader 读取时使用的 layout
pub fn sampled_layout(aspect: vk::ImageAspectFlags) -> vk::ImageLayout {
    if aspect.intersects(vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL) {
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
    } else {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    }
}

pub struct SamplerRecord {
    pub sampler: vk::Sampler,
    pub desc: SamplerDesc,
}

pub struct RenderPassRecord {
    pub render_pass: vk::RenderPass,
    pub desc: RenderPassDesc,
}

pub struct FramebufferRecord {
    pub framebuffer: vk::Framebuffer,
    pub desc: FramebufferDesc,
}

/// graphics 和 compute pipeline 共用
pub struct PipelineRecord {
    pub pipeline: vk::Pipeline,
    pub bind_point: vk::PipelineBindPoint,
    pub layout: Arc<PipelineLayoutInfo>,
    pub name: String,
}

pub struct SemaphoreRecord {
    pub semaphore: vk::Semaphore,
    pub desc: SemaphoreDesc,
    /// acquire / present semaphore，随 swapchain 一起销毁
    pub swapchain_owned: bool,
}

pub struct FenceRecord {
    pub fence: vk::Fence,
}

pub struct BindingRecord {
    pub set: u32,
    /// 分配该 set 的 pool，释放时需要
    pub pool: vk::DescriptorPool,
    pub descriptor_set: vk::DescriptorSet,
    pub layout: vk::DescriptorSetLayout,
    pub name: String,
}

pub struct QueryPoolRecord {
    pub pool: vk::QueryPool,
    pub desc: QueryPoolDesc,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_format_aspects() {
        assert_eq!(format_aspects(vk::Format::R8G8B8A8_UNORM), vk::ImageAspectFlags::COLOR);
        assert_eq!(format_aspects(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            format_aspects(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn test_copy_texel_size() {
        let color = vk::ImageAspectFlags::COLOR;
        assert_eq!(copy_texel_size(vk::Format::R8G8B8A8_UNORM, color), Some(4));
        assert_eq!(copy_texel_size(vk::Format::R32G32B32A32_SFLOAT, color), Some(16));
        assert_eq!(copy_texel_size(vk::Format::D24_UNORM_S8_UINT, vk::ImageAspectFlags::DEPTH), Some(4));
        assert_eq!(copy_texel_size(vk::Format::D24_UNORM_S8_UINT, vk::ImageAspectFlags::STENCIL), Some(1));
        assert_eq!(copy_texel_size(vk::Format::R8G8B8A8_UNORM, vk::ImageAspectFlags::STENCIL), None);
        assert_eq!(copy_texel_size(vk::Format::BC7_UNORM_BLOCK, color), None);
    }

    #[test]
    fn test_owned_views_are_unique() {
        let color = vk::ImageView::from_raw(7);
        let record = TextureRecord {
            image: vk::Image::from_raw(1),
            allocation: None,
            attachment_view: color,
            aspect_views: vec![AspectView {
                aspect: vk::ImageAspectFlags::COLOR,
                view: color,
                bindless_index: Some(3),
            }],
            desc: TextureDesc::new_2d(
                vk::Format::R8G8B8A8_UNORM,
                vk::Extent2D { width: 4, height: 4 },
                vk::ImageUsageFlags::SAMPLED,
                "t",
            ),
        };
        assert_eq!(record.owned_views(), vec![color]);
        assert_eq!(record.bindless_index(vk::ImageAspectFlags::COLOR), Some(3));
        assert_eq!(record.view(vk::ImageAspectFlags::DEPTH), color);
        assert!(record.is_external());
    }
}
