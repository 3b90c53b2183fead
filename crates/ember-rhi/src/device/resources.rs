use ash::vk;
use itertools::Itertools;
use vk_mem::Alloc;

use crate::config::BindlessDescriptorKind;
use crate::descriptors::bindless::BindlessAllocator;
use crate::descriptors::descriptor_info::{DescriptorInfo, DescriptorWrite, DeviceDescriptorWriter, write_descriptor_set};
use crate::descriptors::descriptor_pool::DescriptorPoolChain;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::foundation::device::GfxDevice;
use crate::foundation::mem_allocator::GfxMemAllocator;
use crate::handles::{
    BindingHandle, BufferHandle, ComputePipelineHandle, FenceHandle, FramebufferHandle, GraphicsPipelineHandle,
    QueryPoolHandle, RenderPassHandle, SamplerHandle, SemaphoreHandle, TextureHandle,
};
use crate::pipelines::pipeline::{create_compute_pipeline, create_graphics_pipeline};
use crate::pipelines::pipeline_layout::{DeviceLayoutFactory, PipelineLayoutDesc, PipelineLayoutInfo};
use crate::pipelines::shader_reflection::{ShaderReflection, reflect_spirv};
use crate::resources::descs::{
    BindingDesc, BufferDesc, ComputePipelineDesc, FenceDesc, FramebufferDesc, GraphicsPipelineDesc, MemoryLocation,
    PipelineRef, QueryPoolDesc, RenderPassDesc, SamplerDesc, SemaphoreDesc, ShaderStageDesc, TextureDesc,
};
use crate::resources::records::{
    AspectView, BindingRecord, BufferRecord, FenceRecord, FramebufferRecord, MappedPtr, PipelineRecord,
    QueryPoolRecord, RenderPassRecord, SamplerRecord, SemaphoreRecord, TextureRecord, format_aspects, sampled_layout,
};
use crate::resources::resource_tables::{ResourceTables, RetiredResource};

/// 销毁 native 对象需要的设备状态
///
/// 从 Device 中按字段借用，和 graveyard 的借用互不冲突
pub(crate) struct NativeReleaser<'a> {
    pub device: &'a GfxDevice,
    pub allocator: &'a GfxMemAllocator,
    pub bindless: &'a mut BindlessAllocator,
    pub binding_pool: &'a mut DescriptorPoolChain,
}

impl NativeReleaser<'_> {
    /// graveyard 回收：erase 记录并销毁 native 对象
    pub fn reclaim(&mut self, resources: &mut ResourceTables, item: RetiredResource) {
        let released = match item {
            RetiredResource::Buffer(h) => resources.buffers.erase(h).map(|r| self.buffer(r)),
            RetiredResource::Texture(h) => resources.textures.erase(h).map(|r| self.texture(r)),
            RetiredResource::Sampler(h) => resources.samplers.erase(h).map(|r| self.sampler(r)),
            RetiredResource::RenderPass(h) => resources.render_passes.erase(h).map(|r| self.render_pass(r)),
            RetiredResource::Framebuffer(h) => resources.framebuffers.erase(h).map(|r| self.framebuffer(r)),
            RetiredResource::GraphicsPipeline(h) => resources.graphics_pipelines.erase(h).map(|r| self.pipeline(r)),
            RetiredResource::ComputePipeline(h) => resources.compute_pipelines.erase(h).map(|r| self.pipeline(r)),
            RetiredResource::Semaphore(h) => resources.semaphores.erase(h).map(|r| self.semaphore(r)),
            RetiredResource::Fence(h) => resources.fences.erase(h).map(|r| self.fence(r)),
            RetiredResource::Binding(h) => resources.bindings.erase(h).map(|r| self.binding(r)),
            RetiredResource::QueryPool(h) => resources.query_pools.erase(h).map(|r| self.query_pool(r)),
        };
        if released.is_none() {
            log::error!("retired {:?} handle no longer has a record", item.kind());
        }
    }

    pub fn buffer(&mut self, mut record: BufferRecord) {
        unsafe {
            if record.mapped.is_some() {
                self.allocator.unmap_memory(&mut record.allocation);
            }
            self.allocator.destroy_buffer(record.buffer, &mut record.allocation);
        }
    }

    /// bindless slot 在这里归还，保证 GPU 不再读取
    pub fn texture(&mut self, record: TextureRecord) {
        let mut writer = DeviceDescriptorWriter(self.device);
        for index in record.aspect_views.iter().filter_map(|v| v.bindless_index) {
            self.bindless.free(index, &mut writer);
        }
        for view in record.owned_views() {
            unsafe { self.device.destroy_image_view(view, None) };
        }
        if let Some(mut allocation) = record.allocation {
            unsafe { self.allocator.destroy_image(record.image, &mut allocation) };
        }
    }

    pub fn sampler(&mut self, record: SamplerRecord) {
        unsafe { self.device.destroy_sampler(record.sampler, None) };
    }

    pub fn render_pass(&mut self, record: RenderPassRecord) {
        unsafe { self.device.destroy_render_pass(record.render_pass, None) };
    }

    pub fn framebuffer(&mut self, record: FramebufferRecord) {
        unsafe { self.device.destroy_framebuffer(record.framebuffer, None) };
    }

    /// layout 属于 layout cache，不在这里销毁
    pub fn pipeline(&mut self, record: PipelineRecord) {
        unsafe { self.device.destroy_pipeline(record.pipeline, None) };
    }

    pub fn semaphore(&mut self, record: SemaphoreRecord) {
        unsafe { self.device.destroy_semaphore(record.semaphore, None) };
    }

    pub fn fence(&mut self, record: FenceRecord) {
        unsafe { self.device.destroy_fence(record.fence, None) };
    }

    pub fn binding(&mut self, record: BindingRecord) {
        if let Err(e) = self.binding_pool.free(self.device, record.pool, record.descriptor_set) {
            log::error!("failed to free binding {}: {}", record.name, e);
        }
    }

    pub fn query_pool(&mut self, record: QueryPoolRecord) {
        unsafe { self.device.destroy_query_pool(record.pool, None) };
    }
}

// 内部工具
impl Device {
    pub(crate) fn releaser(&mut self) -> NativeReleaser<'_> {
        NativeReleaser {
            device: &self.gfx_device,
            allocator: &self.allocator,
            bindless: &mut self.bindless,
            binding_pool: &mut self.binding_pool,
        }
    }

    /// 关闭时销毁所有残留的记录，调用方已经 wait idle
    pub(super) fn release_all_records(&mut self) {
        let mut releaser = NativeReleaser {
            device: &self.gfx_device,
            allocator: &self.allocator,
            bindless: &mut self.bindless,
            binding_pool: &mut self.binding_pool,
        };
        let resources = &mut self.resources;

        // 依赖关系：binding -> pipeline / texture，framebuffer -> render pass / texture
        resources.bindings.drain().for_each(|(_, r)| releaser.binding(r));
        resources.framebuffers.drain().for_each(|(_, r)| releaser.framebuffer(r));
        resources.graphics_pipelines.drain().for_each(|(_, r)| releaser.pipeline(r));
        resources.compute_pipelines.drain().for_each(|(_, r)| releaser.pipeline(r));
        resources.render_passes.drain().for_each(|(_, r)| releaser.render_pass(r));
        resources.textures.drain().for_each(|(_, r)| releaser.texture(r));
        resources.buffers.drain().for_each(|(_, r)| releaser.buffer(r));
        resources.samplers.drain().for_each(|(_, r)| releaser.sampler(r));
        resources.semaphores.drain().for_each(|(_, r)| releaser.semaphore(r));
        resources.fences.drain().for_each(|(_, r)| releaser.fence(r));
        resources.query_pools.drain().for_each(|(_, r)| releaser.query_pool(r));
    }

    /// 放入当前帧的 graveyard，检查见 `ResourceTables::retire`
    #[inline]
    fn retire(&mut self, item: RetiredResource) {
        self.resources.retire(&mut self.graveyard, item);
    }

    /// 1x1 的占位 texture，释放的 bindless slot 会指向它
    pub(super) fn init_null_texture(&mut self) -> RhiResult<()> {
        let usage = match self.config.bindless_descriptor_type {
            BindlessDescriptorKind::StorageImage => vk::ImageUsageFlags::STORAGE,
            _ => vk::ImageUsageFlags::SAMPLED,
        } | vk::ImageUsageFlags::TRANSFER_DST;
        let desc =
            TextureDesc::new_2d(vk::Format::R8G8B8A8_UNORM, vk::Extent2D { width: 1, height: 1 }, usage, "null-texture");
        let texture = self.create_texture(desc)?;
        self.null_texture = Some(texture);

        let layout = self.bindless_image_layout(vk::ImageAspectFlags::COLOR);
        self.upload_texture(texture, &[0; 4], layout)?;

        let record = self.resources.textures.try_get(texture)?;
        let null_info = self.bindless_descriptor(record.default_view(), layout);
        self.bindless.set_null(null_info);
        Ok(())
    }

    /// bindless 表中 texture 所处的 layout
    pub(crate) fn bindless_image_layout(&self, aspect: vk::ImageAspectFlags) -> vk::ImageLayout {
        match self.config.bindless_descriptor_type {
            BindlessDescriptorKind::StorageImage => vk::ImageLayout::GENERAL,
            _ => sampled_layout(aspect),
        }
    }

    fn bindless_descriptor(&self, view: vk::ImageView, layout: vk::ImageLayout) -> DescriptorInfo {
        match self.config.bindless_descriptor_type {
            BindlessDescriptorKind::SampledImage => DescriptorInfo::SampledImage { view, layout },
            BindlessDescriptorKind::StorageImage => DescriptorInfo::StorageImage { view, layout },
            BindlessDescriptorKind::CombinedImageSampler => DescriptorInfo::CombinedImageSampler {
                view,
                layout,
                sampler: self.default_sampler,
            },
        }
    }

    fn create_view(
        &self,
        image: vk::Image,
        desc: &TextureDesc,
        aspect: vk::ImageAspectFlags,
        name: &str,
    ) -> RhiResult<vk::ImageView> {
        let view_type = match (desc.image_type, desc.array_layers) {
            (vk::ImageType::TYPE_1D, 1) => vk::ImageViewType::TYPE_1D,
            (vk::ImageType::TYPE_1D, _) => vk::ImageViewType::TYPE_1D_ARRAY,
            (vk::ImageType::TYPE_3D, _) => vk::ImageViewType::TYPE_3D,
            (_, 1) => vk::ImageViewType::TYPE_2D,
            (_, _) => vk::ImageViewType::TYPE_2D_ARRAY,
        };
        let view_ci = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            });
        let view = unsafe { self.gfx_device.create_image_view(&view_ci, None) }
            .map_err(RhiError::creation("image view"))?;
        self.gfx_device.set_object_debug_name(view, name);
        Ok(view)
    }

    /// 为 image 创建 attachment view 以及每个 aspect 的 view
    ///
    /// color 格式的 aspect view 就是 attachment view；depth-stencil 格式拆成 depth 和 stencil 两个
    pub(crate) fn create_texture_views(
        &self,
        image: vk::Image,
        desc: &TextureDesc,
    ) -> RhiResult<(vk::ImageView, Vec<AspectView>)> {
        let aspects = format_aspects(desc.format);
        let attachment_view = self.create_view(image, desc, aspects, &desc.name)?;

        let mut aspect_views = Vec::new();
        if aspects == vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL {
            for aspect in [vk::ImageAspectFlags::DEPTH, vk::ImageAspectFlags::STENCIL] {
                match self.create_view(image, desc, aspect, &format!("{}-{:?}", desc.name, aspect)) {
                    Ok(view) => aspect_views.push(AspectView {
                        aspect,
                        view,
                        bindless_index: None,
                    }),
                    Err(e) => {
                        unsafe {
                            self.gfx_device.destroy_image_view(attachment_view, None);
                            for v in &aspect_views {
                                self.gfx_device.destroy_image_view(v.view, None);
                            }
                        }
                        return Err(e);
                    }
                }
            }
        } else {
            aspect_views.push(AspectView {
                aspect: aspects,
                view: attachment_view,
                bindless_index: None,
            });
        }
        Ok((attachment_view, aspect_views))
    }
}

// buffer & texture & sampler
impl Device {
    pub fn create_buffer(&mut self, desc: BufferDesc) -> RhiResult<BufferHandle> {
        let buffer_ci = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let alloc_ci = match desc.location {
            MemoryLocation::GpuOnly => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
            MemoryLocation::CpuToGpu => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                ..Default::default()
            },
            MemoryLocation::GpuToCpu => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
                ..Default::default()
            },
        };

        let (buffer, mut allocation) =
            unsafe { self.allocator.create_buffer(&buffer_ci, &alloc_ci) }.map_err(RhiError::allocation("buffer"))?;

        // host 可见的 buffer 持久映射
        let mapped = if desc.location.is_host_visible() {
            match unsafe { self.allocator.map_memory(&mut allocation) } {
                Ok(ptr) => MappedPtr::new(ptr),
                Err(e) => {
                    unsafe { self.allocator.destroy_buffer(buffer, &mut allocation) };
                    return Err(RhiError::allocation("buffer mapping")(e));
                }
            }
        } else {
            None
        };
        self.gfx_device.set_object_debug_name(buffer, &desc.name);

        Ok(self.resources.buffers.emplace(BufferRecord {
            buffer,
            allocation,
            mapped,
            desc,
        }))
    }

    pub fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.retire(RetiredResource::Buffer(buffer));
    }

    /// bindless 表满时返回 `BindlessExhausted`，texture 不会被创建
    pub fn create_texture(&mut self, desc: TextureDesc) -> RhiResult<TextureHandle> {
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(desc.image_type)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (image, mut allocation) =
            unsafe { self.allocator.create_image(&image_ci, &alloc_ci) }.map_err(RhiError::allocation("texture"))?;
        self.gfx_device.set_object_debug_name(image, &desc.name);

        let (attachment_view, aspect_views) = match self.create_texture_views(image, &desc) {
            Ok(views) => views,
            Err(e) => {
                unsafe { self.allocator.destroy_image(image, &mut allocation) };
                return Err(e);
            }
        };

        let bindless = desc.bindless;
        let handle = self.resources.textures.emplace(TextureRecord {
            image,
            allocation: Some(allocation),
            attachment_view,
            aspect_views,
            desc,
        });

        if bindless {
            if let Err(e) = self.register_bindless(handle) {
                // 还没有被任何命令使用，直接销毁
                if let Some(record) = self.resources.textures.erase(handle) {
                    self.releaser().texture(record);
                }
                return Err(e);
            }
        }
        Ok(handle)
    }

    /// 为 texture 的每个 aspect view 分配 bindless slot
    fn register_bindless(&mut self, texture: TextureHandle) -> RhiResult<()> {
        let views = self.resources.textures.try_get(texture)?.aspect_views.iter().map(|v| (v.aspect, v.view)).collect_vec();
        for (idx, (aspect, view)) in views.into_iter().enumerate() {
            let info = self.bindless_descriptor(view, self.bindless_image_layout(aspect));
            let index = self.bindless.allocate(info, &mut DeviceDescriptorWriter(&self.gfx_device))?;
            if let Some(record) = self.resources.textures.get_mut(texture) {
                record.aspect_views[idx].bindless_index = Some(index);
            }
        }
        Ok(())
    }

    /// swapchain 的 texture 不能通过这里销毁
    pub fn destroy_texture(&mut self, texture: TextureHandle) {
        self.retire(RetiredResource::Texture(texture));
    }

    /// texture 某个 aspect 在 bindless 表中的 index；aspect 为空时使用默认 aspect
    pub fn texture_bindless_index(&self, texture: TextureHandle, aspect: vk::ImageAspectFlags) -> Option<u32> {
        let record = self.resources.textures.get(texture)?;
        if aspect.is_empty() {
            record.aspect_views.first().and_then(|v| v.bindless_index)
        } else {
            record.bindless_index(aspect)
        }
    }

    #[inline]
    pub fn texture_desc(&self, texture: TextureHandle) -> Option<&TextureDesc> {
        self.resources.textures.get(texture).map(|r| &r.desc)
    }

    #[inline]
    pub fn buffer_desc(&self, buffer: BufferHandle) -> Option<&BufferDesc> {
        self.resources.buffers.get(buffer).map(|r| &r.desc)
    }

    pub fn create_sampler(&mut self, desc: SamplerDesc) -> RhiResult<SamplerHandle> {
        let anisotropy_supported = self.pdevice.features.sampler_anisotropy == vk::TRUE;
        let max_anisotropy = desc
            .max_anisotropy
            .filter(|_| anisotropy_supported)
            .map(|a| a.min(self.pdevice.limits().max_sampler_anisotropy));
        let sampler_ci = vk::SamplerCreateInfo::default()
            .mag_filter(desc.mag_filter)
            .min_filter(desc.min_filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .anisotropy_enable(max_anisotropy.is_some())
            .max_anisotropy(max_anisotropy.unwrap_or(1.0))
            .compare_enable(desc.compare_op.is_some())
            .compare_op(desc.compare_op.unwrap_or(vk::CompareOp::NEVER))
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK);
        let sampler =
            unsafe { self.gfx_device.create_sampler(&sampler_ci, None) }.map_err(RhiError::creation("sampler"))?;
        self.gfx_device.set_object_debug_name(sampler, &desc.name);

        Ok(self.resources.samplers.emplace(SamplerRecord { sampler, desc }))
    }

    pub fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.retire(RetiredResource::Sampler(sampler));
    }
}

// render pass & framebuffer
impl Device {
    pub fn create_render_pass(&mut self, desc: RenderPassDesc) -> RhiResult<RenderPassHandle> {
        let to_vk = |a: &crate::resources::descs::AttachmentDesc| {
            vk::AttachmentDescription::default()
                .format(a.format)
                .samples(a.samples)
                .load_op(a.load_op)
                .store_op(a.store_op)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(a.initial_layout)
                .final_layout(a.final_layout)
        };
        let attachments = desc.color_attachments.iter().chain(desc.depth_attachment.iter()).map(to_vk).collect_vec();

        let color_refs = (0..desc.color_attachments.len() as u32)
            .map(|i| vk::AttachmentReference {
                attachment: i,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            })
            .collect_vec();
        let depth_ref = vk::AttachmentReference {
            attachment: desc.color_attachments.len() as u32,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if desc.depth_attachment.is_some() {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }

        // 等待之前对 attachment 的写入
        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            )
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .src_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );

        let render_pass_ci = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(std::slice::from_ref(&dependency));
        let render_pass = unsafe { self.gfx_device.create_render_pass(&render_pass_ci, None) }
            .map_err(RhiError::creation("render pass"))?;
        self.gfx_device.set_object_debug_name(render_pass, &desc.name);

        Ok(self.resources.render_passes.emplace(RenderPassRecord { render_pass, desc }))
    }

    pub fn destroy_render_pass(&mut self, render_pass: RenderPassHandle) {
        self.retire(RetiredResource::RenderPass(render_pass));
    }

    pub fn create_framebuffer(&mut self, desc: FramebufferDesc) -> RhiResult<FramebufferHandle> {
        let render_pass = self.resources.render_passes.try_get(desc.render_pass)?.render_pass;
        let attachments = desc
            .attachments
            .iter()
            .map(|t| self.resources.textures.try_get(*t).map(|r| r.attachment_view))
            .collect::<RhiResult<Vec<_>>>()?;

        let framebuffer_ci = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(desc.extent.width)
            .height(desc.extent.height)
            .layers(1);
        let framebuffer = unsafe { self.gfx_device.create_framebuffer(&framebuffer_ci, None) }
            .map_err(RhiError::creation("framebuffer"))?;
        self.gfx_device.set_object_debug_name(framebuffer, &desc.name);

        Ok(self.resources.framebuffers.emplace(FramebufferRecord { framebuffer, desc }))
    }

    pub fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.retire(RetiredResource::Framebuffer(framebuffer));
    }
}

// pipeline
impl Device {
    fn reflect_stage(
        stage: &ShaderStageDesc,
        expected: vk::ShaderStageFlags,
        name: &str,
    ) -> RhiResult<ShaderReflection> {
        let reflection = reflect_spirv(&stage.spirv, &stage.entry_point)?;
        if reflection.stage != expected {
            return Err(RhiError::ShaderReflection(format!(
                "{}: entry point {} is a {:?} shader, expected {:?}",
                name, stage.entry_point, reflection.stage, expected
            )));
        }
        Ok(reflection)
    }

    /// 反射所有 stage，推导并从 cache 中取得 pipeline layout
    fn derive_layout(&mut self, reflections: &[ShaderReflection]) -> RhiResult<std::sync::Arc<PipelineLayoutInfo>> {
        let layout_desc = PipelineLayoutDesc::derive(reflections, self.bindless.descriptor_type())?;
        self.layout_cache.get_or_create(&layout_desc, &mut DeviceLayoutFactory(&self.gfx_device))
    }

    pub fn create_graphics_pipeline(&mut self, desc: GraphicsPipelineDesc) -> RhiResult<GraphicsPipelineHandle> {
        let mut reflections = vec![Self::reflect_stage(&desc.vertex, vk::ShaderStageFlags::VERTEX, &desc.name)?];
        if let Some(fragment) = &desc.fragment {
            reflections.push(Self::reflect_stage(fragment, vk::ShaderStageFlags::FRAGMENT, &desc.name)?);
        }
        let layout = self.derive_layout(&reflections)?;

        let rp = self.resources.render_passes.try_get(desc.render_pass)?;
        let samples = rp
            .desc
            .color_attachments
            .first()
            .or(rp.desc.depth_attachment.as_ref())
            .map_or(vk::SampleCountFlags::TYPE_1, |a| a.samples);
        let pipeline = create_graphics_pipeline(
            &self.gfx_device,
            &desc,
            layout.pipeline_layout,
            rp.render_pass,
            rp.desc.color_attachments.len(),
            samples,
        )?;

        Ok(self.resources.graphics_pipelines.emplace(PipelineRecord {
            pipeline,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            layout,
            name: desc.name,
        }))
    }

    pub fn destroy_graphics_pipeline(&mut self, pipeline: GraphicsPipelineHandle) {
        self.retire(RetiredResource::GraphicsPipeline(pipeline));
    }

    pub fn create_compute_pipeline(&mut self, desc: ComputePipelineDesc) -> RhiResult<ComputePipelineHandle> {
        let reflection = Self::reflect_stage(&desc.shader, vk::ShaderStageFlags::COMPUTE, &desc.name)?;
        let layout = self.derive_layout(std::slice::from_ref(&reflection))?;
        let pipeline = create_compute_pipeline(&self.gfx_device, &desc.shader, layout.pipeline_layout, &desc.name)?;

        Ok(self.resources.compute_pipelines.emplace(PipelineRecord {
            pipeline,
            bind_point: vk::PipelineBindPoint::COMPUTE,
            layout,
            name: desc.name,
        }))
    }

    pub fn destroy_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.retire(RetiredResource::ComputePipeline(pipeline));
    }
}

// binding
impl Device {
    /// 为 pipeline 的某个 set 创建常驻的 descriptor set，并立即写入所有 entry
    pub fn create_binding(&mut self, desc: BindingDesc) -> RhiResult<BindingHandle> {
        let layout_info = match desc.pipeline {
            PipelineRef::Graphics(h) => &self.resources.graphics_pipelines.try_get(h)?.layout,
            PipelineRef::Compute(h) => &self.resources.compute_pipelines.try_get(h)?.layout,
        };
        if layout_info.bindless_set == Some(desc.set) {
            return Err(RhiError::LayoutMismatch(format!("{}: set {} is the bindless set", desc.name, desc.set)));
        }
        let Some(&set_layout) = layout_info.set_layouts.get(desc.set as usize) else {
            return Err(RhiError::LayoutMismatch(format!(
                "{}: pipeline layout has no set {}",
                desc.name, desc.set
            )));
        };
        let bindings_used = layout_info.bindings_used.get(desc.set as usize).copied().unwrap_or(0);
        if let Some(entry) = desc.entries.iter().find(|e| e.binding >= 32 || bindings_used & (1 << e.binding) == 0) {
            return Err(RhiError::LayoutMismatch(format!(
                "{}: binding {} is not declared in set {}",
                desc.name, entry.binding, desc.set
            )));
        }

        let writes = desc
            .entries
            .iter()
            .map(|e| {
                self.resources.resolve_descriptor(e.resource).map(|info| DescriptorWrite {
                    binding: e.binding,
                    array_element: 0,
                    info,
                })
            })
            .collect::<RhiResult<Vec<_>>>()?;

        let (pool, descriptor_set) = self.binding_pool.allocate_with_pool(&self.gfx_device, set_layout)?;
        write_descriptor_set(&self.gfx_device, descriptor_set, &writes);
        self.gfx_device.set_object_debug_name(descriptor_set, &desc.name);

        Ok(self.resources.bindings.emplace(BindingRecord {
            set: desc.set,
            pool,
            descriptor_set,
            layout: set_layout,
            name: desc.name,
        }))
    }

    pub fn destroy_binding(&mut self, binding: BindingHandle) {
        self.retire(RetiredResource::Binding(binding));
    }
}

// sync & query
impl Device {
    pub fn create_semaphore(&mut self, desc: SemaphoreDesc) -> RhiResult<SemaphoreHandle> {
        self.create_semaphore_record(desc, false)
    }

    pub(super) fn create_semaphore_record(
        &mut self,
        desc: SemaphoreDesc,
        swapchain_owned: bool,
    ) -> RhiResult<SemaphoreHandle> {
        let mut type_ci = match desc {
            SemaphoreDesc::Binary => vk::SemaphoreTypeCreateInfo::default().semaphore_type(vk::SemaphoreType::BINARY),
            SemaphoreDesc::Timeline { initial_value } => vk::SemaphoreTypeCreateInfo::default()
                .semaphore_type(vk::SemaphoreType::TIMELINE)
                .initial_value(initial_value),
        };
        let semaphore_ci = vk::SemaphoreCreateInfo::default().push_next(&mut type_ci);
        let semaphore = unsafe { self.gfx_device.create_semaphore(&semaphore_ci, None) }
            .map_err(RhiError::creation("semaphore"))?;

        Ok(self.resources.semaphores.emplace(SemaphoreRecord {
            semaphore,
            desc,
            swapchain_owned,
        }))
    }

    pub fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        self.retire(RetiredResource::Semaphore(semaphore));
    }

    pub fn create_fence(&mut self, desc: FenceDesc) -> RhiResult<FenceHandle> {
        let flags = if desc.signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let fence = unsafe { self.gfx_device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None) }
            .map_err(RhiError::creation("fence"))?;

        Ok(self.resources.fences.emplace(FenceRecord { fence }))
    }

    pub fn destroy_fence(&mut self, fence: FenceHandle) {
        self.retire(RetiredResource::Fence(fence));
    }

    pub fn create_query_pool(&mut self, desc: QueryPoolDesc) -> RhiResult<QueryPoolHandle> {
        if desc.query_type == vk::QueryType::PIPELINE_STATISTICS
            && self.pdevice.features.pipeline_statistics_query != vk::TRUE
        {
            return Err(RhiError::ResourceCreation {
                what: "query pool",
                result: vk::Result::ERROR_FEATURE_NOT_PRESENT,
            });
        }
        let query_pool_ci = vk::QueryPoolCreateInfo::default()
            .query_type(desc.query_type)
            .query_count(desc.count)
            .pipeline_statistics(desc.pipeline_statistics);
        let pool = unsafe { self.gfx_device.create_query_pool(&query_pool_ci, None) }
            .map_err(RhiError::creation("query pool"))?;
        self.gfx_device.set_object_debug_name(pool, &desc.name);

        // host query reset 已经开启，创建后直接重置为可用状态
        unsafe { self.gfx_device.reset_query_pool(pool, 0, desc.count) };

        Ok(self.resources.query_pools.emplace(QueryPoolRecord { pool, desc }))
    }

    pub fn destroy_query_pool(&mut self, pool: QueryPoolHandle) {
        self.retire(RetiredResource::QueryPool(pool));
    }
}
