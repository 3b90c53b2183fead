//! 设备核心：资源创建与销毁、帧生命周期、CommandList 的分配与提交
//!
//! - `resources.rs`：create_* / destroy_*，以及 graveyard 回收
//! - `frame.rs`：begin_command_list、submit_command_lists、next_frame
//! - `upload.rs`：一次性上传、host 可见 buffer 的读写、query 与 fence
//! - `presentation.rs`：surface 与 swapchain

mod frame;
mod presentation;
mod resources;
mod upload;

use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use ash::vk;
use itertools::Itertools;
use parking_lot::Mutex;
use raw_window_handle::RawDisplayHandle;

use crate::commands::queue::GfxQueue;
use crate::commands::recorder::CommandRecorder;
use crate::config::DeviceConfig;
use crate::descriptors::bindless::BindlessAllocator;
use crate::descriptors::descriptor_pool::DescriptorPoolChain;
use crate::error::{RhiError, RhiResult};
use crate::foundation::debug_messenger::GfxDebugMsger;
use crate::foundation::device::GfxDevice;
use crate::foundation::instance::GfxInstance;
use crate::foundation::mem_allocator::GfxMemAllocator;
use crate::foundation::physical_device::{GfxPhysicalDevice, QueueKind};
use crate::frame::frame_counter::FrameCounter;
use crate::frame::frame_lifecycle::FrameLifecycleManager;
use crate::frame::frame_timeline::FrameTimeline;
use crate::handles::TextureHandle;
use crate::pipelines::pipeline_layout::PipelineLayoutCache;
use crate::resources::resource_tables::{ResourceCounts, ResourceTables, RetiredResource};

pub use presentation::AcquiredImage;
pub(crate) use resources::NativeReleaser;
use presentation::Presentation;
use upload::UploadContext;

/// 一个 frame slot 中的 recorder 池
pub(crate) struct FrameRecorders {
    recorders: Vec<Mutex<CommandRecorder>>,
    /// 本帧已经被 `begin_command_list` 取走的数量
    claimed: AtomicUsize,
    /// 已经提交的前缀长度
    submitted: usize,
}

impl FrameRecorders {
    fn new() -> Self {
        Self {
            recorders: Vec::new(),
            claimed: AtomicUsize::new(0),
            submitted: 0,
        }
    }

    fn destroy(&mut self, device: &GfxDevice) {
        for recorder in self.recorders.drain(..) {
            recorder.into_inner().destroy(device);
        }
    }
}

/// RHI 设备
///
/// 资源通过句柄访问；destroy 只把句柄放入当前帧的 graveyard，
/// 记录和 native 对象在 F 帧之后（GPU 确定完成时）才被回收。
///
/// 资源的创建与销毁、提交、`next_frame` 需要 `&mut self`；
/// `begin_command_list` 只需要 `&self`，多个线程可以同时录制。
pub struct Device {
    config: DeviceConfig,

    frame_counter: FrameCounter,
    frame_timeline: FrameTimeline,
    graveyard: FrameLifecycleManager<RetiredResource>,
    frames: Vec<FrameRecorders>,

    pub(crate) resources: ResourceTables,
    pub(crate) layout_cache: PipelineLayoutCache,
    pub(crate) bindless: BindlessAllocator,
    /// Binding 资源使用的常驻 pool，set 可以单独释放
    binding_pool: DescriptorPoolChain,
    /// bindless 为 combined image sampler 时使用
    default_sampler: vk::Sampler,
    /// bindless slot 被释放后指向的占位 texture
    null_texture: Option<TextureHandle>,

    upload: UploadContext,
    presentation: Option<Presentation>,
    /// 创建时是否开启了 surface extensions
    surface_enabled: bool,

    queues: [GfxQueue; 2],
    allocator: ManuallyDrop<Arc<GfxMemAllocator>>,
    pub(crate) gfx_device: Arc<GfxDevice>,
    pub(crate) pdevice: GfxPhysicalDevice,
    debug_msger: Option<GfxDebugMsger>,
    instance: GfxInstance,
    vk_entry: ash::Entry,
}

// new & init
impl Device {
    /// `display` 不为 None 时开启对应窗口系统的 surface extensions，之后可以创建 swapchain
    pub fn new(config: DeviceConfig, display: Option<RawDisplayHandle>) -> RhiResult<Self> {
        config.validate()?;
        let _ = tracy_client::Client::start();
        let _span = tracy_client::span!("Device::new");

        let vk_entry = unsafe { ash::Entry::load() }?;
        let surface_exts: Vec<&'static CStr> = match display {
            Some(display) => ash_window::enumerate_required_extensions(display)
                .map_err(RhiError::vulkan("vkEnumerateInstanceExtensionProperties"))?
                .iter()
                .map(|ext| unsafe { CStr::from_ptr(*ext) })
                .collect_vec(),
            None => Vec::new(),
        };
        let instance = GfxInstance::new(&vk_entry, &config.app_name, config.enable_validation, &surface_exts)?;

        let (debug_msger, pdevice, gfx_device, allocator) =
            match Self::create_core(&vk_entry, instance.ash_instance(), &config) {
                Ok(core) => core,
                Err(e) => {
                    instance.destroy();
                    return Err(e);
                }
            };

        let gfx_family = pdevice.gfx_queue_family().clone();
        let compute_family = pdevice.compute_queue_family().cloned().unwrap_or_else(|| {
            log::info!("no dedicated compute queue, compute lists run on the gfx queue");
            gfx_family.clone()
        });
        let queues = [
            GfxQueue::new(&gfx_device, gfx_family, "gfx"),
            GfxQueue::new(&gfx_device, compute_family, "compute"),
        ];
        let fif_count = config.frames_in_flight;
        let bindless_type = config.bindless_descriptor_type.vk_descriptor_type();

        let mut device = Self {
            frame_counter: FrameCounter::new(fif_count),
            frame_timeline: FrameTimeline::new_detached(fif_count),
            graveyard: FrameLifecycleManager::new(fif_count),
            frames: Vec::new(),

            resources: ResourceTables::default(),
            layout_cache: PipelineLayoutCache::new(vk::DescriptorSetLayout::null()),
            bindless: BindlessAllocator::new_detached(config.bindless_capacity, bindless_type),
            binding_pool: DescriptorPoolChain::new(
                config.persistent_binding_sets,
                vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
                "bindings",
            ),
            default_sampler: vk::Sampler::null(),
            null_texture: None,

            upload: UploadContext::detached(),
            presentation: None,
            surface_enabled: display.is_some(),

            queues,
            allocator: ManuallyDrop::new(allocator),
            gfx_device,
            pdevice,
            debug_msger,
            instance,
            vk_entry,
            config,
        };
        // 之后的失败由 Drop 负责清理已经创建的部分
        device.init_components()?;

        log::info!("device ready: {}, {} frames in flight", device.pdevice.name(), fif_count);
        Ok(device)
    }

    /// debug messenger、physical device、logical device 以及 vma
    #[allow(clippy::type_complexity)]
    fn create_core(
        vk_entry: &ash::Entry,
        instance: &ash::Instance,
        config: &DeviceConfig,
    ) -> RhiResult<(Option<GfxDebugMsger>, GfxPhysicalDevice, Arc<GfxDevice>, Arc<GfxMemAllocator>)> {
        let debug_msger = if config.enable_validation { Some(GfxDebugMsger::new(vk_entry, instance)?) } else { None };
        let cleanup_msger = |msger: &Option<GfxDebugMsger>| {
            if let Some(msger) = msger {
                msger.destroy();
            }
        };

        let pdevice = match GfxPhysicalDevice::select(instance, config.prefer_discrete_gpu) {
            Ok(pdevice) => pdevice,
            Err(e) => {
                cleanup_msger(&debug_msger);
                return Err(e);
            }
        };

        let queue_priorities = [1.0_f32];
        let mut queue_cis = vec![
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(pdevice.gfx_queue_family().queue_family_index)
                .queue_priorities(&queue_priorities),
        ];
        if let Some(compute) = pdevice.compute_queue_family() {
            queue_cis.push(
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(compute.queue_family_index)
                    .queue_priorities(&queue_priorities),
            );
        }

        let gfx_device = match GfxDevice::new(instance, &pdevice, &queue_cis, true) {
            Ok(device) => Arc::new(device),
            Err(e) => {
                cleanup_msger(&debug_msger);
                return Err(e);
            }
        };

        let allocator = match GfxMemAllocator::new(instance, pdevice.vk_handle(), &gfx_device) {
            Ok(allocator) => Arc::new(allocator),
            Err(e) => {
                gfx_device.destroy();
                cleanup_msger(&debug_msger);
                return Err(e);
            }
        };

        Ok((debug_msger, pdevice, gfx_device, allocator))
    }

    /// 依赖 logical device 的所有组件
    fn init_components(&mut self) -> RhiResult<()> {
        let fif_count = self.config.frames_in_flight;

        self.frame_timeline = FrameTimeline::new(&self.gfx_device, fif_count)?;
        self.bindless = BindlessAllocator::new(
            &self.gfx_device,
            self.config.bindless_capacity,
            self.config.bindless_descriptor_type.vk_descriptor_type(),
        )?;
        self.layout_cache = PipelineLayoutCache::new(self.bindless.layout());
        self.upload = UploadContext::new(&self.gfx_device, self.queues[QueueKind::Graphics.index()].family_index())?;

        let default_sampler_ci = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .max_lod(vk::LOD_CLAMP_NONE);
        self.default_sampler = unsafe { self.gfx_device.create_sampler(&default_sampler_ci, None) }
            .map_err(RhiError::creation("default sampler"))?;
        self.gfx_device.set_object_debug_name(self.default_sampler, "default-sampler");

        let queue_families = [
            self.queues[QueueKind::Graphics.index()].family_index(),
            self.queues[QueueKind::Compute.index()].family_index(),
        ];
        for slot in 0..fif_count {
            self.frames.push(FrameRecorders::new());
            for idx in 0..self.config.recorders_per_frame {
                let recorder = CommandRecorder::new(
                    &self.gfx_device,
                    &self.allocator,
                    queue_families,
                    &self.config,
                    format!("recorder-{}-{}", (b'A' + slot as u8) as char, idx),
                )?;
                self.frames[slot].recorders.push(Mutex::new(recorder));
            }
        }

        self.init_null_texture()
    }
}

// destroy
impl Drop for Device {
    fn drop(&mut self) {
        let _span = tracy_client::span!("Device::drop");
        if let Err(e) = self.gfx_device.wait_idle() {
            log::error!("wait idle before shutdown failed: {}", e);
        }

        {
            let mut releaser = NativeReleaser {
                device: &self.gfx_device,
                allocator: &self.allocator,
                bindless: &mut self.bindless,
                binding_pool: &mut self.binding_pool,
            };
            let resources = &mut self.resources;
            self.graveyard.finalize_all(|item| releaser.reclaim(resources, item));
        }

        if let Some(presentation) = self.presentation.take() {
            presentation.destroy(self);
        }
        if let Some(null_texture) = self.null_texture.take() {
            if let Some(record) = self.resources.textures.erase(null_texture) {
                self.releaser().texture(record);
            }
        }

        let leaked = self.resources.counts(0);
        if leaked.total() > 0 {
            log::warn!("destroying resources that were never released: {:?}", leaked);
        }
        self.release_all_records();

        for frame in &mut self.frames {
            frame.destroy(&self.gfx_device);
        }
        self.upload.destroy(&self.gfx_device);
        unsafe { self.gfx_device.destroy_sampler(self.default_sampler, None) };
        self.binding_pool.destroy(&self.gfx_device);
        self.layout_cache.destroy(&self.gfx_device);
        self.bindless.destroy(&self.gfx_device);
        self.frame_timeline.destroy(&self.gfx_device);

        // vma 必须在 device 之前销毁，此时 transient 内存已经全部归还
        debug_assert_eq!(Arc::strong_count(&self.allocator), 1);
        unsafe { ManuallyDrop::drop(&mut self.allocator) };
        self.gfx_device.destroy();

        if let Some(msger) = &self.debug_msger {
            msger.destroy();
        }
        self.instance.destroy();
    }
}

// getters
impl Device {
    #[inline]
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    #[inline]
    pub fn gfx_device(&self) -> &GfxDevice {
        &self.gfx_device
    }

    #[inline]
    pub fn physical_device(&self) -> &GfxPhysicalDevice {
        &self.pdevice
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_counter.frame_id()
    }

    #[inline]
    pub fn frame_slot(&self) -> usize {
        self.frame_counter.frame_slot()
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frame_counter.fif_count()
    }

    /// compute 是否有独立的 queue
    #[inline]
    pub fn has_dedicated_compute_queue(&self) -> bool {
        self.pdevice.compute_queue_family().is_some()
    }

    #[inline]
    pub fn bindless_set(&self) -> vk::DescriptorSet {
        self.bindless.set()
    }

    #[inline]
    pub fn bindless_layout(&self) -> vk::DescriptorSetLayout {
        self.bindless.layout()
    }

    /// 存活的资源数量，以及等待回收的数量
    pub fn resource_counts(&self) -> ResourceCounts {
        self.resources.counts(self.graveyard.pending_count())
    }

    pub fn wait_idle(&self) -> RhiResult<()> {
        self.gfx_device.wait_idle()
    }

    #[inline]
    fn queue(&self, kind: QueueKind) -> &GfxQueue {
        &self.queues[kind.index()]
    }
}
