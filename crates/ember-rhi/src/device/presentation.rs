use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::foundation::physical_device::QueueKind;
use crate::handles::{SemaphoreHandle, TextureHandle};
use crate::resources::descs::{SemaphoreDesc, TextureDesc};
use crate::resources::records::TextureRecord;
use crate::swapchain::render_swapchain::{RenderSwapchain, SwapchainDesc};
use crate::swapchain::surface::GfxSurface;

/// `acquire_next_image` 的结果
///
/// 渲染到 `texture` 的提交需要等待 `acquire_semaphore`，并 signal `present_semaphore`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    pub texture: TextureHandle,
    pub acquire_semaphore: SemaphoreHandle,
    pub present_semaphore: SemaphoreHandle,
}

/// surface、swapchain，以及注册到资源表中的 swapchain image
pub(super) struct Presentation {
    surface: GfxSurface,
    swapchain: RenderSwapchain,
    desc: SwapchainDesc,
    textures: Vec<TextureHandle>,
    /// 每个 frame slot 一个
    acquire_semaphores: Vec<SemaphoreHandle>,
    /// 每个 swapchain image 一个
    present_semaphores: Vec<SemaphoreHandle>,
    acquired: Option<AcquiredImage>,
}

impl Presentation {
    /// 调用方已经 wait idle
    pub fn destroy(self, device: &mut Device) {
        device.release_swapchain_images(&self.textures, &self.present_semaphores);
        for semaphore in &self.acquire_semaphores {
            if let Some(record) = device.resources.semaphores.erase(*semaphore) {
                device.releaser().semaphore(record);
            }
        }
        self.swapchain.destroy(&device.gfx_device);
        self.surface.destroy();
    }
}

// swapchain
impl Device {
    /// 为窗口创建 surface 和 swapchain，`Device::new` 时需要传入对应的 display
    pub fn create_swapchain(
        &mut self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        desc: SwapchainDesc,
    ) -> RhiResult<()> {
        let _span = tracy_client::span!("Device::create_swapchain");
        if !self.surface_enabled {
            return Err(RhiError::MissingExtension("surface extensions (device was created headless)".to_string()));
        }
        if self.presentation.is_some() {
            log::warn!("replacing the existing swapchain");
            self.destroy_swapchain()?;
        }

        let surface = GfxSurface::new(&self.vk_entry, self.instance.ash_instance(), display, window)?;
        let gfx_family = self.queue(QueueKind::Graphics).family_index();
        match surface.supports_present(self.pdevice.vk_handle(), gfx_family) {
            Ok(true) => {}
            Ok(false) => {
                surface.destroy();
                return Err(RhiError::MissingExtension(format!("queue family {} cannot present", gfx_family)));
            }
            Err(e) => {
                surface.destroy();
                return Err(e);
            }
        }

        let pdevice = self.pdevice.vk_handle();
        let swapchain = match RenderSwapchain::new(&self.gfx_device, &surface, pdevice, &desc, vk::SwapchainKHR::null()) {
            Ok(swapchain) => swapchain,
            Err(e) => {
                surface.destroy();
                return Err(e);
            }
        };

        let mut presentation = Presentation {
            surface,
            swapchain,
            desc,
            textures: vec![],
            acquire_semaphores: vec![],
            present_semaphores: vec![],
            acquired: None,
        };
        if let Err(e) = self.init_presentation(&mut presentation) {
            presentation.destroy(self);
            return Err(e);
        }
        self.presentation = Some(presentation);
        Ok(())
    }

    fn init_presentation(&mut self, presentation: &mut Presentation) -> RhiResult<()> {
        for _ in 0..self.frames_in_flight() {
            presentation.acquire_semaphores.push(self.create_semaphore_record(SemaphoreDesc::Binary, true)?);
        }
        self.register_swapchain_images(presentation)
    }

    /// 把 swapchain image 作为外部 texture 放入资源表，并为每个 image 创建 present semaphore
    fn register_swapchain_images(&mut self, presentation: &mut Presentation) -> RhiResult<()> {
        let format = presentation.swapchain.format();
        let extent = presentation.swapchain.extent();
        let images = presentation.swapchain.images().to_vec();

        for (idx, image) in images.into_iter().enumerate() {
            let desc = TextureDesc::new_2d(
                format,
                extent,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
                format!("swapchain-image-{idx}"),
            );
            let (attachment_view, aspect_views) = self.create_texture_views(image, &desc)?;
            presentation.textures.push(self.resources.textures.emplace(TextureRecord {
                image,
                allocation: None,
                attachment_view,
                aspect_views,
                desc,
            }));
            presentation.present_semaphores.push(self.create_semaphore_record(SemaphoreDesc::Binary, true)?);
        }
        Ok(())
    }

    /// 立即销毁 swapchain image 的 view 以及 present semaphore，调用方已经 wait idle
    fn release_swapchain_images(&mut self, textures: &[TextureHandle], present_semaphores: &[SemaphoreHandle]) {
        for texture in textures {
            if let Some(record) = self.resources.textures.erase(*texture) {
                self.releaser().texture(record);
            }
        }
        for semaphore in present_semaphores {
            if let Some(record) = self.resources.semaphores.erase(*semaphore) {
                self.releaser().semaphore(record);
            }
        }
    }

    /// 窗口尺寸变化或者 `SwapchainOutOfDate` 之后调用
    ///
    /// 旧的 swapchain texture 句柄全部失效
    pub fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
        let _span = tracy_client::span!("Device::recreate_swapchain");
        let Some(mut presentation) = self.presentation.take() else {
            return Err(RhiError::SwapchainOutOfDate);
        };
        if let Err(e) = self.wait_idle() {
            self.presentation = Some(presentation);
            return Err(e);
        }

        let old_textures = std::mem::take(&mut presentation.textures);
        let old_semaphores = std::mem::take(&mut presentation.present_semaphores);
        self.release_swapchain_images(&old_textures, &old_semaphores);
        presentation.acquired = None;
        presentation.desc.extent = extent;

        let new_swapchain = RenderSwapchain::new(
            &self.gfx_device,
            &presentation.surface,
            self.pdevice.vk_handle(),
            &presentation.desc,
            presentation.swapchain.handle(),
        );
        match new_swapchain {
            Ok(swapchain) => {
                presentation.swapchain.destroy(&self.gfx_device);
                presentation.swapchain = swapchain;
            }
            Err(e) => {
                presentation.destroy(self);
                return Err(e);
            }
        }

        if let Err(e) = self.register_swapchain_images(&mut presentation) {
            presentation.destroy(self);
            return Err(e);
        }
        let extent = presentation.swapchain.extent();
        log::info!("swapchain recreated: {}x{}", extent.width, extent.height);
        self.presentation = Some(presentation);
        Ok(())
    }

    pub fn destroy_swapchain(&mut self) -> RhiResult<()> {
        if let Some(presentation) = self.presentation.take() {
            self.wait_idle()?;
            presentation.destroy(self);
        }
        Ok(())
    }

    /// 取得下一个可以渲染的 swapchain image
    pub fn acquire_next_image(&mut self) -> RhiResult<AcquiredImage> {
        let slot = self.frame_slot();
        let timeout = self.config.fence_timeout_ns();
        let presentation = self.presentation.as_mut().ok_or(RhiError::SwapchainOutOfDate)?;

        let acquire_semaphore = presentation.acquire_semaphores[slot];
        let vk_semaphore = self.resources.semaphores.try_get(acquire_semaphore)?.semaphore;
        let (index, suboptimal) = presentation.swapchain.acquire_next_image(&self.gfx_device, vk_semaphore, timeout)?;
        if suboptimal {
            log::debug!("swapchain is suboptimal");
        }

        let acquired = AcquiredImage {
            index,
            texture: presentation.textures[index as usize],
            acquire_semaphore,
            present_semaphore: presentation.present_semaphores[index as usize],
        };
        presentation.acquired = Some(acquired);
        Ok(acquired)
    }

    /// 呈现最近一次 acquire 的 image，等待它的 present semaphore
    ///
    /// 返回 swapchain 是否 suboptimal；`SwapchainOutOfDate` 时需要 `recreate_swapchain`
    pub fn present(&mut self) -> RhiResult<bool> {
        let _span = tracy_client::span!("Device::present");
        let presentation = self.presentation.as_mut().ok_or(RhiError::SwapchainOutOfDate)?;
        let Some(acquired) = presentation.acquired.take() else {
            log::error!("present without an acquired swapchain image");
            debug_assert!(false, "present without an acquired swapchain image");
            return Ok(false);
        };

        let wait = self.resources.semaphores.try_get(acquired.present_semaphore)?.semaphore;
        presentation.swapchain.present_image(
            &self.gfx_device,
            self.queues[QueueKind::Graphics.index()].handle(),
            acquired.index,
            std::slice::from_ref(&wait),
        )
    }

    /// 第 index 个 swapchain image 对应的 texture
    pub fn swapchain_texture(&self, index: u32) -> Option<TextureHandle> {
        self.presentation.as_ref()?.textures.get(index as usize).copied()
    }

    pub fn swapchain_textures(&self) -> Vec<TextureHandle> {
        self.presentation.as_ref().map(|p| p.textures.clone()).unwrap_or_default()
    }

    pub fn swapchain_extent(&self) -> Option<vk::Extent2D> {
        self.presentation.as_ref().map(|p| p.swapchain.extent())
    }

    pub fn swapchain_format(&self) -> Option<vk::Format> {
        self.presentation.as_ref().map(|p| p.swapchain.format())
    }
}
