use ash::vk;

use crate::error::{RhiError, RhiResult};
use crate::foundation::device::GfxDevice;
use crate::swapchain::surface::GfxSurface;

/// 创建 swapchain 的参数，format 和 present mode 不受支持时会回退
#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    /// surface 没有给出固定尺寸时使用
    pub extent: vk::Extent2D,
}

impl Default for SwapchainDesc {
    fn default() -> Self {
        Self {
            surface_format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            present_mode: vk::PresentModeKHR::MAILBOX,
            extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
        }
    }
}

/// max_image_count == 0，表示不限制 image 数量
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    if caps.max_image_count == 0 {
        caps.min_image_count + 1
    } else {
        u32::min(caps.max_image_count, caps.min_image_count + 1)
    }
}

/// current_extent 为 u32::MAX 时由 swapchain 决定尺寸
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, desired: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: desired.width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: desired.height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> Option<vk::SurfaceFormatKHR> {
    formats.iter().find(|f| **f == preferred).or_else(|| formats.first()).copied()
}

/// FIFO 是唯一保证受支持的模式
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], preferred: vk::PresentModeKHR) -> vk::PresentModeKHR {
    if modes.contains(&preferred) { preferred } else { vk::PresentModeKHR::FIFO }
}

pub struct RenderSwapchain {
    swapchain_handle: vk::SwapchainKHR,

    /// 这里的 image 并非手动创建的，由 swapchain 持有
    swapchain_images: Vec<vk::Image>,
    surface_format: vk::SurfaceFormatKHR,
    swapchain_extent: vk::Extent2D,
}

// new & init
impl RenderSwapchain {
    pub fn new(
        device: &GfxDevice,
        surface: &GfxSurface,
        pdevice: vk::PhysicalDevice,
        desc: &SwapchainDesc,
        old_swapchain: vk::SwapchainKHR,
    ) -> RhiResult<Self> {
        let _span = tracy_client::span!("RenderSwapchain::new");
        let swapchain_pf = device.swapchain().ok_or_else(|| {
            RhiError::MissingExtension(ash::khr::swapchain::NAME.to_string_lossy().into_owned())
        })?;

        let caps = surface.capabilities(pdevice)?;
        let surface_format = choose_surface_format(&surface.formats(pdevice)?, desc.surface_format)
            .ok_or(RhiError::ResourceCreation {
                what: "swapchain",
                result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
            })?;
        let present_mode = choose_present_mode(&surface.present_modes(pdevice)?, desc.present_mode);
        let extent = choose_extent(&caps, desc.extent);
        log::info!(
            "create swapchain: {:?}, {:?}, {}x{}",
            surface_format.format,
            present_mode,
            extent.width,
            extent.height
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(choose_image_count(&caps))
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain_handle = unsafe { swapchain_pf.create_swapchain(&create_info, None) }
            .map_err(RhiError::creation("swapchain"))?;
        device.set_object_debug_name(swapchain_handle, "main");

        let images = match unsafe { swapchain_pf.get_swapchain_images(swapchain_handle) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_pf.destroy_swapchain(swapchain_handle, None) };
                return Err(RhiError::vulkan("vkGetSwapchainImagesKHR")(e));
            }
        };
        for (img_idx, img) in images.iter().enumerate() {
            device.set_object_debug_name(*img, format!("swapchain-image-{img_idx}"));
        }

        Ok(Self {
            swapchain_handle,
            swapchain_images: images,
            surface_format,
            swapchain_extent: extent,
        })
    }
}

// destroy
impl RenderSwapchain {
    pub fn destroy(&self, device: &GfxDevice) {
        if let Some(swapchain_pf) = device.swapchain() {
            unsafe { swapchain_pf.destroy_swapchain(self.swapchain_handle, None) };
        }
    }
}

// getters
impl RenderSwapchain {
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain_handle
    }

    #[inline]
    pub fn images(&self) -> &[vk::Image] {
        &self.swapchain_images
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain_extent
    }
}

// tools
impl RenderSwapchain {
    /// timeout: nano seconds
    ///
    /// 返回 image index 以及是否 suboptimal
    pub fn acquire_next_image(
        &self,
        device: &GfxDevice,
        semaphore: vk::Semaphore,
        timeout: u64,
    ) -> RhiResult<(u32, bool)> {
        let swapchain_pf = device.swapchain().ok_or(RhiError::SwapchainOutOfDate)?;
        match unsafe { swapchain_pf.acquire_next_image(self.swapchain_handle, timeout, semaphore, vk::Fence::null()) } {
            Ok(result) => Ok(result),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RhiError::SwapchainOutOfDate),
            Err(vk::Result::TIMEOUT) => Err(RhiError::DeviceLost),
            Err(e) => Err(RhiError::vulkan("vkAcquireNextImageKHR")(e)),
        }
    }

    /// 返回是否 suboptimal
    pub fn present_image(
        &self,
        device: &GfxDevice,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> RhiResult<bool> {
        let swapchain_pf = device.swapchain().ok_or(RhiError::SwapchainOutOfDate)?;
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .image_indices(&image_indices)
            .swapchains(std::slice::from_ref(&self.swapchain_handle));

        match unsafe { swapchain_pf.queue_present(queue, &present_info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RhiError::SwapchainOutOfDate),
            Err(e) => Err(RhiError::vulkan("vkQueuePresentKHR")(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32, current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: current,
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_image_count() {
        let fixed = vk::Extent2D { width: 800, height: 600 };
        assert_eq!(choose_image_count(&caps(2, 0, fixed)), 3);
        assert_eq!(choose_image_count(&caps(2, 2, fixed)), 2);
        assert_eq!(choose_image_count(&caps(2, 8, fixed)), 3);
    }

    #[test]
    fn test_extent() {
        let fixed = vk::Extent2D { width: 800, height: 600 };
        let desired = vk::Extent2D {
            width: 10_000,
            height: 300,
        };
        assert_eq!(choose_extent(&caps(2, 0, fixed), desired), fixed);

        let free = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        assert_eq!(choose_extent(&caps(2, 0, free), desired), vk::Extent2D { width: 4096, height: 300 });
    }

    #[test]
    fn test_format_and_present_mode_fallback() {
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[srgb, unorm], unorm), Some(unorm));
        assert_eq!(choose_surface_format(&[srgb], unorm), Some(srgb));
        assert_eq!(choose_surface_format(&[], unorm), None);

        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE), vk::PresentModeKHR::IMMEDIATE);
        assert_eq!(choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX), vk::PresentModeKHR::FIFO);
    }
}
