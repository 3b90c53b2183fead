use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::error::{RhiError, RhiResult};

pub struct GfxSurface {
    pub(crate) handle: vk::SurfaceKHR,
    pub(crate) pf: ash::khr::surface::Instance,
}

// new & init
impl GfxSurface {
    pub fn new(
        vk_entry: &ash::Entry,
        instance: &ash::Instance,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> RhiResult<Self> {
        let pf = ash::khr::surface::Instance::new(vk_entry, instance);
        let handle = unsafe { ash_window::create_surface(vk_entry, instance, display_handle, window_handle, None) }
            .map_err(RhiError::creation("surface"))?;

        Ok(Self { handle, pf })
    }
}

// destroy
impl GfxSurface {
    pub fn destroy(&self) {
        unsafe { self.pf.destroy_surface(self.handle, None) }
    }
}

// getters
impl GfxSurface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    pub fn capabilities(&self, pdevice: vk::PhysicalDevice) -> RhiResult<vk::SurfaceCapabilitiesKHR> {
        unsafe { self.pf.get_physical_device_surface_capabilities(pdevice, self.handle) }
            .map_err(RhiError::vulkan("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))
    }

    pub fn formats(&self, pdevice: vk::PhysicalDevice) -> RhiResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe { self.pf.get_physical_device_surface_formats(pdevice, self.handle) }
            .map_err(RhiError::vulkan("vkGetPhysicalDeviceSurfaceFormatsKHR"))
    }

    pub fn present_modes(&self, pdevice: vk::PhysicalDevice) -> RhiResult<Vec<vk::PresentModeKHR>> {
        unsafe { self.pf.get_physical_device_surface_present_modes(pdevice, self.handle) }
            .map_err(RhiError::vulkan("vkGetPhysicalDeviceSurfacePresentModesKHR"))
    }

    /// gfx queue 是否可以 present 到这个 surface
    pub fn supports_present(&self, pdevice: vk::PhysicalDevice, queue_family_index: u32) -> RhiResult<bool> {
        unsafe { self.pf.get_physical_device_surface_support(pdevice, queue_family_index, self.handle) }
            .map_err(RhiError::vulkan("vkGetPhysicalDeviceSurfaceSupportKHR"))
    }
}
