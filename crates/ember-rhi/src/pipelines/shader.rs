use ash::vk;

use crate::error::{RhiError, RhiResult};
use crate::foundation::device::GfxDevice;

/// # Destroy
///
/// 只在创建 pipeline 期间存在，需要手动调用 `destroy`
pub struct GfxShaderModule {
    handle: vk::ShaderModule,

    #[cfg(debug_assertions)]
    destroyed: bool,
}

impl GfxShaderModule {
    pub fn new(device: &GfxDevice, spirv: &[u32], debug_name: &str) -> RhiResult<Self> {
        let shader_module_info = vk::ShaderModuleCreateInfo::default().code(spirv);
        let handle = unsafe { device.create_shader_module(&shader_module_info, None) }
            .map_err(RhiError::creation("shader module"))?;
        device.set_object_debug_name(handle, debug_name);

        Ok(Self {
            handle,
            #[cfg(debug_assertions)]
            destroyed: false,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }

    pub fn destroy(mut self, device: &GfxDevice) {
        unsafe {
            device.destroy_shader_module(self.handle, None);
        }
        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}

impl Drop for GfxShaderModule {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert!(self.destroyed, "GfxShaderModule must be destroyed manually before drop.");
    }
}
