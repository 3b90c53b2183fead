//! 所有资源的句柄类型
//!
//! 句柄由 slotmap 生成，内部是 (slot index, generation)，句柄的类型本身就是 kind tag。
//! 资源被 erase 之后 generation 递增，旧句柄再去查询只会得到 None。

use slotmap::new_key_type;

/// 资源的种类，用于日志和错误信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Texture,
    Sampler,
    RenderPass,
    Framebuffer,
    GraphicsPipeline,
    ComputePipeline,
    Semaphore,
    Fence,
    Binding,
    QueryPool,
}

/// 带有 kind tag 的句柄
pub trait ResourceHandle: slotmap::Key {
    const KIND: ResourceKind;
}

macro_rules! resource_handles {
    ($($handle:ident => $kind:ident,)*) => {
        new_key_type! {
            $(pub struct $handle;)*
        }
        $(
            impl ResourceHandle for $handle {
                const KIND: ResourceKind = ResourceKind::$kind;
            }
        )*
    };
}

resource_handles! {
    BufferHandle => Buffer,
    TextureHandle => Texture,
    SamplerHandle => Sampler,
    RenderPassHandle => RenderPass,
    FramebufferHandle => Framebuffer,
    GraphicsPipelineHandle => GraphicsPipeline,
    ComputePipelineHandle => ComputePipeline,
    SemaphoreHandle => Semaphore,
    FenceHandle => Fence,
    BindingHandle => Binding,
    QueryPoolHandle => QueryPool,
}
