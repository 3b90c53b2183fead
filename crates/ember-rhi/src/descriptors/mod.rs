pub mod binding_cache;
pub mod bindless;
pub mod descriptor_info;
pub mod descriptor_pool;
