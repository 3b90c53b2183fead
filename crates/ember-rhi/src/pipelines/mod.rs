pub mod pipeline;
pub mod pipeline_layout;
pub mod shader;
pub mod shader_reflection;
