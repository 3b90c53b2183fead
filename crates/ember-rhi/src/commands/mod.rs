pub mod barrier;
pub mod command_list;
pub mod queue;
pub mod recorder;
pub mod submit;
