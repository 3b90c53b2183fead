pub mod frame_counter;
pub mod frame_lifecycle;
pub mod frame_timeline;
