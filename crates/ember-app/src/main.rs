//! 无窗口的 smoke 程序：创建设备，写入并拷贝一个 buffer，跑若干帧之后退出
//!
//! 可以通过第一个参数传入 toml 格式的 DeviceConfig

use anyhow::Context;
use ash::vk;
use ember_rhi::basic::color::LabelColor;
use ember_rhi::{
    Barrier, BufferDesc, Device, DeviceConfig, FenceDesc, GfxBarrierMask, MemoryLocation, QueryPoolDesc, QueueKind,
    SubmitDesc,
};

const FRAME_COUNT: usize = 8;
const ELEMENT_COUNT: usize = 1024;

fn load_config() -> anyhow::Result<DeviceConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("failed to read config {path}"))?;
            Ok(DeviceConfig::from_toml_str(&text)?)
        }
        None => Ok(DeviceConfig {
            app_name: "ember-headless".to_string(),
            ..Default::default()
        }),
    }
}

fn main() -> anyhow::Result<()> {
    ember_crate_tools::init_log::init_log();

    let config = load_config()?;
    let mut device = Device::new(config, None).context("failed to create device")?;
    log::info!(
        "device: {}, dedicated compute queue: {}",
        device.physical_device().name(),
        device.has_dedicated_compute_queue()
    );

    let size = (ELEMENT_COUNT * size_of::<u32>()) as vk::DeviceSize;
    let usage = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
    let gpu_buffer = device.create_buffer(BufferDesc::new(size, usage, "gpu-data"))?;
    let readback = device.create_buffer(BufferDesc::new(size, usage, "readback").location(MemoryLocation::GpuToCpu))?;
    let timestamps = device.create_query_pool(QueryPoolDesc::timestamps(2, "frame-timestamps"))?;
    let fence = device.create_fence(FenceDesc::default())?;

    for frame in 0..FRAME_COUNT {
        let data = (0..ELEMENT_COUNT as u32).map(|v| v * frame as u32).collect::<Vec<_>>();
        {
            let mut cmd = device.begin_command_list(QueueKind::Graphics)?;
            cmd.reset_query_pool(timestamps, 0, 2);
            cmd.write_timestamp(timestamps, vk::PipelineStageFlags2::TOP_OF_PIPE, 0);
            cmd.begin_label("upload", LabelColor::COLOR_UPLOAD);
            cmd.update_buffer(gpu_buffer, 0, bytemuck::cast_slice(&data))?;
            cmd.barrier(Barrier::whole_buffer(
                gpu_buffer,
                GfxBarrierMask {
                    src_stage: vk::PipelineStageFlags2::TRANSFER,
                    dst_stage: vk::PipelineStageFlags2::TRANSFER,
                    src_access: vk::AccessFlags2::TRANSFER_WRITE,
                    dst_access: vk::AccessFlags2::TRANSFER_READ,
                },
            ));
            cmd.copy_buffer(gpu_buffer, readback, &[vk::BufferCopy { src_offset: 0, dst_offset: 0, size }]);
            cmd.end_label();
            cmd.write_timestamp(timestamps, vk::PipelineStageFlags2::BOTTOM_OF_PIPE, 1);
            cmd.end()?;
        }
        device.submit_command_lists(&SubmitDesc::default().fence(fence))?;
        device.wait_fence(fence)?;
        device.reset_fence(fence)?;

        let mut result = vec![0_u32; ELEMENT_COUNT];
        device.read_buffer(readback, 0, bytemuck::cast_slice_mut(&mut result))?;
        anyhow::ensure!(result == data, "readback mismatch in frame {frame}");

        if let Some(ticks) = device.query_pool_results(timestamps, 0, 2)? {
            log::info!("frame {}: copy took {:.3} us", frame, device.timestamp_to_ns(ticks[1].saturating_sub(ticks[0])) / 1000.0);
        }
        device.next_frame()?;
    }

    device.destroy_buffer(gpu_buffer);
    device.destroy_buffer(readback);
    device.destroy_query_pool(timestamps);
    device.destroy_fence(fence);
    for _ in 0..device.frames_in_flight() {
        device.next_frame()?;
    }
    log::info!("resources at exit: {:?}", device.resource_counts());

    Ok(())
}
