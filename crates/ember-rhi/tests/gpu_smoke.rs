//! 需要真实 GPU 的测试，默认忽略：`cargo test -p ember-rhi -- --ignored`

use ember_rhi::vk;
use ember_rhi::{
    BufferDesc, Device, DeviceConfig, FenceDesc, MemoryLocation, QueryPoolDesc, QueueKind, RhiError, SubmitDesc,
    TextureDesc,
};

fn headless_device() -> Device {
    ember_crate_tools::init_log::init_test_log();
    let config = DeviceConfig {
        app_name: "gpu-smoke".to_string(),
        frames_in_flight: 2,
        recorders_per_frame: 2,
        ..Default::default()
    };
    Device::new(config, None).unwrap()
}

#[test]
#[ignore = "requires a vulkan device"]
fn test_copy_and_readback() {
    let mut device = headless_device();

    let usage = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
    let gpu = device.create_buffer(BufferDesc::new(256, usage, "gpu")).unwrap();
    let readback =
        device.create_buffer(BufferDesc::new(256, usage, "readback").location(MemoryLocation::GpuToCpu)).unwrap();
    let fence = device.create_fence(FenceDesc::default()).unwrap();

    let payload = (0..=255_u8).collect::<Vec<_>>();
    {
        let mut cmd = device.begin_command_list(QueueKind::Graphics).unwrap();
        cmd.update_buffer(gpu, 0, &payload).unwrap();
        cmd.barrier(ember_rhi::Barrier::Memory(ember_rhi::GfxBarrierMask {
            src_stage: vk::PipelineStageFlags2::TRANSFER,
            dst_stage: vk::PipelineStageFlags2::TRANSFER,
            src_access: vk::AccessFlags2::TRANSFER_WRITE,
            dst_access: vk::AccessFlags2::TRANSFER_READ,
        }));
        cmd.copy_buffer(gpu, readback, &[vk::BufferCopy { src_offset: 0, dst_offset: 0, size: 256 }]);
        cmd.end().unwrap();
    }
    device.submit_command_lists(&SubmitDesc::default().fence(fence)).unwrap();
    device.wait_fence(fence).unwrap();

    let mut out = vec![0_u8; 256];
    device.read_buffer(readback, 0, &mut out).unwrap();
    assert_eq!(out, payload);

    device.destroy_buffer(gpu);
    device.destroy_buffer(readback);
    device.destroy_fence(fence);
    // 还在 graveyard 中
    assert_eq!(device.resource_counts().pending_destroy, 3);
    for _ in 0..device.frames_in_flight() {
        device.next_frame().unwrap();
    }
    assert_eq!(device.resource_counts().pending_destroy, 0);
    assert_eq!(device.resource_counts().buffers, 0);
}

#[test]
#[ignore = "requires a vulkan device"]
fn test_recorder_pool_exhaustion() {
    let device = headless_device();
    let first = device.begin_command_list(QueueKind::Graphics).unwrap();
    let second = device.begin_command_list(QueueKind::Compute).unwrap();
    assert!(matches!(
        device.begin_command_list(QueueKind::Graphics),
        Err(RhiError::RecorderPoolExhausted { capacity: 2 })
    ));
    first.end().unwrap();
    second.end().unwrap();
}

#[test]
#[ignore = "requires a vulkan device"]
fn test_bindless_texture_slot_is_recycled() {
    let mut device = headless_device();
    let desc = TextureDesc::new_2d(
        vk::Format::R8G8B8A8_UNORM,
        vk::Extent2D { width: 4, height: 4 },
        vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        "bindless",
    )
    .bindless(true);

    let texture = device.create_texture(desc.clone()).unwrap();
    let index = device.texture_bindless_index(texture, vk::ImageAspectFlags::empty()).unwrap();
    device.destroy_texture(texture);
    for _ in 0..device.frames_in_flight() {
        device.next_frame().unwrap();
    }

    let again = device.create_texture(desc).unwrap();
    assert_eq!(device.texture_bindless_index(again, vk::ImageAspectFlags::empty()), Some(index));
    device.destroy_texture(again);
}

#[test]
#[ignore = "requires a vulkan device"]
fn test_timestamps_resolve() {
    let mut device = headless_device();
    let pool = device.create_query_pool(QueryPoolDesc::timestamps(2, "timestamps")).unwrap();
    let fence = device.create_fence(FenceDesc::default()).unwrap();
    {
        let mut cmd = device.begin_command_list(QueueKind::Graphics).unwrap();
        cmd.reset_query_pool(pool, 0, 2);
        cmd.write_timestamp(pool, vk::PipelineStageFlags2::TOP_OF_PIPE, 0);
        cmd.write_timestamp(pool, vk::PipelineStageFlags2::BOTTOM_OF_PIPE, 1);
        cmd.end().unwrap();
    }
    device.submit_command_lists(&SubmitDesc::default().fence(fence)).unwrap();
    device.wait_fence(fence).unwrap();

    let values = device.query_pool_results(pool, 0, 2).unwrap().unwrap();
    assert!(values[1] >= values[0]);
    device.destroy_query_pool(pool);
    device.destroy_fence(fence);
}
