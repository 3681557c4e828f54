mod common;

use cinder_rhi::device::QueueKind;
use cinder_rhi::resources::buffer::BufferDesc;
use cinder_rhi::resources::states::{MemoryUsage, ResourceStates};
use cinder_rhi::resources::texture::{TextureDesc, TextureUpload};
use cinder_rhi::{ErrorClass, RhiError, TextureBarrier};
use common::{empty_frame, new_rhi, small_config};

fn gpu_buffer(name: &str, byte_count: u64) -> BufferDesc {
    BufferDesc::new(name, byte_count, ResourceStates::VERTEX_BUFFER).with_memory_usage(MemoryUsage::Gpu)
}

#[test]
fn oversized_upload_fails_before_writing() {
    let mut rhi = new_rhi(small_config());
    let big = rhi.create_buffer(&gpu_buffer("big", 8192)).unwrap();

    let err = rhi.begin_buffer_upload(big, 0, 8192).unwrap_err();
    assert!(matches!(
        err,
        RhiError::UploadTooLarge {
            requested: 8192,
            capacity: 4096
        }
    ));
    assert_eq!(err.class(), ErrorClass::Capacity);
    assert!(!rhi.upload_ring().is_open());
    assert_eq!(rhi.upload_ring().cursor(), 0);

    rhi.wait_until_device_idle().unwrap();
    let native = rhi.buffer(big).unwrap().native();
    assert!(rhi.device().buffer_contents(native).unwrap().iter().all(|&byte| byte == 0));
    rhi.shutdown().unwrap();
}

#[test]
fn buffer_upload_lands_after_idle() {
    let mut rhi = new_rhi(small_config());
    let vertices = rhi.create_buffer(&gpu_buffer("vertices", 64)).unwrap();

    let data: Vec<u8> = (0..32).collect();
    rhi.upload_buffer(vertices, 16, &data).unwrap();
    empty_frame(&mut rhi);
    rhi.wait_until_device_idle().unwrap();

    let native = rhi.buffer(vertices).unwrap().native();
    let contents = rhi.device().buffer_contents(native).unwrap();
    assert!(contents[..16].iter().all(|&byte| byte == 0));
    assert_eq!(&contents[16..48], data.as_slice());
    assert_eq!(rhi.device().stats().submissions[1], 1);
    rhi.shutdown().unwrap();
}

#[test]
fn texture_upload_is_tightly_packed_on_the_gpu() {
    let mut rhi = new_rhi(small_config());
    let texture = rhi
        .create_texture(&TextureDesc::new("checker", 4, 2, 1).allow(ResourceStates::COPY_DESTINATION))
        .unwrap();

    let pixels: Vec<u8> = (0..32).collect();
    rhi.upload_texture(texture, &TextureUpload::full(4, 2, &pixels)).unwrap();
    rhi.wait_until_device_idle().unwrap();

    let native = rhi.texture(texture).unwrap().native();
    assert_eq!(rhi.device().texture_contents(native, 0).unwrap(), pixels.as_slice());
    rhi.shutdown().unwrap();
}

#[test]
fn texture_upload_rejects_wrong_size() {
    let mut rhi = new_rhi(small_config());
    let texture = rhi.create_texture(&TextureDesc::new("small", 4, 4, 1)).unwrap();

    let pixels = [0u8; 10];
    assert!(matches!(
        rhi.upload_texture(texture, &TextureUpload::full(4, 4, &pixels)),
        Err(RhiError::InvalidArgument(_))
    ));
    assert!(!rhi.upload_ring().is_open());
    rhi.shutdown().unwrap();
}

#[test]
fn upload_ring_wraps_and_reuses_retired_space() {
    let mut rhi = new_rhi(small_config());
    let buffer = rhi.create_buffer(&gpu_buffer("streamed", 1500)).unwrap();

    for round in 0..6u8 {
        let data = vec![round; 1500];
        rhi.upload_buffer(buffer, 0, &data).unwrap();
        empty_frame(&mut rhi);
    }
    rhi.wait_until_device_idle().unwrap();

    let native = rhi.buffer(buffer).unwrap().native();
    assert!(rhi.device().buffer_contents(native).unwrap().iter().all(|&byte| byte == 5));
    assert_eq!(rhi.upload_ring().total_uploads(), 6);
    assert_eq!(rhi.upload_ring().unretired_count(), 0);
    rhi.shutdown().unwrap();
}

#[test]
fn open_upload_blocks_destroy_and_end_frame() {
    let mut rhi = new_rhi(small_config());
    let buffer = rhi.create_buffer(&gpu_buffer("pending", 128)).unwrap();

    rhi.begin_frame().unwrap();
    rhi.begin_buffer_upload(buffer, 0, 128).unwrap().fill(7);
    assert!(matches!(rhi.destroy_buffer(buffer), Err(RhiError::InvalidOperation(_))));
    assert!(matches!(rhi.end_frame(), Err(RhiError::InvalidOperation(_))));
    assert!(matches!(rhi.begin_buffer_upload(buffer, 0, 16), Err(RhiError::InvalidOperation(_))));

    rhi.end_upload().unwrap();
    rhi.end_frame().unwrap();
    rhi.wait_until_device_idle().unwrap();
    rhi.destroy_buffer(buffer).unwrap();
    rhi.shutdown().unwrap();
}

#[test]
fn upload_out_of_buffer_bounds_is_rejected() {
    let mut rhi = new_rhi(small_config());
    let buffer = rhi.create_buffer(&gpu_buffer("short", 32)).unwrap();

    assert!(matches!(
        rhi.begin_buffer_upload(buffer, 16, 32),
        Err(RhiError::InvalidArgument(_))
    ));
    assert!(matches!(rhi.end_upload(), Err(RhiError::InvalidOperation(_))));
    rhi.shutdown().unwrap();
}

#[test]
fn frame_waits_for_the_upload_it_consumes() {
    let mut rhi = new_rhi(small_config());
    let vertices = rhi.create_buffer(&gpu_buffer("vertices", 16)).unwrap();
    let native = rhi.buffer(vertices).unwrap().native();

    rhi.device_mut().hang_queue(QueueKind::Copy);
    rhi.begin_frame().unwrap();
    rhi.upload_buffer(vertices, 0, &[7; 16]).unwrap();
    rhi.cmd_draw(3, 0).unwrap();
    rhi.end_frame().unwrap();

    // copy queue 停住时，主队列的帧不能越过 upload fence
    rhi.device_mut().gpu_flush();
    assert_eq!(rhi.device().pending_submissions(QueueKind::Copy), 1);
    assert_eq!(rhi.device().pending_submissions(QueueKind::Main), 1);
    assert_eq!(rhi.device().stats().draws, 0);
    assert!(rhi.device().buffer_contents(native).unwrap().iter().all(|&byte| byte == 0));

    rhi.device_mut().resume();
    rhi.wait_until_device_idle().unwrap();
    assert_eq!(rhi.device().pending_submissions(QueueKind::Main), 0);
    assert_eq!(rhi.device().stats().draws, 1);
    assert_eq!(rhi.device().buffer_contents(native).unwrap(), [7; 16].as_slice());
    rhi.shutdown().unwrap();
}

#[test]
fn texture_upload_after_a_barrier_in_the_open_frame_is_rejected() {
    let mut rhi = new_rhi(small_config());
    let texture = rhi
        .create_texture(&TextureDesc::new("albedo", 4, 4, 1).allow(ResourceStates::COPY_DESTINATION))
        .unwrap();
    let pixels = vec![9u8; 4 * 4 * 4];

    rhi.begin_frame().unwrap();
    // barrier 之前的上传可以基于 GPU 上的状态
    rhi.upload_texture(texture, &TextureUpload::full(4, 4, &pixels)).unwrap();
    rhi.cmd_barrier(&[TextureBarrier::new(texture, ResourceStates::COPY_DESTINATION)], &[]).unwrap();
    let err = rhi.upload_texture(texture, &TextureUpload::full(4, 4, &pixels)).unwrap_err();
    assert!(matches!(err, RhiError::InvalidOperation(_)));
    assert!(!rhi.upload_ring().is_open());
    rhi.cmd_barrier(&[TextureBarrier::new(texture, ResourceStates::PIXEL_SHADER_ACCESS)], &[]).unwrap();
    rhi.end_frame().unwrap();

    // 帧提交之后，copy queue 排在这一帧之后
    rhi.upload_texture(texture, &TextureUpload::full(4, 4, &pixels)).unwrap();
    rhi.wait_until_device_idle().unwrap();
    let native = rhi.texture(texture).unwrap().native();
    assert_eq!(rhi.device().texture_contents(native, 0).unwrap(), pixels.as_slice());
    rhi.shutdown().unwrap();
}

#[test]
fn texture_upload_after_a_barrier_in_the_temp_list_is_rejected() {
    let mut rhi = new_rhi(small_config());
    let texture = rhi
        .create_texture(&TextureDesc::new("lut", 2, 2, 1).allow(ResourceStates::COPY_DESTINATION))
        .unwrap();
    let pixels = vec![1u8; 2 * 2 * 4];

    rhi.begin_temp_command_list().unwrap();
    rhi.cmd_barrier(&[TextureBarrier::new(texture, ResourceStates::COPY_DESTINATION)], &[]).unwrap();
    assert!(matches!(
        rhi.upload_texture(texture, &TextureUpload::full(2, 2, &pixels)),
        Err(RhiError::InvalidOperation(_))
    ));
    rhi.end_temp_command_list().unwrap();

    rhi.upload_texture(texture, &TextureUpload::full(2, 2, &pixels)).unwrap();
    rhi.shutdown().unwrap();
}
