mod common;

use cinder_rhi::resources::buffer::BufferDesc;
use cinder_rhi::resources::states::ResourceStates;
use cinder_rhi::resources::texture::TextureDesc;
use cinder_rhi::{PoolHandle, ResourceKind, RhiError, StaleReason};
use common::{empty_frame, new_rhi, small_config};

#[test]
fn short_lived_sweep_keeps_persistent_resources() {
    let mut rhi = new_rhi(small_config());

    let b1 = rhi.create_buffer(&BufferDesc::new("B1", 256, ResourceStates::CONSTANT_BUFFER)).unwrap();
    let t1 = rhi.create_texture(&TextureDesc::new("T1", 16, 16, 1).short_lived()).unwrap();

    for _ in 0..3 {
        empty_frame(&mut rhi);
    }
    rhi.wait_until_device_idle().unwrap();

    let report = rhi.sweep_short_lived().unwrap();
    assert_eq!(report.count(ResourceKind::Texture), 1);
    assert_eq!(report.total(), 1);

    assert!(rhi.textures().try_get(t1).is_none());
    let b1_record = rhi.buffer(b1).unwrap();
    assert_eq!(b1_record.name(), "B1");
    assert_eq!(b1_record.byte_count(), 256);

    // 同一个 slot 被复用，但 generation 不同
    let t2 = rhi.create_texture(&TextureDesc::new("T2", 16, 16, 1).short_lived()).unwrap();
    assert_eq!(t2.raw().index(), t1.raw().index());
    assert_ne!(t2.raw().generation(), t1.raw().generation());
    assert!(matches!(
        rhi.texture(t1),
        Err(RhiError::StaleHandle {
            reason: StaleReason::Freed,
            ..
        })
    ));
    assert!(matches!(rhi.destroy_texture(t1), Err(RhiError::StaleHandle { .. })));
    assert_eq!(rhi.texture(t2).unwrap().name(), "T2");

    rhi.shutdown().unwrap();
}

#[test]
fn sweep_is_rejected_while_recording() {
    let mut rhi = new_rhi(small_config());
    rhi.create_texture(&TextureDesc::new("scratch", 8, 8, 1).short_lived()).unwrap();

    rhi.begin_frame().unwrap();
    assert!(matches!(rhi.sweep_short_lived(), Err(RhiError::InvalidOperation(_))));
    rhi.end_frame().unwrap();

    rhi.wait_until_device_idle().unwrap();
    assert_eq!(rhi.sweep_short_lived().unwrap().count(ResourceKind::Texture), 1);
    rhi.shutdown().unwrap();
}

#[test]
fn back_buffers_survive_sweep_all() {
    let mut rhi = new_rhi(small_config());
    rhi.create_texture(&TextureDesc::new("albedo", 32, 32, 1)).unwrap();
    empty_frame(&mut rhi);
    rhi.wait_until_device_idle().unwrap();

    let report = rhi.sweep_all().unwrap();
    assert_eq!(report.count(ResourceKind::Texture), 1);

    let back_buffer = rhi.swap_chain_texture();
    assert!(rhi.texture(back_buffer).unwrap().name().starts_with("back buffer"));
    assert_eq!(rhi.textures().count_used(), 2);
    assert!(matches!(rhi.destroy_texture(back_buffer), Err(RhiError::InvalidOperation(_))));

    let device = rhi.shutdown().unwrap();
    assert_eq!(device.live_object_count(), 0);
}

#[test]
fn double_destroy_is_reported() {
    let mut rhi = new_rhi(small_config());
    let buffer = rhi.create_buffer(&BufferDesc::new("once", 64, ResourceStates::CONSTANT_BUFFER)).unwrap();

    rhi.destroy_buffer(buffer).unwrap();
    assert!(matches!(rhi.destroy_buffer(buffer), Err(RhiError::DoubleFree(_))));
    rhi.shutdown().unwrap();
}
