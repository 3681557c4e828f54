mod common;

use cinder_rhi::headless::HeadlessDevice;
use cinder_rhi::resources::buffer::BufferDesc;
use cinder_rhi::resources::states::ResourceStates;
use cinder_rhi::{ErrorClass, ResourceKind, Rhi, RhiConfig, RhiError};
use common::{new_rhi, small_config};

#[test]
fn full_pool_keeps_existing_handles_valid() {
    let mut rhi = new_rhi(RhiConfig {
        max_buffers: 1,
        ..small_config()
    });

    let first = rhi
        .create_buffer(&BufferDesc::new("first", 64, ResourceStates::CONSTANT_BUFFER))
        .unwrap();
    let err = rhi
        .create_buffer(&BufferDesc::new("second", 64, ResourceStates::CONSTANT_BUFFER))
        .unwrap_err();
    assert!(matches!(
        err,
        RhiError::PoolExhausted {
            kind: ResourceKind::Buffer,
            capacity: 1
        }
    ));
    assert_eq!(err.class(), ErrorClass::Capacity);

    assert_eq!(rhi.buffer(first).unwrap().name(), "first");
    // 失败的创建不会泄漏 native 对象或描述符
    let (cbv_used, _) = rhi
        .descriptor_heaps()
        .usage(cinder_rhi::descriptor::DescriptorHeapKind::ShaderResource);
    assert_eq!(cbv_used, 3);

    rhi.destroy_buffer(first).unwrap();
    rhi.create_buffer(&BufferDesc::new("third", 64, ResourceStates::CONSTANT_BUFFER))
        .unwrap();
    let device = rhi.shutdown().unwrap();
    assert_eq!(device.live_object_count(), 0);
}

#[test]
fn invalid_config_is_rejected_up_front() {
    cinder_crate_tools::init_log::init_test_log();

    let no_room = RhiConfig {
        max_textures: 2,
        ..small_config()
    };
    assert!(matches!(
        Rhi::new(HeadlessDevice::default(), no_room),
        Err(RhiError::InvalidConfig(_))
    ));

    let too_many_frames = RhiConfig {
        frame_count: 9,
        ..small_config()
    };
    assert!(matches!(
        Rhi::new(HeadlessDevice::default(), too_many_frames),
        Err(RhiError::InvalidConfig(_))
    ));
}

#[test]
fn config_round_trips_through_toml() {
    let config = small_config();
    let text = config.to_toml_string().unwrap();
    assert_eq!(RhiConfig::from_toml_str(&text).unwrap(), config);

    assert!(matches!(
        RhiConfig::from_toml_str("frame_count = 0"),
        Err(RhiError::InvalidConfig(_))
    ));
}
