mod common;

use cinder_rhi::frame_pipeline::FrameState;
use cinder_rhi::headless::{HeadlessConfig, HeadlessDevice};
use cinder_rhi::queries::DurationSample;
use cinder_rhi::resources::format::{PipelineType, TextureFormat};
use cinder_rhi::resources::pipeline::{DepthStencilState, GraphicsPipelineDesc};
use cinder_rhi::resources::root_signature::RootSignatureDesc;
use cinder_rhi::resources::shader::ShaderDesc;
use cinder_rhi::resources::states::{ResourceStates, ShaderStage};
use cinder_rhi::{ErrorClass, Rhi, RhiConfig, RhiError, TextureBarrier};
use common::{empty_frame, new_rhi, small_config};

#[test]
fn frames_in_flight_never_exceed_frame_count() {
    let mut rhi = new_rhi(RhiConfig {
        frame_count: 3,
        ..small_config()
    });

    let mut names = Vec::new();
    for _ in 0..10 {
        rhi.begin_frame().unwrap();
        names.push(rhi.frame_name());
        rhi.end_frame().unwrap();
    }
    assert_eq!(rhi.device().stats().max_frames_in_flight, 3);
    assert_eq!(&names[..4], ["[F0A]", "[F1B]", "[F2C]", "[F3A]"]);

    rhi.wait_until_device_idle().unwrap();
    for index in 0..3 {
        assert_eq!(rhi.frame_state(index), Some(FrameState::Retired));
    }
    rhi.shutdown().unwrap();
}

#[test]
fn frame_calls_must_alternate() {
    let mut rhi = new_rhi(small_config());
    assert!(matches!(rhi.end_frame(), Err(RhiError::FrameState { .. })));
    assert!(matches!(rhi.cmd_draw(3, 0), Err(RhiError::InvalidOperation(_))));

    rhi.begin_frame().unwrap();
    assert!(matches!(rhi.begin_frame(), Err(RhiError::FrameState { .. })));
    rhi.end_frame().unwrap();
    rhi.shutdown().unwrap();
}

#[test]
fn draw_into_the_back_buffer() {
    let mut rhi = new_rhi(small_config());
    let rs = rhi
        .create_root_signature(&RootSignatureDesc::new("fullscreen", PipelineType::Graphics).with_constants(ShaderStage::Vertex, 16))
        .unwrap();
    let vs = rhi
        .create_shader(&ShaderDesc::new("fullscreen.vs", ShaderStage::Vertex, vec![0x03, 0x02, 0x23, 0x07]))
        .unwrap();
    let pipeline = rhi
        .create_graphics_pipeline(
            &GraphicsPipelineDesc::new("fullscreen", rs, vs)
                .with_depth_stencil(DepthStencilState::disabled())
                .add_render_target(TextureFormat::Rgba8Unorm, None),
        )
        .unwrap();

    for _ in 0..2 {
        rhi.begin_frame().unwrap();
        let back_buffer = rhi.swap_chain_texture();
        rhi.cmd_bind_render_targets(&[back_buffer], None).unwrap();
        rhi.cmd_clear_color_target(back_buffer).unwrap();
        rhi.cmd_set_viewport(0, 0, 64, 64).unwrap();
        rhi.cmd_set_scissor(0, 0, 64, 64).unwrap();
        rhi.cmd_bind_root_signature(rs).unwrap();
        rhi.cmd_bind_pipeline(pipeline).unwrap();
        rhi.cmd_set_root_constants_typed(rs, ShaderStage::Vertex, &[1.0f32, 0.5, 0.25, 1.0]).unwrap();
        rhi.cmd_draw(3, 0).unwrap();
        rhi.cmd_barrier(&[TextureBarrier::new(back_buffer, ResourceStates::PIXEL_SHADER_ACCESS)], &[])
            .unwrap();
        rhi.end_frame().unwrap();
    }
    rhi.wait_until_device_idle().unwrap();

    let stats = rhi.device().stats();
    assert_eq!(stats.draws, 2);
    assert_eq!(stats.clears, 2);
    assert_eq!(stats.barrier_batches, 2);
    rhi.shutdown().unwrap();
}

#[test]
fn barrier_outside_allowed_states_is_rejected() {
    let mut rhi = new_rhi(small_config());
    rhi.begin_frame().unwrap();
    let back_buffer = rhi.swap_chain_texture();

    let err = rhi
        .cmd_barrier(&[TextureBarrier::new(back_buffer, ResourceStates::UNORDERED_ACCESS)], &[])
        .unwrap_err();
    assert!(matches!(err, RhiError::StateNotAllowed { .. }));
    assert_eq!(err.class(), ErrorClass::Contract);
    assert_eq!(rhi.texture(back_buffer).unwrap().current_state(), ResourceStates::RENDER_TARGET);

    rhi.end_frame().unwrap();
    rhi.shutdown().unwrap();
}

#[test]
fn root_constants_must_match_the_declared_size() {
    let mut rhi = new_rhi(small_config());
    let rs = rhi
        .create_root_signature(&RootSignatureDesc::new("constants", PipelineType::Graphics).with_constants(ShaderStage::Pixel, 8))
        .unwrap();

    rhi.begin_frame().unwrap();
    assert!(matches!(
        rhi.cmd_set_root_constants(rs, ShaderStage::Pixel, &[0u8; 4]),
        Err(RhiError::InvalidArgument(_))
    ));
    assert!(matches!(
        rhi.cmd_set_root_constants(rs, ShaderStage::Vertex, &[0u8; 8]),
        Err(RhiError::InvalidArgument(_))
    ));
    rhi.cmd_set_root_constants(rs, ShaderStage::Pixel, &[0u8; 8]).unwrap();
    rhi.end_frame().unwrap();
    rhi.shutdown().unwrap();
}

#[test]
fn temp_command_list_completes_before_returning() {
    let mut rhi = new_rhi(small_config());

    rhi.begin_temp_command_list().unwrap();
    assert!(matches!(rhi.begin_temp_command_list(), Err(RhiError::InvalidOperation(_))));
    assert!(matches!(rhi.begin_frame(), Err(RhiError::InvalidOperation(_))));
    rhi.cmd_dispatch(8, 8, 1).unwrap();
    rhi.end_temp_command_list().unwrap();

    assert_eq!(rhi.device().stats().dispatches, 1);
    assert_eq!(rhi.device().pending_submissions(cinder_rhi::device::QueueKind::Main), 0);
    rhi.shutdown().unwrap();
}

#[test]
fn duration_queries_resolve_when_the_slot_comes_around() {
    let mut rhi = new_rhi(small_config());

    rhi.begin_frame().unwrap();
    let id = rhi.cmd_begin_duration_query("scene").unwrap();
    rhi.cmd_draw(3, 0).unwrap();
    rhi.cmd_end_duration_query(id).unwrap();
    assert!(matches!(rhi.cmd_end_duration_query(id), Err(RhiError::InvalidOperation(_))));
    rhi.end_frame().unwrap();
    assert!(rhi.get_durations().is_empty());

    // slot 1
    empty_frame(&mut rhi);
    assert!(rhi.get_durations().is_empty());

    // 回到 slot 0，上一轮的查询被读回
    rhi.begin_frame().unwrap();
    assert_eq!(
        rhi.get_durations(),
        [DurationSample {
            name: "scene".to_string(),
            micros: 2,
        }]
    );
    rhi.end_frame().unwrap();
    rhi.shutdown().unwrap();
}

#[test]
fn open_duration_query_is_closed_by_end_frame() {
    let mut rhi = new_rhi(small_config());

    rhi.begin_frame().unwrap();
    rhi.cmd_begin_duration_query("unfinished").unwrap();
    rhi.cmd_draw(3, 0).unwrap();
    rhi.end_frame().unwrap();
    empty_frame(&mut rhi);

    // slot 0 回来时，查询已经有结束 timestamp，可以读回
    rhi.begin_frame().unwrap();
    let names = rhi.get_durations().iter().map(|sample| sample.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, ["unfinished"]);
    rhi.end_frame().unwrap();

    // slot 1 上一帧没有查询，旧的结果被清空
    rhi.begin_frame().unwrap();
    assert!(rhi.get_durations().is_empty());
    rhi.end_frame().unwrap();
    rhi.shutdown().unwrap();
}

#[test]
fn duration_queries_are_limited_per_frame() {
    let mut rhi = new_rhi(small_config());
    rhi.begin_frame().unwrap();
    for i in 0..4 {
        let id = rhi.cmd_begin_duration_query(&format!("pass {i}")).unwrap();
        rhi.cmd_end_duration_query(id).unwrap();
    }
    assert!(matches!(
        rhi.cmd_begin_duration_query("one too many"),
        Err(RhiError::DurationQueriesExhausted { limit: 4 })
    ));
    rhi.end_frame().unwrap();
    rhi.shutdown().unwrap();
}

#[test]
fn hung_gpu_surfaces_as_fence_timeout() {
    let mut rhi = new_rhi(small_config());
    empty_frame(&mut rhi);
    empty_frame(&mut rhi);

    rhi.device_mut().hang();
    let err = rhi.begin_frame().unwrap_err();
    assert!(matches!(err, RhiError::FenceTimeout { value: 1, .. }));
    assert!(err.is_device_failure());

    rhi.device_mut().resume();
    rhi.begin_frame().unwrap();
    rhi.end_frame().unwrap();
    rhi.shutdown().unwrap();
}

#[test]
fn lost_device_fails_every_call() {
    let mut rhi = Rhi::new(
        HeadlessDevice::new(HeadlessConfig {
            name: "doomed".to_string(),
            ..HeadlessConfig::default()
        }),
        small_config(),
    )
    .unwrap();
    empty_frame(&mut rhi);

    rhi.device_mut().lose_device("driver reset");
    let err = rhi
        .create_shader(&ShaderDesc::new("late", ShaderStage::Compute, vec![1, 2, 3, 4]))
        .unwrap_err();
    assert!(matches!(err, RhiError::DeviceLost { .. }));
    assert_eq!(err.class(), ErrorClass::Device);
    assert!(matches!(rhi.wait_until_device_idle(), Err(RhiError::DeviceLost { .. })));
    assert!(matches!(rhi.shutdown(), Err(RhiError::DeviceLost { .. })));
}
