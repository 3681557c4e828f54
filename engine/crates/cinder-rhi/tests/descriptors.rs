mod common;

use cinder_rhi::device::ViewDesc;
use cinder_rhi::resources::buffer::BufferDesc;
use cinder_rhi::resources::descriptor_table::{DescriptorResources, DescriptorTableDesc, MipSelection};
use cinder_rhi::resources::format::{DescriptorType, PipelineType, TextureFilter, WrapMode};
use cinder_rhi::resources::root_signature::RootSignatureDesc;
use cinder_rhi::resources::sampler::SamplerDesc;
use cinder_rhi::resources::states::ResourceStates;
use cinder_rhi::resources::texture::TextureDesc;
use cinder_rhi::{PoolHandle, RhiError};
use common::{new_rhi, small_config};

fn material_layout() -> RootSignatureDesc {
    RootSignatureDesc::new("material", PipelineType::Graphics)
        .add_range(DescriptorType::Buffer, 0, 1)
        .add_range(DescriptorType::Texture, 0, 4)
        .with_samplers(1)
}

#[test]
fn fresh_table_only_holds_null_views() {
    let mut rhi = new_rhi(small_config());
    let rs = rhi.create_root_signature(&material_layout()).unwrap();
    let table = rhi.create_descriptor_table(&DescriptorTableDesc::new("material", rs)).unwrap();

    let native = rhi.descriptor_table(table).unwrap().native();
    let device = rhi.device();
    assert_eq!(device.table_slot(native, DescriptorType::Buffer, 0), Some(ViewDesc::Null(DescriptorType::Buffer)));
    for index in 0..4 {
        assert_eq!(
            device.table_slot(native, DescriptorType::Texture, index),
            Some(ViewDesc::Null(DescriptorType::Texture))
        );
    }
    assert_eq!(device.table_slot(native, DescriptorType::Sampler, 0), Some(ViewDesc::Null(DescriptorType::Sampler)));
    assert_eq!(device.table_slot(native, DescriptorType::Texture, 4), None);
    assert_eq!(rhi.descriptor_table(table).unwrap().bound_slot_count(), 0);
    rhi.shutdown().unwrap();
}

#[test]
fn destroying_a_resource_resets_its_slots() {
    let mut rhi = new_rhi(small_config());
    let rs = rhi.create_root_signature(&material_layout()).unwrap();
    let table = rhi.create_descriptor_table(&DescriptorTableDesc::new("material", rs)).unwrap();
    let albedo = rhi.create_texture(&TextureDesc::new("albedo", 16, 16, 1)).unwrap();
    let params = rhi
        .create_buffer(&BufferDesc::new("params", 256, ResourceStates::CONSTANT_BUFFER))
        .unwrap();
    let sampler = rhi
        .create_sampler(&SamplerDesc::new("linear", WrapMode::Repeat, TextureFilter::Linear))
        .unwrap();

    rhi.update_descriptor_table(table, 1, DescriptorResources::Textures(&[albedo])).unwrap();
    rhi.update_descriptor_table(table, 0, DescriptorResources::Buffers(&[params])).unwrap();
    rhi.update_descriptor_table(table, 0, DescriptorResources::Samplers(&[sampler])).unwrap();

    let native = rhi.descriptor_table(table).unwrap().native();
    let albedo_native = rhi.texture(albedo).unwrap().native();
    assert!(matches!(
        rhi.device().table_slot(native, DescriptorType::Texture, 1),
        Some(ViewDesc::Texture { texture, mip: None, .. }) if texture == albedo_native
    ));
    assert_eq!(
        rhi.descriptor_table(table).unwrap().binding(DescriptorType::Texture, 1),
        Some(albedo.raw())
    );
    assert_eq!(rhi.descriptor_table(table).unwrap().bound_slot_count(), 3);

    rhi.destroy_texture(albedo).unwrap();
    assert_eq!(
        rhi.device().table_slot(native, DescriptorType::Texture, 1),
        Some(ViewDesc::Null(DescriptorType::Texture))
    );
    assert_eq!(rhi.descriptor_table(table).unwrap().binding(DescriptorType::Texture, 1), None);
    assert_eq!(rhi.descriptor_table(table).unwrap().bound_slot_count(), 2);
    assert!(matches!(
        rhi.device().table_slot(native, DescriptorType::Buffer, 0),
        Some(ViewDesc::Buffer { byte_count: 256, .. })
    ));
    rhi.shutdown().unwrap();
}

#[test]
fn updates_outside_the_layout_leave_the_table_untouched() {
    let mut rhi = new_rhi(small_config());
    let rs = rhi.create_root_signature(&material_layout()).unwrap();
    let table = rhi.create_descriptor_table(&DescriptorTableDesc::new("material", rs)).unwrap();
    let a = rhi.create_texture(&TextureDesc::new("a", 4, 4, 1)).unwrap();
    let b = rhi.create_texture(&TextureDesc::new("b", 4, 4, 1)).unwrap();

    assert!(matches!(
        rhi.update_descriptor_table(table, 3, DescriptorResources::Textures(&[a, b])),
        Err(RhiError::InvalidArgument(_))
    ));
    assert!(matches!(
        rhi.update_descriptor_table(table, 0, DescriptorResources::Textures(&[])),
        Err(RhiError::InvalidArgument(_))
    ));
    // buffer 没有 SRV
    let params = rhi
        .create_buffer(&BufferDesc::new("params", 64, ResourceStates::CONSTANT_BUFFER))
        .unwrap();
    assert!(matches!(
        rhi.update_descriptor_table(table, 0, DescriptorResources::RwBuffers(&[params])),
        Err(RhiError::InvalidArgument(_))
    ));

    assert_eq!(rhi.descriptor_table(table).unwrap().bound_slot_count(), 0);
    assert_eq!(rhi.device().stats().invalid_descriptor_writes, 0);
    rhi.shutdown().unwrap();
}

#[test]
fn mip_chain_binds_one_uav_per_slot() {
    let mut rhi = new_rhi(small_config());
    let rs = rhi
        .create_root_signature(
            &RootSignatureDesc::new("downsample", PipelineType::Compute).add_range(DescriptorType::RwTexture, 0, 4),
        )
        .unwrap();
    let table = rhi.create_descriptor_table(&DescriptorTableDesc::new("downsample", rs)).unwrap();
    let pyramid = rhi
        .create_texture(
            &TextureDesc::new("pyramid", 16, 16, 4)
                .with_initial_state(ResourceStates::UNORDERED_ACCESS)
                .allow(ResourceStates::COMPUTE_SHADER_ACCESS),
        )
        .unwrap();
    let other = rhi
        .create_texture(&TextureDesc::new("other", 16, 16, 1).allow(ResourceStates::UNORDERED_ACCESS))
        .unwrap();
    assert_eq!(rhi.texture(pyramid).unwrap().uav_mips().len(), 4);

    assert!(matches!(
        rhi.update_descriptor_table(
            table,
            0,
            DescriptorResources::RwTextures {
                textures: &[pyramid, other],
                mip: MipSelection::Chain
            }
        ),
        Err(RhiError::InvalidArgument(_))
    ));
    rhi.update_descriptor_table(
        table,
        0,
        DescriptorResources::RwTextures {
            textures: &[pyramid],
            mip: MipSelection::Chain,
        },
    )
    .unwrap();

    let native = rhi.descriptor_table(table).unwrap().native();
    for mip in 0..4 {
        assert!(matches!(
            rhi.device().table_slot(native, DescriptorType::RwTexture, mip),
            Some(ViewDesc::Texture { mip: Some(m), ty: DescriptorType::RwTexture, .. }) if m == mip
        ));
    }

    rhi.update_descriptor_table(
        table,
        3,
        DescriptorResources::RwTextures {
            textures: &[other],
            mip: MipSelection::Slice(0),
        },
    )
    .unwrap();
    assert_eq!(
        rhi.descriptor_table(table).unwrap().binding(DescriptorType::RwTexture, 3),
        Some(other.raw())
    );
    rhi.shutdown().unwrap();
}

#[test]
fn tables_are_bound_with_their_own_root_signature() {
    let mut rhi = new_rhi(small_config());
    let material = rhi.create_root_signature(&material_layout()).unwrap();
    let other = rhi
        .create_root_signature(&RootSignatureDesc::new("other", PipelineType::Graphics).add_range(DescriptorType::Texture, 0, 1))
        .unwrap();
    let table = rhi.create_descriptor_table(&DescriptorTableDesc::new("material", material)).unwrap();

    rhi.begin_frame().unwrap();
    rhi.cmd_bind_root_signature(material).unwrap();
    rhi.cmd_bind_descriptor_table(material, table).unwrap();
    assert!(matches!(
        rhi.cmd_bind_descriptor_table(other, table),
        Err(RhiError::InvalidArgument(_))
    ));
    rhi.end_frame().unwrap();

    assert!(matches!(rhi.destroy_root_signature(material), Err(RhiError::InvalidOperation(_))));
    rhi.destroy_descriptor_table(table).unwrap();
    rhi.destroy_root_signature(material).unwrap();
    rhi.shutdown().unwrap();
}

#[test]
fn descriptor_heap_exhaustion_rolls_back_views() {
    let mut rhi = new_rhi(cinder_rhi::RhiConfig {
        shader_resource_descriptors: 3,
        ..small_config()
    });
    // 两个 back buffer 各占一个 SRV
    let (used_before, _) = rhi
        .descriptor_heaps()
        .usage(cinder_rhi::descriptor::DescriptorHeapKind::ShaderResource);
    assert_eq!(used_before, 2);

    let result = rhi.create_texture(
        &TextureDesc::new("wide", 16, 16, 2).allow(ResourceStates::UNORDERED_ACCESS),
    );
    assert!(matches!(result, Err(RhiError::DescriptorsExhausted { .. })));
    let (used_after, _) = rhi
        .descriptor_heaps()
        .usage(cinder_rhi::descriptor::DescriptorHeapKind::ShaderResource);
    assert_eq!(used_after, used_before);
    assert_eq!(rhi.textures().count_used(), 2);
    rhi.shutdown().unwrap();
}
