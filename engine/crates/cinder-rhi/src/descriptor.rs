//! 描述符 slot 的分配
//!
//! 每种 heap 是一个固定大小的数组，用 free list 管理空闲 slot。slot 没有 generation：
//! 外部永远不直接持有描述符下标，而是通过拥有它的资源句柄间接访问。

use std::fmt;

use crate::device::{NativeTable, NativeView, RhiDevice, ViewDesc};
use crate::error::{RhiError, RhiResult};
use crate::resources::format::DescriptorType;
use crate::resources::root_signature::RootSignatureDesc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorHeapKind {
    /// CBV/SRV/UAV
    ShaderResource,
    Sampler,
    RenderTarget,
    DepthStencil,
}

impl DescriptorHeapKind {
    pub const ALL: [DescriptorHeapKind; 4] = [
        DescriptorHeapKind::ShaderResource,
        DescriptorHeapKind::Sampler,
        DescriptorHeapKind::RenderTarget,
        DescriptorHeapKind::DepthStencil,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            DescriptorHeapKind::ShaderResource => 0,
            DescriptorHeapKind::Sampler => 1,
            DescriptorHeapKind::RenderTarget => 2,
            DescriptorHeapKind::DepthStencil => 3,
        }
    }

    /// 描述符表中某类 slot 的源 heap
    #[inline]
    pub const fn for_descriptor_type(ty: DescriptorType) -> Self {
        match ty {
            DescriptorType::Sampler => DescriptorHeapKind::Sampler,
            DescriptorType::Buffer | DescriptorType::RwBuffer | DescriptorType::Texture | DescriptorType::RwTexture => {
                DescriptorHeapKind::ShaderResource
            }
        }
    }
}

impl fmt::Display for DescriptorHeapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DescriptorHeapKind::ShaderResource => "shader resource",
            DescriptorHeapKind::Sampler => "sampler",
            DescriptorHeapKind::RenderTarget => "render target",
            DescriptorHeapKind::DepthStencil => "depth stencil",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorIndex(pub u32);

impl fmt::Display for DescriptorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 固定容量的下标分配器
#[derive(Debug)]
pub struct DescriptorAllocator {
    kind: DescriptorHeapKind,
    /// 空闲 slot 存放下一个空闲下标；已分配的 slot 存放 `ALLOCATED`
    links: Vec<u32>,
    free_head: u32,
    allocated_count: u32,
}

impl DescriptorAllocator {
    const END: u32 = u32::MAX;
    const ALLOCATED: u32 = u32::MAX - 1;

    pub fn new(kind: DescriptorHeapKind, capacity: u32) -> RhiResult<Self> {
        if capacity == 0 || capacity >= Self::ALLOCATED {
            return Err(RhiError::InvalidConfig(format!(
                "the {kind} heap needs between 1 and {} descriptors, got {capacity}",
                Self::ALLOCATED - 1
            )));
        }

        let links = (0..capacity).map(|i| if i + 1 < capacity { i + 1 } else { Self::END }).collect();
        Ok(Self {
            kind,
            links,
            free_head: 0,
            allocated_count: 0,
        })
    }

    pub fn allocate(&mut self) -> RhiResult<DescriptorIndex> {
        if self.free_head == Self::END {
            return Err(RhiError::DescriptorsExhausted {
                heap: self.kind,
                capacity: self.capacity(),
            });
        }

        let index = self.free_head;
        self.free_head = self.links[index as usize];
        self.links[index as usize] = Self::ALLOCATED;
        self.allocated_count += 1;
        Ok(DescriptorIndex(index))
    }

    pub fn free(&mut self, index: DescriptorIndex) -> RhiResult<()> {
        if !self.is_allocated(index) {
            return Err(RhiError::DescriptorDoubleFree {
                heap: self.kind,
                index: index.0,
            });
        }

        self.links[index.0 as usize] = self.free_head;
        self.free_head = index.0;
        self.allocated_count -= 1;
        Ok(())
    }

    #[inline]
    pub fn is_allocated(&self, index: DescriptorIndex) -> bool {
        self.links.get(index.0 as usize) == Some(&Self::ALLOCATED)
    }

    #[inline]
    pub fn allocated_count(&self) -> u32 {
        self.allocated_count
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.links.len() as u32
    }

    #[inline]
    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }
}

/// 所有 heap 的分配器，以及每个 slot 中保存的 native view
pub struct DescriptorHeaps {
    allocators: [DescriptorAllocator; 4],
    views: [Vec<Option<NativeView>>; 4],
    /// 每种描述符类型一个 null view
    null_views: [NativeView; 5],
}

// new & init
impl DescriptorHeaps {
    /// `capacities` 按 [`DescriptorHeapKind::index`] 排列
    pub fn new(device: &mut dyn RhiDevice, capacities: [u32; 4]) -> RhiResult<Self> {
        let allocators = [
            DescriptorAllocator::new(DescriptorHeapKind::ShaderResource, capacities[0])?,
            DescriptorAllocator::new(DescriptorHeapKind::Sampler, capacities[1])?,
            DescriptorAllocator::new(DescriptorHeapKind::RenderTarget, capacities[2])?,
            DescriptorAllocator::new(DescriptorHeapKind::DepthStencil, capacities[3])?,
        ];
        let views = capacities.map(|capacity| vec![None; capacity as usize]);

        let mut null_views = [NativeView(0); 5];
        for (i, ty) in DescriptorType::ALL.into_iter().enumerate() {
            match device.create_view(&ViewDesc::Null(ty)) {
                Ok(view) => null_views[i] = view,
                Err(err) => {
                    null_views[..i].iter().for_each(|view| device.destroy_view(*view));
                    return Err(err);
                }
            }
        }

        log::info!("descriptor heaps created: {capacities:?}");
        Ok(Self {
            allocators,
            views,
            null_views,
        })
    }
}

// destroy
impl DescriptorHeaps {
    pub fn destroy(self, device: &mut dyn RhiDevice) {
        let mut leaked = 0;
        for views in &self.views {
            for view in views.iter().flatten() {
                device.destroy_view(*view);
                leaked += 1;
            }
        }
        if leaked > 0 {
            log::warn!("{leaked} descriptors were still allocated when the heaps were destroyed");
        }
        self.null_views.iter().for_each(|view| device.destroy_view(*view));
    }
}

// tools
impl DescriptorHeaps {
    /// 分配一个 slot 并在其中创建 view
    pub fn allocate_view(
        &mut self,
        device: &mut dyn RhiDevice,
        kind: DescriptorHeapKind,
        desc: &ViewDesc,
    ) -> RhiResult<DescriptorIndex> {
        let index = self.allocators[kind.index()].allocate()?;
        match device.create_view(desc) {
            Ok(view) => {
                self.views[kind.index()][index.0 as usize] = Some(view);
                Ok(index)
            }
            Err(err) => {
                self.allocators[kind.index()].free(index)?;
                Err(err)
            }
        }
    }

    pub fn free_view(&mut self, device: &mut dyn RhiDevice, kind: DescriptorHeapKind, index: DescriptorIndex) -> RhiResult<()> {
        self.allocators[kind.index()].free(index)?;
        if let Some(view) = self.views[kind.index()][index.0 as usize].take() {
            device.destroy_view(view);
        }
        Ok(())
    }

    #[inline]
    pub fn view(&self, kind: DescriptorHeapKind, index: DescriptorIndex) -> Option<NativeView> {
        self.views[kind.index()].get(index.0 as usize).copied().flatten()
    }

    #[inline]
    pub fn null_view(&self, ty: DescriptorType) -> NativeView {
        self.null_views[ty.index()]
    }

    /// 把源 heap 中的 view 拷贝到描述符表；表中得到的是独立的副本
    pub fn copy_descriptor(
        &self,
        device: &mut dyn RhiDevice,
        table: NativeTable,
        ty: DescriptorType,
        dst_index: u32,
        src_kind: DescriptorHeapKind,
        src_index: DescriptorIndex,
    ) -> RhiResult<()> {
        let view = self.view(src_kind, src_index).ok_or(RhiError::DescriptorDoubleFree {
            heap: src_kind,
            index: src_index.0,
        })?;
        device.write_descriptor(table, ty, dst_index, view);
        Ok(())
    }

    #[inline]
    pub fn write_null(&self, device: &mut dyn RhiDevice, table: NativeTable, ty: DescriptorType, index: u32) {
        device.write_descriptor(table, ty, index, self.null_view(ty));
    }

    /// 用 null view 填满 layout 声明的每个 slot
    pub fn fill_with_null(&self, device: &mut dyn RhiDevice, table: NativeTable, layout: &RootSignatureDesc) {
        for range in layout.ranges() {
            for index in range.first_index..range.end() {
                self.write_null(device, table, range.ty, index);
            }
        }
    }
}

// getters
impl DescriptorHeaps {
    #[inline]
    pub fn allocator(&self, kind: DescriptorHeapKind) -> &DescriptorAllocator {
        &self.allocators[kind.index()]
    }

    /// (已分配, 容量)
    #[inline]
    pub fn usage(&self, kind: DescriptorHeapKind) -> (u32, u32) {
        let allocator = self.allocator(kind);
        (allocator.allocated_count(), allocator.capacity())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn allocate_never_hands_out_a_live_index() {
        let mut allocator = DescriptorAllocator::new(DescriptorHeapKind::ShaderResource, 32).unwrap();
        let mut live = HashSet::new();

        // 简单的 LCG，交替分配与释放
        let mut seed = 0x2545_f491_u32;
        for _ in 0..2000 {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let release = seed & 0x100 != 0 && !live.is_empty();
            if release {
                let victim = *live.iter().nth((seed as usize >> 12) % live.len()).unwrap();
                live.remove(&victim);
                allocator.free(victim).unwrap();
            } else if let Ok(index) = allocator.allocate() {
                assert!(live.insert(index), "{index} handed out twice");
            } else {
                assert_eq!(live.len(), 32);
            }
            assert_eq!(allocator.allocated_count() as usize, live.len());
        }
    }

    #[test]
    fn double_free_is_reported_and_list_stays_intact() {
        let mut allocator = DescriptorAllocator::new(DescriptorHeapKind::Sampler, 2).unwrap();
        let a = allocator.allocate().unwrap();
        allocator.free(a).unwrap();
        assert!(matches!(
            allocator.free(a),
            Err(RhiError::DescriptorDoubleFree { heap: DescriptorHeapKind::Sampler, index }) if index == a.0
        ));

        let first = allocator.allocate().unwrap();
        let second = allocator.allocate().unwrap();
        assert_ne!(first, second);
        assert!(matches!(allocator.allocate(), Err(RhiError::DescriptorsExhausted { capacity: 2, .. })));
    }

    #[test]
    fn out_of_range_index_is_not_allocated() {
        let mut allocator = DescriptorAllocator::new(DescriptorHeapKind::RenderTarget, 4).unwrap();
        assert!(!allocator.is_allocated(DescriptorIndex(9)));
        assert!(allocator.free(DescriptorIndex(9)).is_err());
    }

    #[test]
    fn heap_kind_for_descriptor_type() {
        assert_eq!(DescriptorHeapKind::for_descriptor_type(DescriptorType::Sampler), DescriptorHeapKind::Sampler);
        assert_eq!(
            DescriptorHeapKind::for_descriptor_type(DescriptorType::RwTexture),
            DescriptorHeapKind::ShaderResource
        );
    }
}
