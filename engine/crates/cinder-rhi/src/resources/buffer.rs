use crate::descriptor::DescriptorIndex;
use crate::device::NativeBuffer;
use crate::lifetime::{Lifetime, LifetimeTagged};
use crate::resources::states::{MemoryUsage, ResourceStates};

#[derive(Clone, Debug, PartialEq)]
pub struct BufferDesc {
    pub name: String,
    pub byte_count: u64,
    pub initial_state: ResourceStates,
    /// barrier 可以转换到的状态；初始状态总是被允许
    pub allowed_states: ResourceStates,
    pub memory_usage: MemoryUsage,
    pub lifetime: Lifetime,
}

impl BufferDesc {
    pub fn new(name: impl Into<String>, byte_count: u64, initial_state: ResourceStates) -> Self {
        Self {
            name: name.into(),
            byte_count,
            initial_state,
            allowed_states: initial_state,
            memory_usage: MemoryUsage::default(),
            lifetime: Lifetime::Persistent,
        }
    }

    #[inline]
    pub fn with_memory_usage(mut self, memory_usage: MemoryUsage) -> Self {
        self.memory_usage = memory_usage;
        self
    }

    #[inline]
    pub fn with_allowed_states(mut self, allowed_states: ResourceStates) -> Self {
        self.allowed_states = allowed_states;
        self
    }

    #[inline]
    pub fn short_lived(mut self) -> Self {
        self.lifetime = Lifetime::ShortLived;
        self
    }

    #[inline]
    pub fn all_allowed_states(&self) -> ResourceStates {
        self.allowed_states | self.initial_state
    }
}

/// Buffer 在池中的记录
#[derive(Debug)]
pub struct BufferRecord {
    pub(crate) desc: BufferDesc,
    pub(crate) native: NativeBuffer,
    pub(crate) current_state: ResourceStates,
    /// CBV，在 shader resource heap 中
    pub(crate) cbv: Option<DescriptorIndex>,
    /// UAV，在 shader resource heap 中
    pub(crate) uav: Option<DescriptorIndex>,
    pub(crate) mapped: bool,
}

// getters
impl BufferRecord {
    #[inline]
    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }
    #[inline]
    pub fn name(&self) -> &str {
        &self.desc.name
    }
    #[inline]
    pub fn byte_count(&self) -> u64 {
        self.desc.byte_count
    }
    #[inline]
    pub fn native(&self) -> NativeBuffer {
        self.native
    }
    #[inline]
    pub fn current_state(&self) -> ResourceStates {
        self.current_state
    }
    #[inline]
    pub fn cbv(&self) -> Option<DescriptorIndex> {
        self.cbv
    }
    #[inline]
    pub fn uav(&self) -> Option<DescriptorIndex> {
        self.uav
    }
    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }
}

impl LifetimeTagged for BufferRecord {
    fn lifetime(&self) -> Lifetime {
        self.desc.lifetime
    }
}
