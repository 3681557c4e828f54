//! Cinder RHI 的 Vulkan 后端
//!
//! [`VulkanDevice`] 基于 ash + vk-mem 实现 [`cinder_rhi::device::RhiDevice`]：
//! - Vulkan 1.3，synchronization2、timeline semaphore、dynamic rendering、host query reset
//! - 只使用一个 graphics queue family，Main 和 Copy 两种队列都提交到同一个 queue
//! - fence 对应 timeline semaphore，描述符表对应 descriptor pool + set

mod commands;
mod convert;
mod core;
mod debug;
mod device;
mod error;
mod objects;

pub use core::VulkanCreateInfo;
pub use device::VulkanDevice;
