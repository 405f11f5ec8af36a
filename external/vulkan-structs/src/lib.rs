//! Vulkan structures described through `lattice_core` layouts, rather than as
//! `#[repr(C)]` Rust types.

use std::ffi::c_void;

use lattice_core::{NativeStruct, Result, ScratchAllocator, native_struct};

pub type DeviceSize = u64;

pub const TRUE: u32 = 1;
pub const FALSE: u32 = 0;

/// Values of the `sType` member identifying each extensible structure.
#[repr(i32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StructureType {
    PhysicalDeviceFeatures2 = 1000059000,
    PhysicalDevice16BitStorageFeatures = 1000083000,
    PhysicalDeviceTimelineSemaphoreFeatures = 1000207000,
    PhysicalDeviceVulkanMemoryModelFeatures = 1000211000,
    PhysicalDeviceSeparateDepthStencilLayoutsFeatures = 1000241000,
}

impl StructureType {
    pub fn from_raw(value: i32) -> Option<StructureType> {
        Some(match value {
            1000059000 => StructureType::PhysicalDeviceFeatures2,
            1000083000 => StructureType::PhysicalDevice16BitStorageFeatures,
            1000207000 => StructureType::PhysicalDeviceTimelineSemaphoreFeatures,
            1000211000 => StructureType::PhysicalDeviceVulkanMemoryModelFeatures,
            1000241000 => StructureType::PhysicalDeviceSeparateDepthStencilLayoutsFeatures,
            _ => return None,
        })
    }

    #[inline(always)]
    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

native_struct! {
    #[doc = "Mirrors `VkExtent3D`."]
    pub struct Extent3d {
        width / set_width: u32,
        height / set_height: u32,
        depth / set_depth: u32,
    }
}

native_struct! {
    #[doc = "Mirrors `VkMemoryRequirements`."]
    pub struct MemoryRequirements {
        size / set_size: DeviceSize,
        alignment / set_alignment: DeviceSize,
        memory_type_bits / set_memory_type_bits: u32,
    }
}

native_struct! {
    /// Whether the implementation can do depth and stencil image barriers
    /// separately.
    pub struct PhysicalDeviceSeparateDepthStencilLayoutsFeatures {
        s_type / set_s_type: i32,
        p_next / set_p_next: *mut c_void,
        separate_depth_stencil_layouts / set_separate_depth_stencil_layouts: bool,
    }
}

native_struct! {
    pub struct PhysicalDevice16BitStorageFeatures {
        s_type / set_s_type: i32,
        p_next / set_p_next: *mut c_void,
        storage_buffer_16bit_access / set_storage_buffer_16bit_access: bool,
        uniform_and_storage_buffer_16bit_access / set_uniform_and_storage_buffer_16bit_access: bool,
        storage_push_constant16 / set_storage_push_constant16: bool,
        storage_input_output16 / set_storage_input_output16: bool,
    }
}

native_struct! {
    pub struct PhysicalDeviceTimelineSemaphoreFeatures {
        s_type / set_s_type: i32,
        p_next / set_p_next: *mut c_void,
        timeline_semaphore / set_timeline_semaphore: bool,
    }
}

native_struct! {
    pub struct PhysicalDeviceVulkanMemoryModelFeatures {
        s_type / set_s_type: i32,
        p_next / set_p_next: *mut c_void,
        vulkan_memory_model / set_vulkan_memory_model: bool,
        vulkan_memory_model_device_scope / set_vulkan_memory_model_device_scope: bool,
        vulkan_memory_model_availability_visibility_chains
            / set_vulkan_memory_model_availability_visibility_chains: bool,
    }
}

/// Extensible structures that start with `sType` and `pNext`.
pub trait Extensible<'a>: NativeStruct<'a> {
    const STRUCTURE_TYPE: StructureType;

    /// Allocates a zeroed structure from `alloc` with `sType` filled in.
    fn new_in<A: ScratchAllocator + ?Sized>(alloc: &'a A) -> Result<Self> {
        let value = Self::calloc_in(alloc)?;
        value.handle().set(0, Self::STRUCTURE_TYPE.as_raw());
        Ok(value)
    }

    fn structure_type(&self) -> Option<StructureType> {
        StructureType::from_raw(self.handle().get::<i32>(0))
    }

    /// Links `next` into the `pNext` chain directly after this structure.
    fn push_next<N: Extensible<'a>>(&self, next: &N) -> &Self {
        let offset = Self::layout().offset_of(1);
        let old = self.handle().get::<*mut c_void>(offset);
        next.handle().set(N::layout().offset_of(1), old);
        self.handle().set(offset, next.address() as *mut c_void);
        self
    }
}

macro_rules! impl_extensible {
    ($($name:ident => $structure_type:ident),* $(,)?) => {
        $(
            impl<'a> Extensible<'a> for $name<'a> {
                const STRUCTURE_TYPE: StructureType = StructureType::$structure_type;
            }
        )*
    };
}

impl_extensible! {
    PhysicalDeviceSeparateDepthStencilLayoutsFeatures => PhysicalDeviceSeparateDepthStencilLayoutsFeatures,
    PhysicalDevice16BitStorageFeatures => PhysicalDevice16BitStorageFeatures,
    PhysicalDeviceTimelineSemaphoreFeatures => PhysicalDeviceTimelineSemaphoreFeatures,
    PhysicalDeviceVulkanMemoryModelFeatures => PhysicalDeviceVulkanMemoryModelFeatures,
}
