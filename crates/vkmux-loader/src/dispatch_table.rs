//! Fixed-shape dispatch tables.
//!
//! Each table is a dense array of untyped function pointers indexed by a
//! per-function ordinal. Names are only consulted while a table is being
//! filled (or by the proc-address resolvers); the generated forwarding
//! stubs read a slot through a typed getter and call it.

use std::ffi::CStr;

use ash::vk;

macro_rules! dispatch_table {
    (
        $(#[$meta:meta])*
        pub struct $table:ident, enum $slot:ident {
            $( $variant:ident = $name:expr => $getter:ident: $pfn:ty, )*
        }
    ) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(usize)]
        pub enum $slot {
            $( $variant, )*
        }

        impl $slot {
            pub const ALL: &'static [$slot] = &[ $( $slot::$variant, )* ];
            pub const COUNT: usize = $slot::ALL.len();

            /// The API name of the function held in this slot.
            pub fn name(self) -> &'static CStr {
                match self {
                    $( $slot::$variant => $name, )*
                }
            }

            pub fn from_name(name: &CStr) -> Option<$slot> {
                $slot::ALL.iter().copied().find(|s| s.name() == name)
            }
        }

        $(#[$meta])*
        #[repr(C)]
        pub struct $table {
            slots: [vk::PFN_vkVoidFunction; $slot::COUNT],
        }

        impl $table {
            pub const fn empty() -> Self {
                Self { slots: [None; $slot::COUNT] }
            }

            #[inline(always)]
            pub fn slot(&self, slot: $slot) -> vk::PFN_vkVoidFunction {
                self.slots[slot as usize]
            }

            pub fn set(&mut self, slot: $slot, f: vk::PFN_vkVoidFunction) {
                self.slots[slot as usize] = f;
            }

            /// Resolve every slot by name.
            pub fn fill_with(&mut self, mut resolve: impl FnMut(&'static CStr) -> vk::PFN_vkVoidFunction) {
                for &slot in $slot::ALL {
                    self.slots[slot as usize] = resolve(slot.name());
                }
            }

            /// `None` when the table has no slot with that name, `Some(None)`
            /// when the slot exists but nothing down the chain provides it.
            pub fn lookup(&self, name: &CStr) -> Option<vk::PFN_vkVoidFunction> {
                $slot::from_name(name).map(|s| self.slot(s))
            }

            $(
                #[inline(always)]
                pub fn $getter(&self) -> Option<$pfn> {
                    match self.slots[$slot::$variant as usize] {
                        Some(f) => Some(unsafe { std::mem::transmute::<unsafe extern "system" fn(), $pfn>(f) }),
                        None => None,
                    }
                }
            )*
        }

        impl Default for $table {
            fn default() -> Self {
                Self::empty()
            }
        }
    };
}

dispatch_table! {
    /// Instance-level functions, shared by sessions and backend instances.
    pub struct InstanceDispatchTable, enum InstanceSlot {
        DestroyInstance = c"vkDestroyInstance" => destroy_instance: vk::PFN_vkDestroyInstance,
        EnumeratePhysicalDevices = c"vkEnumeratePhysicalDevices" => enumerate_physical_devices: vk::PFN_vkEnumeratePhysicalDevices,
        EnumeratePhysicalDeviceGroups = c"vkEnumeratePhysicalDeviceGroups" => enumerate_physical_device_groups: vk::PFN_vkEnumeratePhysicalDeviceGroups,
        EnumeratePhysicalDeviceGroupsKHR = c"vkEnumeratePhysicalDeviceGroupsKHR" => enumerate_physical_device_groups_khr: vk::PFN_vkEnumeratePhysicalDeviceGroups,
        GetPhysicalDeviceProperties = c"vkGetPhysicalDeviceProperties" => get_physical_device_properties: vk::PFN_vkGetPhysicalDeviceProperties,
        GetPhysicalDeviceProperties2 = c"vkGetPhysicalDeviceProperties2" => get_physical_device_properties2: vk::PFN_vkGetPhysicalDeviceProperties2,
        GetPhysicalDeviceProperties2KHR = c"vkGetPhysicalDeviceProperties2KHR" => get_physical_device_properties2_khr: vk::PFN_vkGetPhysicalDeviceProperties2,
        GetPhysicalDeviceFeatures = c"vkGetPhysicalDeviceFeatures" => get_physical_device_features: vk::PFN_vkGetPhysicalDeviceFeatures,
        GetPhysicalDeviceFeatures2 = c"vkGetPhysicalDeviceFeatures2" => get_physical_device_features2: vk::PFN_vkGetPhysicalDeviceFeatures2,
        GetPhysicalDeviceFeatures2KHR = c"vkGetPhysicalDeviceFeatures2KHR" => get_physical_device_features2_khr: vk::PFN_vkGetPhysicalDeviceFeatures2,
        GetPhysicalDeviceMemoryProperties = c"vkGetPhysicalDeviceMemoryProperties" => get_physical_device_memory_properties: vk::PFN_vkGetPhysicalDeviceMemoryProperties,
        GetPhysicalDeviceMemoryProperties2 = c"vkGetPhysicalDeviceMemoryProperties2" => get_physical_device_memory_properties2: vk::PFN_vkGetPhysicalDeviceMemoryProperties2,
        GetPhysicalDeviceMemoryProperties2KHR = c"vkGetPhysicalDeviceMemoryProperties2KHR" => get_physical_device_memory_properties2_khr: vk::PFN_vkGetPhysicalDeviceMemoryProperties2,
        GetPhysicalDeviceQueueFamilyProperties = c"vkGetPhysicalDeviceQueueFamilyProperties" => get_physical_device_queue_family_properties: vk::PFN_vkGetPhysicalDeviceQueueFamilyProperties,
        GetPhysicalDeviceFormatProperties = c"vkGetPhysicalDeviceFormatProperties" => get_physical_device_format_properties: vk::PFN_vkGetPhysicalDeviceFormatProperties,
        EnumerateDeviceExtensionProperties = c"vkEnumerateDeviceExtensionProperties" => enumerate_device_extension_properties: vk::PFN_vkEnumerateDeviceExtensionProperties,
        EnumerateDeviceLayerProperties = c"vkEnumerateDeviceLayerProperties" => enumerate_device_layer_properties: vk::PFN_vkEnumerateDeviceLayerProperties,
        CreateDevice = c"vkCreateDevice" => create_device: vk::PFN_vkCreateDevice,
        GetDeviceProcAddr = c"vkGetDeviceProcAddr" => get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr,
    }
}

dispatch_table! {
    /// Device-level functions. Queues and command buffers dispatch through
    /// the table of the device they came from.
    pub struct DeviceDispatchTable, enum DeviceSlot {
        GetDeviceProcAddr = c"vkGetDeviceProcAddr" => get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr,
        DestroyDevice = c"vkDestroyDevice" => destroy_device: vk::PFN_vkDestroyDevice,
        GetDeviceQueue = c"vkGetDeviceQueue" => get_device_queue: vk::PFN_vkGetDeviceQueue,
        DeviceWaitIdle = c"vkDeviceWaitIdle" => device_wait_idle: vk::PFN_vkDeviceWaitIdle,
        QueueSubmit = c"vkQueueSubmit" => queue_submit: vk::PFN_vkQueueSubmit,
        QueueWaitIdle = c"vkQueueWaitIdle" => queue_wait_idle: vk::PFN_vkQueueWaitIdle,
        AllocateMemory = c"vkAllocateMemory" => allocate_memory: vk::PFN_vkAllocateMemory,
        FreeMemory = c"vkFreeMemory" => free_memory: vk::PFN_vkFreeMemory,
        CreateBuffer = c"vkCreateBuffer" => create_buffer: vk::PFN_vkCreateBuffer,
        DestroyBuffer = c"vkDestroyBuffer" => destroy_buffer: vk::PFN_vkDestroyBuffer,
        GetBufferMemoryRequirements2 = c"vkGetBufferMemoryRequirements2" => get_buffer_memory_requirements2: vk::PFN_vkGetBufferMemoryRequirements2,
        GetBufferMemoryRequirements2KHR = c"vkGetBufferMemoryRequirements2KHR" => get_buffer_memory_requirements2_khr: vk::PFN_vkGetBufferMemoryRequirements2,
        CreateFence = c"vkCreateFence" => create_fence: vk::PFN_vkCreateFence,
        DestroyFence = c"vkDestroyFence" => destroy_fence: vk::PFN_vkDestroyFence,
        WaitForFences = c"vkWaitForFences" => wait_for_fences: vk::PFN_vkWaitForFences,
        ResetFences = c"vkResetFences" => reset_fences: vk::PFN_vkResetFences,
        CreateCommandPool = c"vkCreateCommandPool" => create_command_pool: vk::PFN_vkCreateCommandPool,
        DestroyCommandPool = c"vkDestroyCommandPool" => destroy_command_pool: vk::PFN_vkDestroyCommandPool,
        TrimCommandPool = c"vkTrimCommandPool" => trim_command_pool: vk::PFN_vkTrimCommandPool,
        TrimCommandPoolKHR = c"vkTrimCommandPoolKHR" => trim_command_pool_khr: vk::PFN_vkTrimCommandPool,
        AllocateCommandBuffers = c"vkAllocateCommandBuffers" => allocate_command_buffers: vk::PFN_vkAllocateCommandBuffers,
        FreeCommandBuffers = c"vkFreeCommandBuffers" => free_command_buffers: vk::PFN_vkFreeCommandBuffers,
        BeginCommandBuffer = c"vkBeginCommandBuffer" => begin_command_buffer: vk::PFN_vkBeginCommandBuffer,
        EndCommandBuffer = c"vkEndCommandBuffer" => end_command_buffer: vk::PFN_vkEndCommandBuffer,
        CmdDispatch = c"vkCmdDispatch" => cmd_dispatch: vk::PFN_vkCmdDispatch,
        CmdFillBuffer = c"vkCmdFillBuffer" => cmd_fill_buffer: vk::PFN_vkCmdFillBuffer,
    }
}
