use anyhow::{format_err, Result};
use erupt::{extensions::khr_surface, vk1_0 as vk, InstanceLoader};
use std::{ffi::CStr, os::raw::c_char};

/// Hardware selection for the windowed backend
#[derive(Debug)]
pub struct HardwareSelection {
    pub physical_device: vk::PhysicalDevice,
    pub physical_device_properties: vk::PhysicalDeviceProperties,
    pub queue_family: u32,
    pub format: khr_surface::SurfaceFormatKHR,
    pub present_mode: khr_surface::PresentModeKHR,
}

impl HardwareSelection {
    /// Query for hardware which can draw to `surface` and supports `device_extensions`,
    /// preferring discrete GPUs
    pub fn query(
        instance: &InstanceLoader,
        surface: khr_surface::SurfaceKHR,
        device_extensions: &[*const c_char],
    ) -> Result<Self> {
        let mut candidates = Vec::new();
        for physical_device in unsafe { instance.enumerate_physical_devices(None) }.result()? {
            if let Some(selection) =
                Self::inspect(instance, physical_device, surface, device_extensions)?
            {
                candidates.push(selection);
            }
        }

        candidates
            .into_iter()
            .max_by_key(|query| device_rank(query.physical_device_properties.device_type))
            .ok_or_else(|| format_err!("No suitable hardware found for this configuration"))
    }

    fn inspect(
        instance: &InstanceLoader,
        physical_device: vk::PhysicalDevice,
        surface: khr_surface::SurfaceKHR,
        device_extensions: &[*const c_char],
    ) -> Result<Option<Self>> {
        let families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device, None) };
        let mut queue_family = None;
        for (i, properties) in families.iter().enumerate() {
            if !properties.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                continue;
            }
            let presentable = unsafe {
                instance.get_physical_device_surface_support_khr(
                    physical_device,
                    i as u32,
                    surface,
                    None,
                )
            }
            .result()?;
            if presentable {
                queue_family = Some(i as u32);
                break;
            }
        }
        let queue_family = match queue_family {
            Some(q) => q,
            None => return Ok(None),
        };

        let formats = unsafe {
            instance.get_physical_device_surface_formats_khr(physical_device, surface, None)
        }
        .result()?;
        let format = match formats
            .iter()
            .find(|surface_format| {
                surface_format.format == vk::Format::B8G8R8A8_SRGB
                    && surface_format.color_space == khr_surface::ColorSpaceKHR::SRGB_NONLINEAR_KHR
            })
            .or_else(|| formats.get(0))
        {
            Some(surface_format) => *surface_format,
            None => return Ok(None),
        };

        let present_mode = unsafe {
            instance.get_physical_device_surface_present_modes_khr(physical_device, surface, None)
        }
        .result()?
        .into_iter()
        .find(|present_mode| present_mode == &khr_surface::PresentModeKHR::MAILBOX_KHR)
        .unwrap_or(khr_surface::PresentModeKHR::FIFO_KHR);

        let supported_extensions = unsafe {
            instance.enumerate_device_extension_properties(physical_device, None, None)
        }
        .result()?;
        let all_supported = device_extensions.iter().all(|device_extension| {
            let device_extension = unsafe { CStr::from_ptr(*device_extension) };
            supported_extensions.iter().any(|properties| unsafe {
                CStr::from_ptr(properties.extension_name.as_ptr()) == device_extension
            })
        });
        if !all_supported {
            return Ok(None);
        }

        let physical_device_properties =
            unsafe { instance.get_physical_device_properties(physical_device, None) };
        Ok(Some(Self {
            physical_device,
            queue_family,
            format,
            present_mode,
            physical_device_properties,
        }))
    }
}

fn device_rank(device_type: vk::PhysicalDeviceType) -> u8 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 2,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discrete_gpus_rank_first() {
        assert!(
            device_rank(vk::PhysicalDeviceType::DISCRETE_GPU)
                > device_rank(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(
            device_rank(vk::PhysicalDeviceType::INTEGRATED_GPU)
                > device_rank(vk::PhysicalDeviceType::CPU)
        );
    }
}
