use anyhow::{Context, Result};
use log::info;
use std::path::Path;

/// The OpenXR handles every per-frame call needs. Field order is drop order: the session goes
/// before the instance.
pub struct XrPrelude {
    pub session: xr::Session<xr::Vulkan>,
    pub instance: xr::Instance,
    pub system: xr::SystemId,
}

/// Load the OpenXR loader from `OPENXR_LOADER` if set, or the default location otherwise.
pub fn load_openxr() -> Result<xr::Entry> {
    match std::env::var_os("OPENXR_LOADER") {
        Some(path) => {
            info!("Loading OpenXR from {:?}", path);
            xr::Entry::load_from(Path::new(&path))
                .with_context(|| format!("Failed to load OpenXR loader at {:?}", path))
        }
        None => xr::Entry::load().context("Failed to load the OpenXR loader"),
    }
}

/// Whether an OpenXR runtime with Vulkan support and a head-mounted display is present.
/// A missing loader, runtime, or headset is `Ok(false)`.
pub fn probe_support() -> Result<bool> {
    let entry = match load_openxr() {
        Ok(entry) => entry,
        Err(e) => {
            info!("{:#}", e);
            return Ok(false);
        }
    };

    let extensions = match entry.enumerate_extensions() {
        Ok(extensions) => extensions,
        Err(e) => {
            info!("No OpenXR runtime: {}", e);
            return Ok(false);
        }
    };
    if !extensions.khr_vulkan_enable2 {
        info!("OpenXR runtime lacks KHR_vulkan_enable2");
        return Ok(false);
    }

    let mut enabled_extensions = xr::ExtensionSet::default();
    enabled_extensions.khr_vulkan_enable2 = true;
    let instance = entry.create_instance(
        &xr::ApplicationInfo {
            application_name: "probe",
            application_version: 0,
            engine_name: crate::ENGINE_NAME,
            engine_version: 0,
        },
        &enabled_extensions,
        &[],
    )?;

    match instance.system(xr::FormFactor::HEAD_MOUNTED_DISPLAY) {
        Ok(_) => Ok(true),
        Err(xr::sys::Result::ERROR_FORM_FACTOR_UNAVAILABLE) => {
            info!("No head-mounted display is connected");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
