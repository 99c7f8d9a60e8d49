use erupt::cstr;
use std::os::raw::c_char;

const LAYER_KHRONOS_VALIDATION: *const c_char = cstr!("VK_LAYER_KHRONOS_validation");

/// Layers and extensions requested on top of what the backend itself needs
#[derive(Default)]
pub struct ExtensionsAndLayers {
    pub instance_layers: Vec<*const c_char>,
    pub instance_extensions: Vec<*const c_char>,
    pub device_layers: Vec<*const c_char>,
}

impl ExtensionsAndLayers {
    pub fn new(validation: bool) -> Self {
        let mut this = Self::default();
        if validation {
            this.instance_extensions
                .push(erupt::extensions::ext_debug_utils::EXT_DEBUG_UTILS_EXTENSION_NAME);
            this.instance_layers.push(LAYER_KHRONOS_VALIDATION);
            this.device_layers.push(LAYER_KHRONOS_VALIDATION);
        }
        this
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_is_opt_in() {
        let plain = ExtensionsAndLayers::new(false);
        assert!(plain.instance_layers.is_empty());
        assert!(plain.instance_extensions.is_empty());
        assert!(plain.device_layers.is_empty());

        let validated = ExtensionsAndLayers::new(true);
        assert_eq!(validated.instance_layers.len(), 1);
        assert_eq!(validated.instance_extensions.len(), 1);
        assert_eq!(validated.device_layers.len(), 1);
    }
}
