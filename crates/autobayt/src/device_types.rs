//! Known Autobayt device types

/// A device type, keyed by the `model_name` the API reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceType {
    pub code: &'static str,
    pub name: &'static str,
    pub generation: &'static str,
    pub buttons: u8,
    pub docs_url: &'static str,
}

pub const DEVICE_TYPES: &[DeviceType] = &[
    DeviceType {
        code: "SW100HV1",
        name: "Smart Switch Single",
        generation: "V1",
        buttons: 1,
        docs_url: "https://github.com/RASBR/home-assistant-autobayt/wiki/sw100hv1",
    },
    DeviceType {
        code: "SW100PMV1",
        name: "Smart Switch Single PM",
        generation: "V1",
        buttons: 1,
        docs_url: "https://github.com/RASBR/home-assistant-autobayt/wiki/sw100pmv1",
    },
    DeviceType {
        code: "SW200LV1",
        name: "Smart Switch Double",
        generation: "V1",
        buttons: 2,
        docs_url: "https://github.com/RASBR/home-assistant-autobayt/wiki/sw200lv1",
    },
    DeviceType {
        code: "SW300LV1",
        name: "Smart Switch Triple",
        generation: "V1",
        buttons: 3,
        docs_url: "https://github.com/RASBR/home-assistant-autobayt/wiki/sw300lv1",
    },
];

pub fn device_type(model_name: &str) -> Option<&'static DeviceType> {
    DEVICE_TYPES.iter().find(|t| t.code == model_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let double = device_type("SW200LV1").unwrap();
        assert_eq!(double.name, "Smart Switch Double");
        assert_eq!(double.buttons, 2);
        assert!(double.docs_url.ends_with("/sw200lv1"));

        assert!(device_type("sw200lv1").is_none());
        assert!(device_type("SW999").is_none());
    }

    #[test]
    fn test_docs_urls_follow_code() {
        for t in DEVICE_TYPES {
            assert_eq!(
                t.docs_url,
                format!(
                    "https://github.com/RASBR/home-assistant-autobayt/wiki/{}",
                    t.code.to_lowercase()
                )
            );
        }
    }
}
