//! Per-model device data: GATT endpoints, copy strategy and label sizes.

use uuid::Uuid;

use crate::transport::GattProfile;

/// Print resolution shared by the supported models.
pub const PRINT_DPI: f32 = 203.0;

/// Service advertised by Niimbot printers.
pub const NIIMBOT_SERVICE: Uuid = Uuid::from_u128(0xe781_0a71_73ae_499d_8c15_faa9_aef0_c3f2);

/// Characteristic used for both commands and notifications.
pub const NIIMBOT_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0xbef8_d6c9_9c21_4c9e_b632_bd58_c100_9f9f);

const NIIMBOT_GATT: GattProfile = GattProfile {
    service: NIIMBOT_SERVICE,
    write: NIIMBOT_CHARACTERISTIC,
    notify: NIIMBOT_CHARACTERISTIC,
};

/// A named label size in millimetres (width, height).
pub type LabelSize = (&'static str, f32, f32);

const NARROW_ROLLS: &[LabelSize] = &[
    ("30mm x 14mm", 30.0, 14.0),
    ("40mm x 12mm", 40.0, 12.0),
    ("50mm x 14mm", 50.0, 14.0),
    ("75mm x 12mm", 75.0, 12.0),
    ("109mm x 12.5mm", 109.0, 12.5),
];

const D110_ROLLS: &[LabelSize] = &[
    ("30mm x 15mm", 30.0, 15.0),
    ("40mm x 12mm", 40.0, 12.0),
    ("50mm x 14mm", 50.0, 14.0),
    ("75mm x 12mm", 75.0, 12.0),
    ("109mm x 12.5mm", 109.0, 12.5),
];

const B18_ROLLS: &[LabelSize] = &[
    ("40mm x 14mm", 40.0, 14.0),
    ("50mm x 14mm", 50.0, 14.0),
    ("120mm x 14mm", 120.0, 14.0),
];

/// Static description of a printer model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelProfile {
    pub name: &'static str,
    /// Whether the firmware repeats a page given a quantity.
    pub streaming: bool,
    pub gatt: GattProfile,
    pub default_density: u8,
    pub label_sizes: &'static [LabelSize],
}

const GENERIC: ModelProfile = ModelProfile {
    name: "generic",
    streaming: false,
    gatt: NIIMBOT_GATT,
    default_density: 3,
    label_sizes: &[],
};

const MODELS: &[ModelProfile] = &[
    ModelProfile {
        name: "d11",
        label_sizes: NARROW_ROLLS,
        ..GENERIC
    },
    ModelProfile {
        name: "d110",
        label_sizes: D110_ROLLS,
        ..GENERIC
    },
    ModelProfile {
        name: "d101",
        label_sizes: NARROW_ROLLS,
        ..GENERIC
    },
    ModelProfile {
        name: "b18",
        label_sizes: B18_ROLLS,
        ..GENERIC
    },
    ModelProfile {
        name: "b1",
        streaming: true,
        ..GENERIC
    },
    ModelProfile {
        name: "b21",
        streaming: true,
        ..GENERIC
    },
];

impl ModelProfile {
    /// Look up a model by name (case-insensitive). Unknown models get the
    /// generic per-copy profile.
    pub fn lookup(model: &str) -> &'static ModelProfile {
        let model = model.trim();
        MODELS
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(model))
            .unwrap_or(&GENERIC)
    }

    pub fn is_known(model: &str) -> bool {
        let model = model.trim();
        MODELS.iter().any(|m| m.name.eq_ignore_ascii_case(model))
    }

    /// Names of all known models, upper-cased for display.
    pub fn known_models() -> Vec<String> {
        MODELS.iter().map(|m| m.name.to_ascii_uppercase()).collect()
    }

    /// Label size in dots for a named size of this model.
    pub fn label_size_px(&self, label: &str) -> Option<(u32, u32)> {
        self.label_sizes
            .iter()
            .find(|(name, _, _)| *name == label)
            .map(|&(_, w, h)| (mm_to_px(w), mm_to_px(h)))
    }
}

/// Convert millimetres to printer dots.
pub fn mm_to_px(mm: f32) -> u32 {
    (mm / 25.4 * PRINT_DPI) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(ModelProfile::lookup("D110").name, "d110");
        assert!(ModelProfile::lookup("b1").streaming);
        assert!(!ModelProfile::lookup("d11").streaming);
    }

    #[test]
    fn unknown_model_gets_generic_profile() {
        let p = ModelProfile::lookup("x9000");
        assert_eq!(p.name, "generic");
        assert!(!p.streaming);
        assert_eq!(p.gatt.write, NIIMBOT_CHARACTERISTIC);
        assert!(!ModelProfile::is_known("x9000"));
        assert!(ModelProfile::is_known(" D110 "));
        let known = ModelProfile::known_models();
        assert_eq!(known.len(), 6);
        assert!(known.contains(&"B21".to_string()));
    }

    #[test]
    fn label_sizes_in_dots() {
        let d110 = ModelProfile::lookup("d110");
        assert_eq!(d110.label_size_px("30mm x 15mm"), Some((239, 119)));
        assert_eq!(d110.label_size_px("nope"), None);
        assert_eq!(mm_to_px(25.4), 203);
    }
}
