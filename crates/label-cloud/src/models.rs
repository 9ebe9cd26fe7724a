use serde::{Deserialize, Serialize};

/// Request body for `template/getCloudTemplateByOneCode`.
#[derive(Debug, Serialize)]
pub(crate) struct OneCodeRequest<'a> {
    #[serde(rename = "oneCode")]
    pub one_code: &'a str,
}

/// Envelope every cloud endpoint answers with. `code == 1` means success.
#[derive(Debug, Deserialize)]
pub(crate) struct CloudResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TemplateData {
    #[serde(default)]
    pub barcode: String,
    #[serde(default)]
    pub width: f32,
    #[serde(default)]
    pub height: f32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub names: Vec<LocalizedName>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LocalizedName {
    #[serde(rename = "languageCode", default)]
    pub language_code: String,
    #[serde(default)]
    pub name: String,
}

/// A label roll as described by the cloud catalogue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloudLabelInfo {
    pub barcode: String,
    pub width_mm: f32,
    pub height_mm: f32,
    pub name: String,
    /// English name, empty when the catalogue has none.
    pub name_en: String,
}

impl From<TemplateData> for CloudLabelInfo {
    fn from(data: TemplateData) -> Self {
        let name_en = data
            .names
            .into_iter()
            .find(|n| n.language_code == "en")
            .map(|n| n.name)
            .unwrap_or_default();
        Self {
            barcode: data.barcode,
            width_mm: data.width,
            height_mm: data.height,
            name: data.name,
            name_en,
        }
    }
}

impl CloudLabelInfo {
    /// English name if known, otherwise the catalogue name.
    pub fn display_name(&self) -> &str {
        if self.name_en.is_empty() {
            &self.name
        } else {
            &self.name_en
        }
    }
}
