//! HTTP client for the Niimbot cloud API.

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};

use crate::models::{CloudResponse, OneCodeRequest, TemplateData};
use crate::{CloudError, CloudLabelInfo};

pub const DEFAULT_BASE_URL: &str = "https://print.niimbot.com/api";

/// The API rejects requests without an app user agent.
const USER_AGENT_HEADER: &str = "niimbot-user-agent";
const USER_AGENT_VALUE: &str = "AppVersionName/999.0.0";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct CloudClient {
    http: reqwest::Client,
    base_url: String,
}

impl CloudClient {
    pub fn new() -> Result<Self, CloudError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, CloudError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT_HEADER, HeaderValue::from_static(USER_AGENT_VALUE));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Look up a label roll by the barcode stored on its RFID tag.
    ///
    /// Returns `Ok(None)` when the catalogue does not know the barcode.
    pub async fn get_label_by_barcode(
        &self,
        barcode: &str,
    ) -> Result<Option<CloudLabelInfo>, CloudError> {
        let url = format!("{}/template/getCloudTemplateByOneCode", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&OneCodeRequest { one_code: barcode })
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Cloud API HTTP error");
            return Err(CloudError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        let label = parse_label_response(&body)?;
        match &label {
            Some(info) => tracing::info!(barcode, name = %info.name, "Cloud label info"),
            None => tracing::warn!(barcode, "Cloud catalogue has no label for barcode"),
        }
        Ok(label)
    }
}

pub(crate) fn parse_label_response(body: &str) -> Result<Option<CloudLabelInfo>, CloudError> {
    let resp: CloudResponse<TemplateData> = serde_json::from_str(body)?;
    if resp.code != 1 {
        tracing::debug!(
            code = resp.code,
            message = resp.message.as_deref().unwrap_or("unknown error"),
            "Cloud API declined lookup"
        );
        return Ok(None);
    }
    Ok(Some(resp.data.unwrap_or_default().into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_successful_lookup() {
        let body = r#"{
            "code": 1,
            "message": "success",
            "data": {
                "barcode": "6972842743589",
                "width": 50,
                "height": 14,
                "name": "标签纸",
                "names": [
                    {"languageCode": "zh-cn", "name": "标签纸"},
                    {"languageCode": "en", "name": "Label paper 50x14"}
                ]
            }
        }"#;

        let info = parse_label_response(body).unwrap().unwrap();
        assert_eq!(info.barcode, "6972842743589");
        assert_eq!(info.width_mm, 50.0);
        assert_eq!(info.height_mm, 14.0);
        assert_eq!(info.name_en, "Label paper 50x14");
        assert_eq!(info.display_name(), "Label paper 50x14");
    }

    #[test]
    fn missing_english_name_falls_back() {
        let body = r#"{"code": 1, "data": {"barcode": "1", "width": 30.5, "height": 15, "name": "Roll"}}"#;
        let info = parse_label_response(body).unwrap().unwrap();
        assert_eq!(info.name_en, "");
        assert_eq!(info.display_name(), "Roll");
        assert_eq!(info.width_mm, 30.5);
    }

    #[test]
    fn unknown_barcode_is_none() {
        let body = r#"{"code": -1, "message": "template not found", "data": null}"#;
        assert_eq!(parse_label_response(body).unwrap(), None);
    }

    #[test]
    fn garbage_is_json_error() {
        assert!(matches!(
            parse_label_response("<html>"),
            Err(CloudError::Json(_))
        ));
    }

    #[test]
    fn base_url_is_normalized() {
        let client = CloudClient::with_base_url("http://localhost:9/api/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:9/api");
    }

    #[tokio::test]
    async fn unreachable_host_is_http_error() {
        let client = CloudClient::with_base_url("http://127.0.0.1:9/api").unwrap();
        let err = client.get_label_by_barcode("123").await.unwrap_err();
        assert!(matches!(err, CloudError::Http(_)));
    }
}
