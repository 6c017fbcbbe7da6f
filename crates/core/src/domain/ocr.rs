// OCR job payload and result

use serde::{Deserialize, Serialize};

/// OCR job payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrJobData {
    /// `file://...`, `s3://...` or a path relative to the storage root
    pub source_location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
}

impl OcrJobData {
    pub fn new(source_location: impl Into<String>) -> Self {
        Self {
            source_location: source_location.into(),
            filename: None,
            mimetype: None,
            user_email: None,
        }
    }
}

/// Extraction produced by the OCR engine
///
/// The engine answers with a placeholder (`__mock: true`) when it could
/// not recognize anything; the OCR job treats that as a failed attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    #[serde(rename = "__mock", default, skip_serializing_if = "std::ops::Not::not")]
    pub mock: bool,
    #[serde(
        rename = "errorMessage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_message: Option<String>,
    /// Extracted invoice fields, passed through untouched
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}
