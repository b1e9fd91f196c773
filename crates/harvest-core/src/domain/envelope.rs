//! CollectOutcome - collector の戻り値（成功エンベロープ）
//!
//! Collector は `{success, result, error}` の形で結果を返します。
//! コア側では `success=false` と `result=None` を同一視し、どちらもプレースホルダー扱いにします。

use serde::{Deserialize, Serialize};

/// Envelope returned by a collector for one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectOutcome {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CollectOutcome {
    pub fn success(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Unwrap the envelope into the inner payload.
    ///
    /// `Err` carries the reason the category yields no usable data; a
    /// successful envelope with no result (or a JSON `null`) counts as that too.
    pub fn into_payload(self) -> Result<serde_json::Value, String> {
        match (self.success, self.result) {
            (true, Some(value)) if !value.is_null() => Ok(value),
            (true, _) => Err("collector returned no result".to_string()),
            (false, _) => Err(self
                .error
                .unwrap_or_else(|| "collector reported failure".to_string())),
        }
    }
}
