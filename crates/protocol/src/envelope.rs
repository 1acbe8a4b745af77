use serde::{Deserialize, Serialize};

use crate::constants::{CODE_FAILURE, CODE_SUCCESS};

/// Envelope for every HTTP response: `{code, data, message}`.
///
/// `data` is always present on the wire; absent data is encoded as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub data: Option<T>,
    pub message: String,
}

impl<T> ApiResponse<T> {
    /// Creates a success envelope carrying `data`.
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            code: CODE_SUCCESS,
            data: Some(data),
            message: message.into(),
        }
    }

    /// Creates a success envelope with `data: null`.
    pub fn ok_empty(message: impl Into<String>) -> Self {
        Self {
            code: CODE_SUCCESS,
            data: None,
            message: message.into(),
        }
    }

    /// Creates a failure envelope (`code=500`, `data: null`).
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            code: CODE_FAILURE,
            data: None,
            message: message.into(),
        }
    }

    /// Returns `true` if the envelope reports success.
    pub fn is_success(&self) -> bool {
        self.code == CODE_SUCCESS
    }

    /// Converts the envelope into a `Result`, using the message as the error.
    pub fn into_result(self) -> Result<Option<T>, String> {
        if self.is_success() {
            Ok(self.data)
        } else {
            Err(self.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_serializes_all_fields() {
        let resp = ApiResponse::ok(true, "file exists");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"code": 200, "data": true, "message": "file exists"})
        );
    }

    #[test]
    fn empty_data_is_null_not_omitted() {
        let resp = ApiResponse::<()>::ok_empty("chunk uploaded");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"data\":null"));
    }

    #[test]
    fn failure_uses_code_500() {
        let resp = ApiResponse::<String>::failure("chunks missing");
        assert_eq!(resp.code, 500);
        assert!(!resp.is_success());
        assert_eq!(resp.into_result(), Err("chunks missing".to_string()));
    }

    #[test]
    fn parses_href_envelope() {
        let json = r#"{"code":200,"data":"/files/abc.bin","message":"chunks merged"}"#;
        let resp: ApiResponse<String> = serde_json::from_str(json).unwrap();
        assert_eq!(resp.into_result().unwrap().as_deref(), Some("/files/abc.bin"));
    }

    #[test]
    fn parses_null_href() {
        let json = r#"{"code":200,"data":null,"message":"file link not found"}"#;
        let resp: ApiResponse<String> = serde_json::from_str(json).unwrap();
        assert_eq!(resp.into_result().unwrap(), None);
    }
}
