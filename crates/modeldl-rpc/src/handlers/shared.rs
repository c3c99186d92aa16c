//! Shared handler utilities used across RPC domains.

use modeldl_core::DownloadError;
use serde_json::Value;

/// Extract an optional string parameter, supporting both snake_case and camelCase.
pub(crate) fn get_str_param<'a>(params: &'a Value, snake: &str, camel: &str) -> Option<&'a str> {
    params.get(snake).or_else(|| params.get(camel)).and_then(|v| v.as_str())
}

/// Extract a required string parameter or return an error.
pub(crate) fn require_str_param(params: &Value, snake: &str, camel: &str) -> modeldl_core::Result<String> {
    get_str_param(params, snake, camel)
        .map(String::from)
        .ok_or_else(|| DownloadError::Other(format!("missing required parameter: {}", snake)))
}

/// Extract an optional bool parameter, supporting both snake_case and camelCase.
pub(crate) fn get_bool_param(params: &Value, snake: &str, camel: &str) -> Option<bool> {
    params.get(snake).or_else(|| params.get(camel)).and_then(|v| v.as_bool())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn str_param_prefers_snake_case() {
        let params = json!({"repo_id": "a/b", "repoId": "c/d"});
        assert_eq!(get_str_param(&params, "repo_id", "repoId"), Some("a/b"));
    }

    #[test]
    fn str_param_falls_back_to_camel_case() {
        let params = json!({"repoId": "c/d"});
        assert_eq!(get_str_param(&params, "repo_id", "repoId"), Some("c/d"));
    }

    #[test]
    fn require_str_param_errors_when_missing() {
        let params = json!({});
        assert!(require_str_param(&params, "repo_id", "repoId").is_err());
    }
}
