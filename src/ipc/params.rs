use serde_json::json;

use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteStore;

pub fn store<'a>(state: &'a AppState, req: &Request) -> Result<&'a SqliteStore, serde_json::Value> {
    state
        .store
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    optional_str(req, key)
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Trimmed string param; blank counts as absent.
pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn optional_f64(req: &Request, key: &str) -> Result<Option<f64>, serde_json::Value> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a number", key),
                Some(json!({ key: v })),
            )
        }),
    }
}

pub fn non_negative_f64(req: &Request, key: &str) -> Result<Option<f64>, serde_json::Value> {
    match optional_f64(req, key)? {
        Some(v) if v < 0.0 => Err(err(
            &req.id,
            "bad_params",
            format!("{} must not be negative", key),
            Some(json!({ key: v })),
        )),
        other => Ok(other),
    }
}

pub fn required_str_list(req: &Request, key: &str) -> Result<Vec<String>, serde_json::Value> {
    let Some(arr) = req.params.get(key).and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", format!("missing {}", key), None));
    };
    arr.iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    err(
                        &req.id,
                        "bad_params",
                        format!("{} must contain non-empty strings", key),
                        Some(json!({ key: arr })),
                    )
                })
        })
        .collect()
}
