//! Bounded-size rewrite of oversized JSON history responses.
//!
//! Only one collection is thinned per response, checked in this order:
//! `messages[]`, `mapping{}`, `items[]`. A collection is only touched when
//! it holds more than `keep + RESHAPE_MARGIN` entries. Any failure returns
//! the original response untouched.

use http::HeaderValue;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use serde_json::{Map, Value};
use thiserror::Error;

use tgate_core::Response;

/// Entries kept when no tuned value is supplied.
pub const DEFAULT_RESHAPE_KEEP: usize = 60;
/// Hysteresis above `keep` before a collection is thinned.
pub const RESHAPE_MARGIN: usize = 10;

#[derive(Debug, Error)]
pub enum ReshapeError {
    #[error("response is not JSON")]
    NotJson,
    #[error("malformed JSON body: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Thin `response` to the newest `keep` entries if it is oversized.
pub fn reshape_response(response: Response, keep: usize) -> Response {
    match thin_body(&response, keep) {
        Ok(Some(body)) => rebuild(response, body),
        Ok(None) => response,
        Err(e) => {
            tracing::debug!(error = %e, "reshape skipped");
            response
        }
    }
}

/// The thinned body, or `None` when nothing needed thinning.
fn thin_body(response: &Response, keep: usize) -> Result<Option<Vec<u8>>, ReshapeError> {
    let content_type = response.content_type().unwrap_or("");
    if !content_type.to_ascii_lowercase().contains("json") {
        return Err(ReshapeError::NotJson);
    }

    let mut data: Value = serde_json::from_slice(&response.body)?;
    let Some(root) = data.as_object_mut() else {
        return Ok(None);
    };

    let limit = keep.saturating_add(RESHAPE_MARGIN);
    let len_of = |root: &Map<String, Value>, key: &str| {
        root.get(key).and_then(Value::as_array).map(Vec::len)
    };

    let changed = if len_of(&*root, "messages").is_some_and(|n| n > limit) {
        thin_array(root, "messages", keep, create_time)
    } else if root.get("mapping").is_some_and(Value::is_object) {
        thin_mapping(root, keep, limit)
    } else if len_of(&*root, "items").is_some_and(|n| n > limit) {
        thin_array(root, "items", keep, |_| 0.0)
    } else {
        false
    };

    if !changed {
        return Ok(None);
    }
    Ok(Some(serde_json::to_vec(&data)?))
}

/// Stable-sort `root[key]` by `time` and keep the newest `keep` entries.
fn thin_array(
    root: &mut Map<String, Value>,
    key: &str,
    keep: usize,
    time: impl Fn(&Value) -> f64,
) -> bool {
    let Some(Value::Array(entries)) = root.get_mut(key) else {
        return false;
    };
    entries.sort_by(|a, b| time(a).total_cmp(&time(b)));
    let cutoff = entries.len().saturating_sub(keep);
    entries.drain(..cutoff);
    true
}

fn thin_mapping(root: &mut Map<String, Value>, keep: usize, limit: usize) -> bool {
    let Some(Value::Object(mapping)) = root.get_mut("mapping") else {
        return false;
    };
    if mapping.len() <= limit {
        return false;
    }

    let mut order: Vec<(String, f64)> = mapping
        .iter()
        .map(|(id, node)| {
            let t = node.get("message").map(create_time).unwrap_or(0.0);
            (id.clone(), t)
        })
        .collect();
    order.sort_by(|a, b| a.1.total_cmp(&b.1));
    let cutoff = order.len().saturating_sub(keep);

    let mut kept = Map::new();
    for (id, _) in order.into_iter().skip(cutoff) {
        if let Some(node) = mapping.remove(&id) {
            kept.insert(id, node);
        }
    }
    *mapping = kept;
    true
}

/// Creation time of a message object; missing or non-numeric is `0`.
fn create_time(message: &Value) -> f64 {
    message
        .get("create_time")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

fn rebuild(original: Response, body: Vec<u8>) -> Response {
    let mut headers = original.headers;
    headers.remove(CONTENT_LENGTH);
    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
    }
    Response {
        status: original.status,
        status_text: original.status_text,
        headers,
        body,
        opaque_redirect: false,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use serde_json::json;

    fn json_response(value: &Value) -> Response {
        let mut res = Response::json(serde_json::to_vec(value).expect("serialize"));
        res.headers
            .insert(CONTENT_LENGTH, HeaderValue::from_static("12345"));
        res
    }

    fn body_of(res: &Response) -> Value {
        serde_json::from_slice(&res.body).expect("json body")
    }

    fn messages(n: usize) -> Vec<Value> {
        (0..n)
            .map(|i| json!({"id": format!("m{i}"), "create_time": i as f64}))
            .collect()
    }

    // ── 1. messages ─────────────────────────────────────────────────

    #[test]
    fn keeps_newest_messages_in_order() {
        let keep = 20;
        let all = messages(keep + 11);
        let res = reshape_response(json_response(&json!({"messages": all.clone()})), keep);

        let out = body_of(&res);
        let kept = out["messages"].as_array().expect("array");
        assert_eq!(kept.len(), keep);
        assert_eq!(kept.as_slice(), &all[11..]);
        assert!(res.headers.get(CONTENT_LENGTH).is_none());
        assert_eq!(res.content_type(), Some("application/json"));
    }

    #[test]
    fn unsorted_messages_are_sorted_before_cut() {
        let mut all = messages(40);
        all.reverse();
        all[5]["create_time"] = Value::Null;
        let res = reshape_response(json_response(&json!({"messages": all})), 20);
        let out = body_of(&res);
        let kept = out["messages"].as_array().expect("array");
        assert_eq!(kept[0]["id"], "m19");
        assert!(kept.iter().all(|m| m["id"] != "m34"), "null time sorts oldest");
        assert_eq!(kept[19]["id"], "m39");
    }

    #[test]
    fn at_threshold_is_byte_identical_passthrough() {
        let original = json_response(&json!({"messages": messages(30)}));
        let res = reshape_response(original.clone(), 20);
        assert_eq!(res, original);
    }

    // ── 2. mapping and items ────────────────────────────────────────

    #[test]
    fn thins_mapping_by_message_time() {
        let mut mapping = Map::new();
        for i in 0..35 {
            mapping.insert(
                format!("n{i}"),
                json!({"message": {"create_time": (100 - i) as f64}}),
            );
        }
        mapping.insert("root".into(), json!({"message": null}));
        let res = reshape_response(json_response(&json!({"mapping": mapping})), 20);
        let out = body_of(&res);
        let kept = out["mapping"].as_object().expect("object");
        assert_eq!(kept.len(), 20);
        assert!(kept.contains_key("n0"), "newest entry kept");
        assert!(!kept.contains_key("root"), "timeless root is oldest");
        assert!(!kept.contains_key("n34"));
    }

    #[test]
    fn thins_items_keeping_tail() {
        let items: Vec<Value> = (0..50).map(|i| json!(i)).collect();
        let res = reshape_response(json_response(&json!({"items": items})), 20);
        let out = body_of(&res);
        assert_eq!(out["items"][0], 30);
        assert_eq!(out["items"].as_array().map(Vec::len), Some(20));
    }

    #[test]
    fn small_messages_fall_through_to_mapping() {
        let mut mapping = Map::new();
        for i in 0..40 {
            mapping.insert(format!("n{i}"), json!({"message": {"create_time": i}}));
        }
        let body = json!({"messages": messages(3), "mapping": mapping});
        let res = reshape_response(json_response(&body), 20);
        let out = body_of(&res);
        assert_eq!(out["messages"].as_array().map(Vec::len), Some(3));
        assert_eq!(out["mapping"].as_object().map(Map::len), Some(20));
    }

    // ── 3. fail-open ────────────────────────────────────────────────

    #[test]
    fn malformed_body_is_returned_unchanged() {
        let res = Response::json("{not json");
        let out = reshape_response(res.clone(), 20);
        assert_eq!(out, res);
    }

    #[test]
    fn non_json_is_returned_unchanged() {
        let res = Response::new(StatusCode::OK, "<html></html>");
        assert_eq!(reshape_response(res.clone(), 20), res);
    }

    #[test]
    fn status_is_preserved() {
        let mut res = json_response(&json!({"items": (0..40).collect::<Vec<_>>()}));
        res.status = StatusCode::PARTIAL_CONTENT;
        res.status_text = "Partial".into();
        let out = reshape_response(res, 20);
        assert_eq!(out.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(out.status_text, "Partial");
    }
}
