//! In-memory API server for reconciler tests
//!
//! Serves a `kube::Client` from a `tower_test` mock service. Objects are kept
//! as JSON keyed by their request path, so a test seeds the exact objects a
//! reconciler reads and inspects what it wrote back. Supported verbs: get,
//! list (no selectors), create, replace, merge patch of the object or its
//! `/status` subresource.

use http::{Request, Response, StatusCode};
use kube::Client;
use kube::client::Body;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub use http::Method;

/// One request as the fake API server saw it
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub body: Value,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, Value>,
    failures: Vec<(Method, String, u16)>,
    requests: Vec<RecordedRequest>,
    resource_version: u64,
}

/// Path-addressed object store behind a mock `Client`
#[derive(Debug, Clone, Default)]
pub struct FakeApiServer {
    state: Arc<Mutex<State>>,
}

fn status_error(code: u16, message: &str) -> (StatusCode, Value) {
    let reason = match code {
        404 => "NotFound",
        409 => "Conflict",
        _ => "InternalError",
    };
    (
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": message,
            "reason": reason,
            "code": code,
        }),
    )
}

/// Whether `path` names a resource collection rather than one object
///
/// `/api/v1/nodes`, `/apis/<group>/<version>/namespaces/<ns>/<plural>`
fn is_collection(path: &str) -> bool {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let base = match segments.first() {
        Some(&"api") => 2,
        Some(&"apis") => 3,
        _ => return false,
    };
    let rest = &segments[base.min(segments.len())..];
    match rest {
        ["namespaces", _, plural] => !plural.is_empty(),
        [_plural] => true,
        _ => false,
    }
}

/// RFC 7386 merge patch
fn merge(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = json!({});
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

impl State {
    fn stamp(&mut self, object: &mut Value) {
        self.resource_version += 1;
        merge(
            object,
            &json!({ "metadata": { "resourceVersion": self.resource_version.to_string() } }),
        );
    }

    fn handle(&mut self, method: &Method, path: &str, body: &Value) -> (StatusCode, Value) {
        if let Some((_, _, code)) = self
            .failures
            .iter()
            .find(|(m, p, _)| m == method && p == path)
        {
            return status_error(*code, &format!("{method} {path} rejected"));
        }

        let (object_path, subresource) = match path.strip_suffix("/status") {
            Some(base) if self.objects.contains_key(base) => (base.to_string(), true),
            _ => (path.to_string(), false),
        };

        match method.as_str() {
            "GET" => {
                if let Some(object) = self.objects.get(&object_path) {
                    return (StatusCode::OK, object.clone());
                }
                let prefix = format!("{path}/");
                let items: Vec<Value> = self
                    .objects
                    .iter()
                    .filter(|(key, _)| {
                        key.strip_prefix(&prefix).is_some_and(|name| !name.contains('/'))
                    })
                    .map(|(_, object)| object.clone())
                    .collect();
                if !is_collection(path) {
                    return status_error(404, &format!("{path} not found"));
                }
                (
                    StatusCode::OK,
                    json!({
                        "apiVersion": "v1",
                        "kind": "List",
                        "metadata": { "resourceVersion": self.resource_version.to_string() },
                        "items": items,
                    }),
                )
            }
            "POST" => {
                let Some(name) = body.pointer("/metadata/name").and_then(Value::as_str) else {
                    return status_error(422, "metadata.name is required");
                };
                let key = format!("{path}/{name}");
                if self.objects.contains_key(&key) {
                    return status_error(409, &format!("{key} already exists"));
                }
                let mut object = body.clone();
                merge(&mut object, &json!({ "metadata": { "generation": 1 } }));
                self.stamp(&mut object);
                self.objects.insert(key, object.clone());
                (StatusCode::CREATED, object)
            }
            "PUT" => {
                let Some(existing) = self.objects.get(&object_path) else {
                    return status_error(404, &format!("{path} not found"));
                };
                let mut object = body.clone();
                if subresource {
                    let status = object.get("status").cloned().unwrap_or(Value::Null);
                    object = existing.clone();
                    merge(&mut object, &json!({ "status": status }));
                }
                self.stamp(&mut object);
                self.objects.insert(object_path, object.clone());
                (StatusCode::OK, object)
            }
            "PATCH" => {
                let Some(existing) = self.objects.get(&object_path) else {
                    return status_error(404, &format!("{path} not found"));
                };
                let mut object = existing.clone();
                merge(&mut object, body);
                self.stamp(&mut object);
                self.objects.insert(object_path, object.clone());
                (StatusCode::OK, object)
            }
            _ => status_error(405, &format!("{method} not supported")),
        }
    }
}

impl FakeApiServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `object` at `path`, e.g. `/api/v1/nodes/worker-1`
    pub fn insert(&self, path: &str, mut object: Value) {
        if let Ok(mut state) = self.state.lock() {
            state.stamp(&mut object);
            state.objects.insert(path.to_string(), object);
        }
    }

    /// Answer every `method` request to `path` with an API error of `code`
    pub fn fail(&self, method: Method, path: &str, code: u16) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.push((method, path.to_string(), code));
        }
    }

    pub fn object(&self, path: &str) -> Option<Value> {
        self.state.lock().ok()?.objects.get(path).cloned()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state
            .lock()
            .map(|state| state.requests.clone())
            .unwrap_or_default()
    }

    /// Requests with `method` to `path`
    pub fn requests_to(&self, method: &Method, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.method == *method && request.path == path)
            .collect()
    }

    /// A client served by this store; must be called inside a tokio runtime
    pub fn client(&self) -> Client {
        let (service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some((request, send)) = handle.next_request().await {
                let method = request.method().clone();
                let path = request.uri().path().to_string();
                let bytes = request.into_body().collect_bytes().await.unwrap_or_default();
                let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

                let (status, response) = match state.lock() {
                    Ok(mut state) => {
                        state.requests.push(RecordedRequest {
                            method: method.clone(),
                            path: path.clone(),
                            body: body.clone(),
                        });
                        state.handle(&method, &path, &body)
                    }
                    Err(_) => status_error(500, "fake API server state poisoned"),
                };

                let response = Response::builder()
                    .status(status)
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&response).unwrap_or_default()));
                if let Ok(response) = response {
                    send.send_response(response);
                }
            }
        });
        Client::new(service, "default")
    }
}
