//! File-backed mock registry.
//!
//! Mappings live in `<root>/mocks.json` (label -> entry) and payloads under
//! `<root>/mock_data/`. Entries always point inside `mock_data/`; anything
//! else is refused when resolving.

use crate::error::{Error, Result};
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

const MAPPINGS_FILE: &str = "mocks.json";
const DATA_DIR: &str = "mock_data";

pub type Mappings = BTreeMap<String, MockEntry>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MockKind {
    #[default]
    Json,
    Csv,
    Raw,
}

fn default_status() -> u16 {
    200
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockEntry {
    /// Relative to the registry root, always under `mock_data/`.
    pub path: String,
    #[serde(rename = "type", default)]
    pub kind: MockKind,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Body of `POST /admin/mocks`. One of `content` or `content_b64` is required.
#[derive(Debug, Default, Deserialize)]
pub struct RegisterMock {
    pub label: Option<String>,
    pub filename: Option<String>,
    /// Stored as UTF-8 text. Non-string JSON is stored as its JSON text.
    pub content: Option<JsonValue>,
    pub content_b64: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: MockKind,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub content_type: Option<String>,
}

/// Response settings shared by every way of registering a mock.
#[derive(Debug, Clone)]
pub struct MockOptions {
    pub kind: MockKind,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub content_type: Option<String>,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            kind: MockKind::Json,
            status: default_status(),
            headers: BTreeMap::new(),
            content_type: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedMock {
    pub entry: MockEntry,
    pub abs_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub content_type: String,
    pub body: Vec<u8>,
}

pub struct MockRegistry {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl MockRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn mappings_path(&self) -> PathBuf {
        self.root.join(MAPPINGS_FILE)
    }

    fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    /// Missing or unreadable mappings count as an empty registry.
    pub fn load_mappings(&self) -> Mappings {
        let path = self.mappings_path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                debug!("No mock mappings at {}: {}", path.display(), e);
                return Mappings::new();
            }
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!("Ignoring malformed {}: {}", path.display(), e);
            Mappings::new()
        })
    }

    fn save_mappings(&self, mappings: &Mappings) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::write(self.mappings_path(), serde_json::to_string_pretty(mappings)?)?;
        Ok(())
    }

    pub fn register(&self, request: RegisterMock) -> Result<(String, MockEntry)> {
        let label = request
            .label
            .filter(|l| !l.is_empty())
            .ok_or_else(|| Error::InvalidRequest("label required".to_string()))?;
        validate_label(&label)?;

        let _guard = self.write_lock.lock();
        let mut mappings = self.load_mappings();
        if mappings.contains_key(&label) {
            return Err(Error::Conflict(
                "label exists; delete first or use another label".to_string(),
            ));
        }

        let content = match (request.content_b64, request.content) {
            (Some(b64), _) => base64::engine::general_purpose::STANDARD
                .decode(b64.trim())
                .map_err(|e| Error::InvalidRequest(format!("invalid base64: {}", e)))?,
            (None, Some(JsonValue::String(text))) => text.into_bytes(),
            (None, Some(other)) => other.to_string().into_bytes(),
            (None, None) => {
                return Err(Error::InvalidRequest(
                    "content or content_b64 required".to_string(),
                ))
            }
        };

        if request.kind == MockKind::Json {
            validate_json(&content)?;
        }

        let filename = request
            .filename
            .as_deref()
            .and_then(|f| Path::new(f).file_name())
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.bin", label));
        let dest_name = format!("{}__{}", label, filename);
        fs::create_dir_all(self.data_dir())?;
        fs::write(self.data_dir().join(&dest_name), &content)?;

        let entry = MockEntry {
            path: format!("{}/{}", DATA_DIR, dest_name),
            kind: request.kind,
            status: request.status,
            headers: request.headers,
            content_type: request.content_type,
        };
        mappings.insert(label.clone(), entry.clone());
        self.save_mappings(&mappings)?;

        info!("Registered mock {} ({} bytes)", label, content.len());
        Ok((label, entry))
    }

    /// Copies `src` into `mock_data/` and maps it under `label`.
    pub fn register_file(
        &self,
        label: &str,
        src: &Path,
        options: MockOptions,
        overwrite: bool,
    ) -> Result<MockEntry> {
        validate_label(label)?;
        if !src.is_file() {
            return Err(Error::NotFound(format!("source {}", src.display())));
        }

        let _guard = self.write_lock.lock();
        let mut mappings = self.load_mappings();
        if mappings.contains_key(label) && !overwrite {
            return Err(Error::Conflict(
                "label already exists; use --overwrite to replace".to_string(),
            ));
        }

        if options.kind == MockKind::Json {
            validate_json(&fs::read(src)?)?;
        }

        let src_name = src
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.bin", label));
        let dest_name = format!("{}__{}", label, src_name);
        fs::create_dir_all(self.data_dir())?;
        fs::copy(src, self.data_dir().join(&dest_name))?;

        let entry = MockEntry {
            path: format!("{}/{}", DATA_DIR, dest_name),
            kind: options.kind,
            status: options.status,
            headers: options.headers,
            content_type: options.content_type,
        };

        if let Some(previous) = mappings.insert(label.to_string(), entry.clone()) {
            if previous.path != entry.path {
                self.remove_payload(&previous);
            }
        }
        self.save_mappings(&mappings)?;

        info!("Registered mock {} from {}", label, src.display());
        Ok(entry)
    }

    pub fn resolve(&self, label: &str) -> Option<ResolvedMock> {
        let entry = self.load_mappings().remove(label)?;
        let Some(abs_path) = self.payload_path(&entry.path) else {
            warn!("Mock {} points outside {}: {}", label, DATA_DIR, entry.path);
            return None;
        };
        Some(ResolvedMock { entry, abs_path })
    }

    pub fn delete(&self, label: &str) -> Result<MockEntry> {
        let _guard = self.write_lock.lock();
        let mut mappings = self.load_mappings();
        let entry = mappings
            .remove(label)
            .ok_or_else(|| Error::NotFound(format!("mock {:?}", label)))?;
        self.save_mappings(&mappings)?;
        self.remove_payload(&entry);
        info!("Deleted mock {}", label);
        Ok(entry)
    }

    /// Reads the payload of a resolved mock. JSON payloads are parsed and
    /// re-serialized so a corrupted file is reported instead of replayed.
    pub fn load(&self, mock: &ResolvedMock) -> Result<MockResponse> {
        let entry = &mock.entry;
        let (content_type, body) = match entry.kind {
            MockKind::Json => {
                let value: JsonValue = serde_json::from_slice(&fs::read(&mock.abs_path)?)?;
                ("application/json".to_string(), serde_json::to_vec(&value)?)
            }
            MockKind::Csv => ("text/csv".to_string(), fs::read(&mock.abs_path)?),
            MockKind::Raw => (
                entry
                    .content_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                fs::read(&mock.abs_path)?,
            ),
        };
        Ok(MockResponse {
            status: entry.status,
            headers: entry.headers.clone(),
            content_type,
            body,
        })
    }

    fn payload_path(&self, relative: &str) -> Option<PathBuf> {
        let relative = Path::new(relative);
        let mut components = relative.components();
        if components.next() != Some(Component::Normal(DATA_DIR.as_ref())) {
            return None;
        }
        let mut rest = components.peekable();
        rest.peek()?;
        if !rest.all(|c| matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.root.join(relative))
    }

    fn remove_payload(&self, entry: &MockEntry) {
        let Some(path) = self.payload_path(&entry.path) else {
            return;
        };
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

fn validate_label(label: &str) -> Result<()> {
    let has_separator = label.contains(|c: char| c == '/' || c == '\\');
    if label.is_empty() || label == "." || label == ".." || has_separator {
        return Err(Error::InvalidRequest(format!("invalid label {:?}", label)));
    }
    Ok(())
}

fn validate_json(content: &[u8]) -> Result<()> {
    serde_json::from_slice::<JsonValue>(content)
        .map(|_| ())
        .map_err(|e| Error::InvalidRequest(format!("invalid json: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: JsonValue) -> RegisterMock {
        serde_json::from_value(value).unwrap()
    }

    fn registry() -> (MockRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (MockRegistry::new(dir.path()), dir)
    }

    #[test]
    fn test_register_and_load_json() {
        let (registry, dir) = registry();
        let (label, entry) = registry
            .register(request(json!({
                "label": "users",
                "filename": "resp.json",
                "content": "{\"ok\": true}",
                "status": 202,
                "headers": {"X-Mock": "1"},
            })))
            .unwrap();
        assert_eq!(label, "users");
        assert_eq!(entry.path, "mock_data/users__resp.json");
        assert!(dir.path().join("mock_data/users__resp.json").exists());

        let resolved = registry.resolve("users").unwrap();
        let response = registry.load(&resolved).unwrap();
        assert_eq!(response.status, 202);
        assert_eq!(response.content_type, "application/json");
        assert_eq!(response.headers.get("X-Mock").map(String::as_str), Some("1"));
        assert_eq!(response.body, br#"{"ok":true}"#);
    }

    #[test]
    fn test_register_base64_raw() {
        let (registry, _dir) = registry();
        let (_, entry) = registry
            .register(request(json!({
                "label": "blob",
                "content_b64": "AAEC",
                "type": "raw",
                "content_type": "image/png",
            })))
            .unwrap();
        assert_eq!(entry.path, "mock_data/blob__blob.bin");

        let response = registry.load(&registry.resolve("blob").unwrap()).unwrap();
        assert_eq!(response.body, vec![0, 1, 2]);
        assert_eq!(response.content_type, "image/png");
        assert_eq!(response.status, 200);
    }

    #[test]
    fn test_register_object_content_is_stored_as_json_text() {
        let (registry, _dir) = registry();
        registry
            .register(request(json!({"label": "obj", "content": {"a": [1, 2]}})))
            .unwrap();
        let response = registry.load(&registry.resolve("obj").unwrap()).unwrap();
        assert_eq!(response.body, br#"{"a":[1,2]}"#);
    }

    #[test]
    fn test_register_validation() {
        let (registry, _dir) = registry();
        let cases = [
            json!({"content": "{}"}),
            json!({"label": "", "content": "{}"}),
            json!({"label": "../escape", "content": "{}"}),
            json!({"label": "x"}),
            json!({"label": "x", "content_b64": "!!!"}),
            json!({"label": "x", "content": "not json"}),
        ];
        for case in cases {
            assert!(
                matches!(registry.register(request(case.clone())), Err(Error::InvalidRequest(_))),
                "{case}"
            );
        }
        assert!(registry.load_mappings().is_empty());
    }

    #[test]
    fn test_register_conflict() {
        let (registry, _dir) = registry();
        registry
            .register(request(json!({"label": "a", "content": "[]"})))
            .unwrap();
        assert!(matches!(
            registry.register(request(json!({"label": "a", "content": "[]"}))),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn test_csv_mock() {
        let (registry, _dir) = registry();
        registry
            .register(request(json!({
                "label": "report",
                "filename": "r.csv",
                "content": "a,b\n1,2\n",
                "type": "csv",
            })))
            .unwrap();
        let response = registry.load(&registry.resolve("report").unwrap()).unwrap();
        assert_eq!(response.content_type, "text/csv");
        assert_eq!(response.body, b"a,b\n1,2\n");
    }

    #[test]
    fn test_delete_removes_file() {
        let (registry, dir) = registry();
        registry
            .register(request(json!({"label": "gone", "content": "1"})))
            .unwrap();
        let file = dir.path().join("mock_data/gone__gone.bin");
        assert!(file.exists());

        registry.delete("gone").unwrap();
        assert!(!file.exists());
        assert!(registry.resolve("gone").is_none());
        assert!(matches!(registry.delete("gone"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_resolve_rejects_paths_outside_data_dir() {
        let (registry, dir) = registry();
        fs::write(
            dir.path().join(MAPPINGS_FILE),
            r#"{
                "up": {"path": "mock_data/../mocks.json"},
                "abs": {"path": "/etc/passwd"},
                "other": {"path": "elsewhere/file.json"},
                "ok": {"path": "mock_data/ok.json"}
            }"#,
        )
        .unwrap();
        assert!(registry.resolve("up").is_none());
        assert!(registry.resolve("abs").is_none());
        assert!(registry.resolve("other").is_none());
        let ok = registry.resolve("ok").unwrap();
        assert_eq!(ok.entry.kind, MockKind::Json);
        assert_eq!(ok.entry.status, 200);
        assert_eq!(ok.abs_path, dir.path().join("mock_data/ok.json"));
    }

    #[test]
    fn test_malformed_mappings_are_empty() {
        let (registry, dir) = registry();
        fs::write(dir.path().join(MAPPINGS_FILE), "{not json").unwrap();
        assert!(registry.load_mappings().is_empty());
    }

    #[test]
    fn test_load_corrupt_json_payload_fails() {
        let (registry, dir) = registry();
        registry
            .register(request(json!({"label": "bad", "content": "{}"})))
            .unwrap();
        fs::write(dir.path().join("mock_data/bad__bad.bin"), "{broken").unwrap();
        let resolved = registry.resolve("bad").unwrap();
        assert!(registry.load(&resolved).is_err());
    }

    #[test]
    fn test_register_file_and_overwrite() {
        let (registry, dir) = registry();
        let src_dir = tempfile::tempdir().unwrap();
        let first = src_dir.path().join("first.json");
        let second = src_dir.path().join("second.json");
        fs::write(&first, "{\"v\": 1}").unwrap();
        fs::write(&second, "{\"v\": 2}").unwrap();

        let entry = registry
            .register_file("cfg", &first, MockOptions::default(), false)
            .unwrap();
        assert_eq!(entry.path, "mock_data/cfg__first.json");

        assert!(matches!(
            registry.register_file("cfg", &second, MockOptions::default(), false),
            Err(Error::Conflict(_))
        ));

        registry
            .register_file("cfg", &second, MockOptions::default(), true)
            .unwrap();
        assert!(!dir.path().join("mock_data/cfg__first.json").exists());
        assert!(dir.path().join("mock_data/cfg__second.json").exists());
        let response = registry.load(&registry.resolve("cfg").unwrap()).unwrap();
        assert_eq!(response.body, br#"{"v":2}"#);
    }

    #[test]
    fn test_register_file_errors() {
        let (registry, _dir) = registry();
        let src_dir = tempfile::tempdir().unwrap();
        let text = src_dir.path().join("notes.txt");
        fs::write(&text, "plain text").unwrap();

        assert!(matches!(
            registry.register_file("n", &src_dir.path().join("missing"), MockOptions::default(), false),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            registry.register_file("n", &text, MockOptions::default(), false),
            Err(Error::InvalidRequest(_))
        ));
        let raw = MockOptions {
            kind: MockKind::Raw,
            content_type: Some("text/plain".to_string()),
            ..MockOptions::default()
        };
        registry.register_file("n", &text, raw, false).unwrap();
        let response = registry.load(&registry.resolve("n").unwrap()).unwrap();
        assert_eq!(response.content_type, "text/plain");
        assert_eq!(response.body, b"plain text");
    }
}
