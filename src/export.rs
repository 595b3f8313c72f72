//! Type definitions for the ChatGPT `conversations.json` export.
//!
//! Only the fields the renderer and the driver read are modelled; everything
//! else in the export is ignored by serde. The file is a JSON array:
//!
//! ```json
//! [{
//!   "id": "…", "conversation_id": "…", "title": "…", "create_time": 1700000000.5,
//!   "mapping": {
//!     "<node-id>": {
//!       "message": {
//!         "author": { "role": "user" },
//!         "content": { "content_type": "text", "parts": ["…"] }
//!       }
//!     }
//!   }
//! }]
//! ```

use crate::utils::MigrateError;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// One exported chat thread.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Conversation {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// Seconds since the epoch, fractional.
    #[serde(default)]
    pub create_time: Option<f64>,
    /// Node id -> node. `serde_json` is built with `preserve_order`, so
    /// iteration follows the order the export lists the nodes in.
    #[serde(default)]
    pub mapping: Map<String, Value>,
    /// Set when a previous pass already found this conversation in Bear.
    #[serde(default)]
    pub exists_in_bear: bool,
}

/// A message as found under `mapping.<node>.message`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub author: Author,
    #[serde(default)]
    pub content: Content,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Content {
    /// Absent for non-text content types (code, tether_quote, …).
    #[serde(default)]
    pub parts: Option<Vec<Value>>,
}

impl Conversation {
    /// Stable identifier: `conversation_id` when present, otherwise `id`.
    pub fn key(&self) -> &str {
        self.conversation_id
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or_default()
    }

    /// Messages in mapping order. Nodes without a message, or whose message
    /// does not have the expected shape, are skipped.
    pub fn messages(&self) -> impl Iterator<Item = Message> + '_ {
        self.mapping.values().filter_map(|node| {
            let msg = node.get("message")?;
            if msg.is_null() {
                return None;
            }
            serde_json::from_value::<Message>(msg.clone()).ok()
        })
    }
}

/// Read and parse the whole export into memory.
pub fn load_export(path: &Path) -> Result<Vec<Conversation>, MigrateError> {
    let raw = fs::read(path).map_err(|e| MigrateError::from_io(path, e))?;
    serde_json::from_slice(&raw).map_err(|source| MigrateError::Parse {
        path: path.to_path_buf(),
        line: source.line(),
        source,
    })
}

/// Python-style truthiness for a JSON fragment.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}
