use crate::adapter::{decode_record, encode_record, EntityAdapter};
use crate::error::SyncResult;
use crate::table::SyncTable;
use larder_storage::{InMemoryStore, LocalStore, SyncRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Note {
    pub text: String,
    #[serde(default)]
    pub pinned: bool,
    /// Server-computed.
    #[serde(default)]
    pub word_count: u32,
}

impl Note {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            pinned: false,
            word_count: 0,
        }
    }
}

pub(crate) struct NoteAdapter;

impl EntityAdapter for NoteAdapter {
    type Entity = Note;
    const RESOURCE: &'static str = "notes";

    fn to_remote(record: &SyncRecord<Note>) -> SyncResult<Value> {
        encode_record(record, &record.body)
    }

    fn from_remote(value: Value) -> SyncResult<SyncRecord<Note>> {
        let (meta, body) = decode_record::<Note>(value)?;
        Ok(SyncRecord::synced(meta.id, meta.created_at, meta.updated_at, body))
    }

    fn absorb_server_fields(local: &mut Note, canonical: &Note) {
        local.word_count = canonical.word_count;
    }
}

pub(crate) fn count_words(record: &mut Value) {
    let words = record["text"].as_str().map_or(0, |t| t.split_whitespace().count());
    record["word_count"] = Value::from(words);
}

pub(crate) fn note_table() -> (Arc<InMemoryStore<Note>>, Arc<SyncTable<Note>>) {
    let store = Arc::new(InMemoryStore::new());
    let shared: Arc<dyn LocalStore<Note>> = store.clone();
    (store, Arc::new(SyncTable::new(shared)))
}
