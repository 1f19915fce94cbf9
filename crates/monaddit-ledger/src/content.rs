//! Content metadata store.
//!
//! The ledger only needs two things from content: that an id exists (and
//! who wrote it) before a bond is locked, and somewhere to record the
//! display status as bonds move through their lifecycle.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{LedgerError, Result};
use crate::types::{Address, ContentId, Timestamp};

/// Largest page returned by `list_contents`
pub const MAX_PAGE_SIZE: usize = 100;

/// Kind of bonded content
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Post,
    Comment,
}

/// Display status driven by the bond lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    /// Stored, no bond locked yet
    Pending,
    Published,
    Challenged,
    Withdrawn,
    Slashed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: ContentId,
    pub author: Address,
    pub kind: ContentKind,
    pub parent_id: Option<ContentId>,
    pub community_id: Option<String>,
    pub title: String,
    pub body: String,
    pub content_hash: String,
    pub status: ContentStatus,
    pub created_at: Timestamp,
}

/// Submission for a new content record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewContent {
    pub author: Address,
    pub kind: ContentKind,
    #[serde(default)]
    pub parent_id: Option<ContentId>,
    #[serde(default)]
    pub community_id: Option<String>,
    #[serde(default)]
    pub title: String,
    pub body: String,
}

impl NewContent {
    /// `0x` + BLAKE3 over kind, author, title and body
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(match self.kind {
            ContentKind::Post => b"post",
            ContentKind::Comment => b"comment",
        });
        hasher.update(self.author.as_str().as_bytes());
        hasher.update(&(self.title.len() as u64).to_le_bytes());
        hasher.update(self.title.as_bytes());
        hasher.update(self.body.as_bytes());
        format!("0x{}", hasher.finalize().to_hex())
    }

    fn validate(&self) -> Result<()> {
        if self.body.trim().is_empty() {
            return Err(LedgerError::InvalidContent("body must not be empty".into()));
        }
        match (self.kind, &self.parent_id) {
            (ContentKind::Post, _) if self.title.trim().is_empty() => {
                Err(LedgerError::InvalidContent("posts need a title".into()))
            }
            (ContentKind::Comment, None) => {
                Err(LedgerError::InvalidContent("comments need a parent_id".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Backend for content metadata
pub trait ContentStore: Send + Sync {
    fn get_content(&self, id: &ContentId) -> Result<ContentRecord>;

    /// First record stored with this content hash
    fn get_content_by_hash(&self, content_hash: &str) -> Result<ContentRecord>;

    fn set_status(&self, id: &ContentId, status: ContentStatus) -> Result<()>;

    fn create_content(&self, content: NewContent, now: Timestamp) -> Result<ContentRecord>;

    /// Newest first
    fn list_contents(&self, limit: usize, offset: usize) -> Result<Vec<ContentRecord>>;

    fn count(&self) -> usize;
}

/// Lowercase `0x`-prefixed form used as the hash index key
pub fn normalize_content_hash(raw: &str) -> String {
    let raw = raw.trim();
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    format!("0x{}", digits.to_ascii_lowercase())
}

#[derive(Default)]
struct Records {
    by_id: HashMap<ContentId, ContentRecord>,
    by_hash: HashMap<String, ContentId>,
}

/// In-memory content store
pub struct InMemoryContentStore {
    records: RwLock<Records>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Records::default()),
        }
    }
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentStore for InMemoryContentStore {
    fn get_content(&self, id: &ContentId) -> Result<ContentRecord> {
        self.records
            .read()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("content", id))
    }

    fn get_content_by_hash(&self, content_hash: &str) -> Result<ContentRecord> {
        let key = normalize_content_hash(content_hash);
        let records = self.records.read();
        records
            .by_hash
            .get(&key)
            .and_then(|id| records.by_id.get(id))
            .cloned()
            .ok_or_else(|| LedgerError::not_found("content with hash", key))
    }

    fn set_status(&self, id: &ContentId, status: ContentStatus) -> Result<()> {
        let mut records = self.records.write();
        let record = records
            .by_id
            .get_mut(id)
            .ok_or_else(|| LedgerError::not_found("content", id))?;
        record.status = status;
        Ok(())
    }

    fn create_content(&self, content: NewContent, now: Timestamp) -> Result<ContentRecord> {
        content.validate()?;

        let mut records = self.records.write();
        if let Some(parent) = &content.parent_id {
            if !records.by_id.contains_key(parent) {
                return Err(LedgerError::InvalidContent(format!("parent {} does not exist", parent)));
            }
        }

        let record = ContentRecord {
            id: ContentId::generate(),
            content_hash: content.content_hash(),
            author: content.author,
            kind: content.kind,
            parent_id: content.parent_id,
            community_id: content.community_id,
            title: content.title,
            body: content.body,
            status: ContentStatus::Pending,
            created_at: now,
        };
        records
            .by_hash
            .entry(record.content_hash.clone())
            .or_insert_with(|| record.id.clone());
        records.by_id.insert(record.id.clone(), record.clone());

        tracing::debug!(id = %record.id, kind = ?record.kind, "Stored content");
        Ok(record)
    }

    fn list_contents(&self, limit: usize, offset: usize) -> Result<Vec<ContentRecord>> {
        let records = self.records.read();
        let mut all: Vec<&ContentRecord> = records.by_id.values().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        Ok(all
            .into_iter()
            .skip(offset)
            .take(limit.min(MAX_PAGE_SIZE))
            .cloned()
            .collect())
    }

    fn count(&self) -> usize {
        self.records.read().by_id.len()
    }
}
