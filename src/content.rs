//! Question content served to sessions.
//!
//! The coordinator only needs to resolve a `(collection, question)` pair to
//! confirm it exists before broadcasting a `setup`. Where the content lives
//! is a deployment concern, so the lookup sits behind [`ContentStore`], with
//! [`DirContentStore`] as the directory-backed implementation:
//!
//! ```text
//! content/
//!   <collection-id>/
//!     <question-id>/
//!       info.json      {"question": "...", "answers": ["...", ...]}
//! ```
//!
//! Question folders without an `info.json` are skipped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::SwarmError;

/// One prompt with its fixed answer set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// The question folder name.
    pub id: String,
    /// The prompt text.
    pub prompt: String,
    /// Answer labels, in vertex order.
    pub answers: Vec<String>,
}

/// A named group of questions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    /// The collection folder name.
    pub id: String,
    /// Questions keyed by id.
    pub questions: BTreeMap<String, Question>,
}

impl Collection {
    /// Looks up a question by id.
    #[must_use]
    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.get(question_id)
    }
}

/// Resolves question references coming in over the control channel.
pub trait ContentStore: Send + Sync {
    /// Returns the question, or `None` if the collection or question is
    /// unknown.
    fn resolve(&self, collection_id: &str, question_id: &str) -> Option<Question>;
}

/// A store that knows no content. Every lookup misses.
///
/// Useful for deployments where clients carry their own content and the
/// server only relays ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyContentStore;

impl ContentStore for EmptyContentStore {
    fn resolve(&self, _collection_id: &str, _question_id: &str) -> Option<Question> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct QuestionInfo {
    question: String,
    #[serde(default)]
    answers: Vec<String>,
}

/// Directory-backed [`ContentStore`].
///
/// The whole tree is read once at construction and again on [`reload`];
/// lookups never touch the filesystem.
///
/// [`reload`]: DirContentStore::reload
#[derive(Debug)]
pub struct DirContentStore {
    root: PathBuf,
    collections: RwLock<BTreeMap<String, Collection>>,
}

impl DirContentStore {
    /// Loads every collection under `root`.
    ///
    /// # Errors
    ///
    /// [`SwarmError::Resource`] if `root` cannot be listed. Individual
    /// malformed question folders are skipped with a warning, not errors.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SwarmError> {
        let root = root.into();
        let collections = load_collections(&root)?;
        Ok(DirContentStore {
            root,
            collections: RwLock::new(collections),
        })
    }

    /// Re-reads the content tree, replacing the in-memory catalog.
    ///
    /// # Errors
    ///
    /// [`SwarmError::Resource`] if the root cannot be listed; the previous
    /// catalog is kept in that case.
    pub fn reload(&self) -> Result<(), SwarmError> {
        let fresh = load_collections(&self.root)?;
        *self.collections.write() = fresh;
        Ok(())
    }

    /// Ids of the loaded collections, sorted.
    #[must_use]
    pub fn collection_ids(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }
}

impl ContentStore for DirContentStore {
    fn resolve(&self, collection_id: &str, question_id: &str) -> Option<Question> {
        self.collections
            .read()
            .get(collection_id)
            .and_then(|collection| collection.question(question_id))
            .cloned()
    }
}

fn load_collections(root: &Path) -> Result<BTreeMap<String, Collection>, SwarmError> {
    let mut collections = BTreeMap::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let id = entry.file_name().to_string_lossy().into_owned();
        let collection = load_collection(&entry.path(), id.clone())?;
        debug!(
            collection = %id,
            questions = collection.questions.len(),
            "loaded collection"
        );
        collections.insert(id, collection);
    }
    Ok(collections)
}

fn load_collection(dir: &Path, id: String) -> Result<Collection, SwarmError> {
    let mut questions = BTreeMap::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let question_id = entry.file_name().to_string_lossy().into_owned();
        match load_question(&entry.path(), question_id.clone()) {
            Ok(Some(question)) => {
                questions.insert(question_id, question);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(collection = %id, question = %question_id, %err, "skipping question folder");
            }
        }
    }
    Ok(Collection { id, questions })
}

fn load_question(dir: &Path, id: String) -> Result<Option<Question>, SwarmError> {
    let info_path = dir.join("info.json");
    if !info_path.is_file() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(info_path)?;
    let info: QuestionInfo = serde_json::from_str(&raw)?;
    Ok(Some(Question {
        id,
        prompt: info.question,
        answers: info.answers,
    }))
}
