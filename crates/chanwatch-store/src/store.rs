use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use chanwatch_core::{AnalysisRecord, Analyzer, Checkpoint, Comment, Post, Source};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Channel-level sync metadata, refreshed after each fetch phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub channel: String,
    pub last_sync: DateTime<Utc>,
    pub items_checked: usize,
    pub new_items: usize,
    pub updated_items: usize,
    pub skipped_items: usize,
    pub total_comments: usize,
    pub new_comments: usize,
}

/// Normalize a channel name for use as a directory name: strip `@`, turn
/// spaces into underscores, keep only alphanumerics, `_` and `-`.
#[must_use]
pub fn normalize_channel(name: &str) -> String {
    name.trim()
        .trim_start_matches('@')
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Durable per-channel storage rooted at `<data_dir>/<source>/<channel>/`.
///
/// Layout: `posts/<id>/post.json` + `posts/<id>/comments.json`,
/// `analysis/<analyzer>.json`, `checkpoint.json`, `channel.json`.
/// Every write goes through a temp file + rename so an interrupted run
/// never leaves a half-written artifact behind.
#[derive(Debug, Clone)]
pub struct ChannelStore {
    source: Source,
    channel: String,
    base: PathBuf,
}

impl ChannelStore {
    /// Open (creating directories as needed) the store for one channel.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory tree cannot be created.
    pub fn open(data_dir: &Path, source: Source, channel: &str) -> Result<Self, StoreError> {
        let channel = normalize_channel(channel);
        let base = data_dir.join(source.as_str()).join(&channel);
        for dir in [base.join("posts"), base.join("analysis")] {
            fs::create_dir_all(&dir).map_err(|e| StoreError::Io {
                path: dir.display().to_string(),
                source: e,
            })?;
        }
        Ok(Self {
            source,
            channel,
            base,
        })
    }

    #[must_use]
    pub fn source(&self) -> Source {
        self.source
    }

    /// Normalized channel name (also the directory name).
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    #[must_use]
    pub fn analysis_dir(&self) -> PathBuf {
        self.base.join("analysis")
    }

    fn post_dir(&self, post_id: &str) -> PathBuf {
        self.base.join("posts").join(post_id)
    }

    #[must_use]
    pub fn post_exists(&self, post_id: &str) -> bool {
        self.post_dir(post_id).is_dir()
    }

    /// Persist a post and its full comment list.
    ///
    /// Comments are written before the post marker so a crash between the
    /// two writes cannot produce a post that silently hides fetched comments.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on IO or serialization failure.
    pub fn save_post(&self, post: &Post, comments: &[Comment]) -> Result<(), StoreError> {
        let dir = self.post_dir(&post.id);
        write_json(&dir.join("comments.json"), &comments)?;
        write_json(&dir.join("post.json"), post)
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] on IO or parse failure.
    pub fn load_post(&self, post_id: &str) -> Result<Option<Post>, StoreError> {
        read_json_opt(&self.post_dir(post_id).join("post.json"))
    }

    /// Comments for a post; empty if the post is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on IO or parse failure.
    pub fn load_comments(&self, post_id: &str) -> Result<Vec<Comment>, StoreError> {
        Ok(read_json_opt(&self.post_dir(post_id).join("comments.json"))?.unwrap_or_default())
    }

    /// Merge newly fetched comments into a post's stored set, deduplicating
    /// by comment id with the first-seen copy winning. Returns how many
    /// comments were actually appended.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on IO or serialization failure.
    pub fn append_comments(&self, post: &Post, new: Vec<Comment>) -> Result<usize, StoreError> {
        let mut all = self.load_comments(&post.id)?;
        let mut seen: HashSet<String> = all.iter().map(|c| c.id.clone()).collect();
        let before = all.len();
        for comment in new {
            if seen.insert(comment.id.clone()) {
                all.push(comment);
            }
        }
        let appended = all.len() - before;
        if appended > 0 || !self.post_exists(&post.id) {
            self.save_post(post, &all)?;
        }
        Ok(appended)
    }

    /// Ids of all stored posts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the posts directory cannot be listed.
    pub fn post_ids(&self) -> Result<Vec<String>, StoreError> {
        let posts_dir = self.base.join("posts");
        let entries = fs::read_dir(&posts_dir).map_err(|e| StoreError::Io {
            path: posts_dir.display().to_string(),
            source: e,
        })?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io {
                path: posts_dir.display().to_string(),
                source: e,
            })?;
            if entry.path().is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] on IO or parse failure.
    pub fn load_all_posts(&self) -> Result<Vec<Post>, StoreError> {
        let mut posts = Vec::new();
        for id in self.post_ids()? {
            if let Some(post) = self.load_post(&id)? {
                posts.push(post);
            }
        }
        Ok(posts)
    }

    /// All comments across all stored posts, in post-id order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on IO or parse failure.
    pub fn load_all_comments(&self) -> Result<Vec<Comment>, StoreError> {
        let mut comments = Vec::new();
        for id in self.post_ids()? {
            comments.extend(self.load_comments(&id)?);
        }
        Ok(comments)
    }

    /// The persisted record map for one analyzer; empty if none yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on IO or parse failure.
    pub fn load_records(
        &self,
        analyzer: Analyzer,
    ) -> Result<BTreeMap<String, AnalysisRecord>, StoreError> {
        let path = self
            .analysis_dir()
            .join(format!("{}.json", analyzer.as_str()));
        Ok(read_json_opt(&path)?.unwrap_or_default())
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] on IO or serialization failure.
    pub fn save_records(
        &self,
        analyzer: Analyzer,
        records: &BTreeMap<String, AnalysisRecord>,
    ) -> Result<(), StoreError> {
        let path = self
            .analysis_dir()
            .join(format!("{}.json", analyzer.as_str()));
        write_json(&path, records)
    }

    /// The channel checkpoint, or a fresh one if none has been written yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on IO or parse failure.
    pub fn load_checkpoint(&self) -> Result<Checkpoint, StoreError> {
        Ok(read_json_opt(&self.base.join("checkpoint.json"))?
            .unwrap_or_else(|| Checkpoint::new(self.source, &self.channel)))
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] on IO or serialization failure.
    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        write_json(&self.base.join("checkpoint.json"), checkpoint)
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] on IO or serialization failure.
    pub fn save_channel_info(&self, info: &ChannelInfo) -> Result<(), StoreError> {
        write_json(&self.base.join("channel.json"), info)
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] on IO or parse failure.
    pub fn load_channel_info(&self) -> Result<Option<ChannelInfo>, StoreError> {
        read_json_opt(&self.base.join("channel.json"))
    }
}

/// Serialize `value` as pretty JSON and move it into place atomically
/// (temp file in the same directory, then rename).
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let io_err = |e: std::io::Error| StoreError::Io {
        path: path.display().to_string(),
        source: e,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Json {
        path: path.display().to_string(),
        source: e,
    })?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}

fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StoreError::Io {
                path: path.display().to_string(),
                source: e,
            })
        }
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| StoreError::Json {
            path: path.display().to_string(),
            source: e,
        })
}
