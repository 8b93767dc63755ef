//! Persistent named image templates
//!
//! Templates are PNG files under a content root with a JSON metadata index.
//! Names are unique; recapturing an existing name writes a fresh timestamped
//! file and repoints the row while the old file is retained on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use droidherd_core::prelude::*;

use crate::frame::{Frame, Region};

const INDEX_FILENAME: &str = "templates.json";

/// Metadata row for one stored template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateMeta {
    pub id: i64,
    pub name: String,
    pub file_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub created_at: DateTime<Utc>,
}

/// Template store rooted at a content directory.
pub struct TemplateStore {
    root: PathBuf,
    index: RwLock<Vec<TemplateMeta>>,
    cache: RwLock<HashMap<String, Arc<Frame>>>,
}

impl TemplateStore {
    /// Open (or create) a store at `root`, loading the metadata index.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let index_path = root.join(INDEX_FILENAME);
        let index = if index_path.exists() {
            let content = std::fs::read_to_string(&index_path)?;
            serde_json::from_str(&content)
                .map_err(|e| Error::config(format!("invalid template index: {}", e)))?
        } else {
            Vec::new()
        };

        Ok(Self {
            root,
            index: RwLock::new(index),
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All known templates, newest first.
    pub fn list(&self) -> Vec<TemplateMeta> {
        let mut rows = self.index.read().expect("index lock").clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }

    /// Look up a template by name.
    pub fn get(&self, name: &str) -> Option<TemplateMeta> {
        self.index
            .read()
            .expect("index lock")
            .iter()
            .find(|t| t.name == name)
            .cloned()
    }

    /// Crop `region` out of `frame` and persist it under `name`.
    ///
    /// Recapturing an existing name updates the row; the previous file stays
    /// on disk so workflows serialized against it keep resolving.
    pub fn capture(&self, frame: &Frame, name: &str, region: Region) -> Result<TemplateMeta> {
        if name.is_empty() {
            return Err(Error::validation("template name must not be empty"));
        }

        let cropped = frame.crop(region)?;
        let filename = format!("{}_{}.png", name, Utc::now().format("%Y%m%d_%H%M%S"));
        let file_path = self.root.join(&filename);
        std::fs::write(&file_path, cropped.to_png()?)?;

        let meta = {
            let mut index = self.index.write().expect("index lock");
            let captured_at = Utc::now();

            let updated = match index.iter_mut().find(|t| t.name == name) {
                Some(existing) => {
                    existing.file_path = file_path.clone();
                    existing.width = cropped.width();
                    existing.height = cropped.height();
                    existing.created_at = captured_at;
                    existing.clone()
                }
                None => {
                    let id = index.iter().map(|t| t.id).max().unwrap_or(0) + 1;
                    let meta = TemplateMeta {
                        id,
                        name: name.to_string(),
                        file_path: file_path.clone(),
                        width: cropped.width(),
                        height: cropped.height(),
                        created_at: captured_at,
                    };
                    index.push(meta.clone());
                    meta
                }
            };

            self.save_index(&index)?;
            updated
        };

        self.cache.write().expect("cache lock").remove(name);
        info!("Captured template '{}' -> {}", name, file_path.display());
        Ok(meta)
    }

    /// Load a template by name, falling back to treating the reference as a
    /// file path. Decoded frames are cached.
    pub fn load(&self, reference: &str) -> Result<Arc<Frame>> {
        if let Some(cached) = self.cache.read().expect("cache lock").get(reference) {
            return Ok(Arc::clone(cached));
        }

        let path = match self.get(reference) {
            Some(meta) => meta.file_path,
            None => {
                let path = PathBuf::from(reference);
                if !path.exists() {
                    return Err(Error::template_not_found(reference));
                }
                path
            }
        };

        let bytes = std::fs::read(&path)?;
        let frame = Arc::new(Frame::from_png(&bytes)?);

        self.cache
            .write()
            .expect("cache lock")
            .insert(reference.to_string(), Arc::clone(&frame));
        debug!(
            "Loaded template '{}' ({}x{})",
            reference,
            frame.width(),
            frame.height()
        );
        Ok(frame)
    }

    /// True when `reference` resolves to a stored name or an existing file.
    pub fn resolves(&self, reference: &str) -> bool {
        self.get(reference).is_some() || Path::new(reference).exists()
    }

    /// Drop all cached decoded frames.
    pub fn clear_cache(&self) {
        self.cache.write().expect("cache lock").clear();
        debug!("Template cache cleared");
    }

    /// Atomic index write: temp file then rename.
    fn save_index(&self, index: &[TemplateMeta]) -> Result<()> {
        let content = serde_json::to_string_pretty(index)?;
        let temp_path = self.root.join(".templates.json.tmp");
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, self.root.join(INDEX_FILENAME))?;
        Ok(())
    }
}
