use std::sync::Arc;

use tracing::{debug, info};

use crate::model::RepoRef;
use crate::traits::{DirectoryLister, ListingError};

/// Lists candidate scan files: plain files ending in the configured suffix.
#[derive(Clone)]
pub struct FileLister {
    lister: Arc<dyn DirectoryLister>,
    suffix: String,
}

impl FileLister {
    pub fn new(lister: Arc<dyn DirectoryLister>, suffix: impl Into<String>) -> Self {
        Self {
            lister,
            suffix: suffix.into(),
        }
    }

    /// # Errors
    ///
    /// Propagates [`ListingError`] unchanged; the caller treats it as fatal.
    pub async fn candidates(&self, repo: &RepoRef) -> Result<Vec<String>, ListingError> {
        let entries = self.lister.list(repo).await?;
        let total = entries.len();

        let files: Vec<String> = entries
            .into_iter()
            .filter(|entry| {
                let keep = entry.is_candidate(&self.suffix);
                if !keep {
                    debug!(name = %entry.name, kind = ?entry.kind, "Ignoring listing entry");
                }
                keep
            })
            .map(|entry| entry.name)
            .collect();

        info!(repo = %repo, entries = total, candidates = files.len(), "Listed repository files");
        Ok(files)
    }
}
