use crate::domain::{CatalogRepository, DomainError, FileQuery};
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

/// Removes catalog records and the thumbnail files the generator left for them.
/// The media files themselves are never touched.
pub struct DeleteMediaUseCase {
    repo: Arc<dyn CatalogRepository>,
}

impl DeleteMediaUseCase {
    pub fn new(repo: Arc<dyn CatalogRepository>) -> Self {
        Self { repo }
    }

    pub async fn execute(&self, path: &str) -> Result<(), DomainError> {
        let record = self.repo.find_by_path(path)?.ok_or(DomainError::NotFound)?;
        let thumbnail = self.repo.get_thumbnail(&record.id)?;

        self.repo.delete_by_path(path, Some(&record.id))?;

        if let Some(meta) = thumbnail {
            self.remove_thumbnail(&meta.thumbnail_path).await;
        }
        Ok(())
    }

    pub async fn execute_folder(&self, folder_path: &str) -> Result<usize, DomainError> {
        // Look up thumbnails before the records (and their metadata) go away.
        let files = self.repo.query_files(&FileQuery::folder(folder_path, true))?;
        let mut thumbnails = Vec::new();
        for file in &files {
            if let Some(meta) = self.repo.get_thumbnail(&file.id)? {
                thumbnails.push(meta.thumbnail_path);
            }
        }

        let deleted = self.repo.delete_by_folder_prefix(folder_path)?;

        for thumb in &thumbnails {
            self.remove_thumbnail(thumb).await;
        }
        Ok(deleted)
    }

    async fn remove_thumbnail(&self, thumbnail_path: &str) {
        if let Err(e) = fs::remove_file(thumbnail_path).await {
            debug!("Thumbnail {} not removed: {}", thumbnail_path, e);
        }
    }
}
