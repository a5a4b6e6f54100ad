use crate::domain::{CatalogRepository, DomainError, FileQuery, FileRecord};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct FilesPage {
    pub files: Vec<FileRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
}

pub struct ListFilesUseCase {
    repo: Arc<dyn CatalogRepository>,
}

impl ListFilesUseCase {
    pub fn new(repo: Arc<dyn CatalogRepository>) -> Self {
        Self { repo }
    }

    /// `page` is 1-based. The total is skipped for random sampling, where it
    /// would not describe a stable sequence anyway.
    pub async fn execute(
        &self,
        mut query: FileQuery,
        page: usize,
        page_size: usize,
        favorites_only: bool,
    ) -> Result<FilesPage, DomainError> {
        let page = page.max(1);
        query.limit = Some(page_size);
        // Absurd page numbers land past the end instead of overflowing.
        query.offset = (page - 1).saturating_mul(page_size);

        let files = match (&query.user_id, favorites_only) {
            (Some(user_id), true) => self.repo.query_favorite_files(user_id, &query)?,
            (None, true) => Vec::new(),
            (_, false) => self.repo.query_files(&query)?,
        };

        let total = if query.random || favorites_only {
            None
        } else {
            Some(self.repo.count_files(&query)?)
        };

        Ok(FilesPage { files, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ItemType;
    use crate::infrastructure::{sample_record, SqliteCatalog};

    #[tokio::test]
    async fn test_pages_and_total() {
        let repo = Arc::new(SqliteCatalog::in_memory().unwrap());
        let records: Vec<_> = (0..7)
            .map(|i| sample_record(&format!("l/{}.jpg", i), i))
            .collect();
        repo.batch_insert(&records, true).unwrap();
        let use_case = ListFilesUseCase::new(repo.clone());

        let first = use_case
            .execute(FileQuery::folder("l", false), 1, 5, false)
            .await
            .unwrap();
        assert_eq!(first.files.len(), 5);
        assert_eq!(first.total, Some(7));

        let second = use_case
            .execute(FileQuery::folder("l", false), 2, 5, false)
            .await
            .unwrap();
        assert_eq!(second.files.len(), 2);

        // Page 0 is treated as the first page.
        let zero = use_case
            .execute(FileQuery::folder("l", false), 0, 5, false)
            .await
            .unwrap();
        assert_eq!(zero.files[0].path, first.files[0].path);
    }

    #[tokio::test]
    async fn test_huge_page_number_is_empty() {
        let repo = Arc::new(SqliteCatalog::in_memory().unwrap());
        repo.upsert(&sample_record("l/a.jpg", 1)).unwrap();
        let use_case = ListFilesUseCase::new(repo.clone());

        let page = use_case
            .execute(FileQuery::default(), usize::MAX, 2, false)
            .await
            .unwrap();
        assert!(page.files.is_empty());
        assert_eq!(page.total, Some(1));
    }

    #[tokio::test]
    async fn test_favorites_only_listing() {
        let repo = Arc::new(SqliteCatalog::in_memory().unwrap());
        let record = sample_record("l/fav.jpg", 1);
        repo.batch_insert(&[record.clone(), sample_record("l/other.jpg", 2)], true)
            .unwrap();
        repo.toggle_favorite("alice", &record.id, ItemType::File).unwrap();
        let use_case = ListFilesUseCase::new(repo.clone());

        let query = FileQuery {
            user_id: Some("alice".to_string()),
            ..Default::default()
        };
        let page = use_case.execute(query, 1, 10, true).await.unwrap();
        assert_eq!(page.files.len(), 1);
        assert!(page.files[0].is_favorite);

        let anonymous = use_case
            .execute(FileQuery::default(), 1, 10, true)
            .await
            .unwrap();
        assert!(anonymous.files.is_empty());
    }
}
