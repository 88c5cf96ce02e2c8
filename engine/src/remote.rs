//! Remote archival with at-most-once upload per file name.
//!
//! The remote store is consumed through the `RemoteStore` trait. Queries are
//! passed as a structured `FileQuery`; the store implementation is the only
//! place that renders them into its own filter syntax.
//!
//! `RemoteArchivist::ensure_archived` applies the find-then-upload rule. Two
//! overlapping runs can still both miss in `find` and upload the same name
//! twice; that race is accepted and not solved by locking.

use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;
use crate::error::EngineError;
use crate::model::{RemoteRecord, RemoteStatus};

/// Content type used when the extension is unknown.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Exact-name lookup within one folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileQuery {
    pub name: String,
    pub parent: String,
    /// Match objects in the trash too (normally false)
    pub include_trashed: bool,
}

impl FileQuery {
    pub fn named_in(name: &str, parent: &str) -> Self {
        FileQuery {
            name: name.to_string(),
            parent: parent.to_string(),
            include_trashed: false,
        }
    }
}

/// Optional extra metadata attached to an uploaded object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadMetadata {
    pub description: Option<String>,
    pub app_properties: BTreeMap<String, String>,
}

/// Everything a store needs to create an object from a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub name: String,
    pub parent: String,
    pub content_type: String,
    pub metadata: UploadMetadata,
}

/// A credentialed client for one remote store.
pub trait RemoteStore {
    /// Return the first object matching `query`, requesting only its id,
    /// name and link.
    fn find(&self, query: &FileQuery) -> Result<Option<RemoteRecord>, EngineError>;

    /// Stream `local` to the store as described by `request`.
    fn create(&self, local: &Path, request: &UploadRequest) -> Result<RemoteRecord, EngineError>;
}

impl<S: RemoteStore + ?Sized> RemoteStore for &S {
    fn find(&self, query: &FileQuery) -> Result<Option<RemoteRecord>, EngineError> {
        (**self).find(query)
    }

    fn create(&self, local: &Path, request: &UploadRequest) -> Result<RemoteRecord, EngineError> {
        (**self).create(local, request)
    }
}

/// Guess a content type from a file name's extension.
pub fn content_type_for(path: &Path) -> &'static str {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

/// Archives local files into one remote folder.
pub struct RemoteArchivist<S> {
    store: S,
    folder_id: String,
}

impl<S: RemoteStore> RemoteArchivist<S> {
    /// # Errors
    /// `InvalidConfig` if `folder_id` is blank.
    pub fn new(store: S, folder_id: impl Into<String>) -> Result<Self, EngineError> {
        let folder_id = folder_id.into();
        if folder_id.trim().is_empty() {
            return Err(EngineError::invalid_config(
                "drive.folder_id",
                "no destination folder specified (set GDRIVE_FOLDER_ID)",
            ));
        }
        Ok(RemoteArchivist { store, folder_id })
    }

    pub fn folder_id(&self) -> &str {
        &self.folder_id
    }

    /// Look up an object with exactly this name in the configured folder.
    pub fn find(&self, name: &str) -> Result<Option<RemoteRecord>, EngineError> {
        self.store.find(&FileQuery::named_in(name, &self.folder_id))
    }

    /// Upload `local` into the configured folder under its own file name.
    ///
    /// # Errors
    /// `SourceNotFound` if `local` is not an existing file; otherwise whatever
    /// the store reports.
    pub fn upload(&self, local: &Path, metadata: &UploadMetadata) -> Result<RemoteRecord, EngineError> {
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|_| local.is_file())
            .ok_or_else(|| EngineError::SourceNotFound {
                path: local.to_path_buf(),
            })?;

        let request = UploadRequest {
            name,
            parent: self.folder_id.clone(),
            content_type: content_type_for(local).to_string(),
            metadata: metadata.clone(),
        };
        info!(file = %request.name, content_type = %request.content_type, "Uploading");
        self.store.create(local, &request)
    }

    /// Upload `local` unless an object with the same name is already in the
    /// folder.
    pub fn ensure_archived(
        &self,
        local: &Path,
        metadata: &UploadMetadata,
    ) -> Result<RemoteStatus, EngineError> {
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| EngineError::SourceNotFound {
                path: local.to_path_buf(),
            })?;

        if let Some(existing) = self.find(&name)? {
            info!(file = %name, id = %existing.id, "File already exists remotely. Skipping upload.");
            return Ok(RemoteStatus::AlreadyPresent(existing));
        }

        let created = self.upload(local, metadata)?;
        info!(file = %created.name, id = %created.id, "Upload successful");
        Ok(RemoteStatus::Uploaded(created))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use std::fs;

    #[test]
    fn test_content_type_guessing() {
        assert!(content_type_for(Path::new("fw-05.03.2024.xml")).ends_with("/xml"));
        assert_eq!(
            content_type_for(Path::new("FW.XML")),
            content_type_for(Path::new("fw.xml"))
        );
        assert_eq!(content_type_for(Path::new("report.csv")), "text/csv");
        assert_eq!(content_type_for(Path::new("backup.pdf")), "application/pdf");
        assert_eq!(content_type_for(Path::new("page.html")), "text/html");
        assert_eq!(content_type_for(Path::new("state.json")), "application/json");
        assert_eq!(content_type_for(Path::new("backup.unknownext")), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type_for(Path::new("backup")), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_blank_folder_is_rejected() {
        let store = MemoryStore::default();
        let result = RemoteArchivist::new(&store, "  ");
        assert!(matches!(result, Err(EngineError::InvalidConfig { .. })));
    }

    #[test]
    fn test_ensure_archived_uploads_once() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let local = temp_dir.path().join("fw-05.03.2024.xml");
        fs::write(&local, b"<pfsense/>").unwrap();

        let store = MemoryStore::default();
        let archivist = RemoteArchivist::new(&store, "folder-1").expect("Failed to create archivist");

        let first = archivist
            .ensure_archived(&local, &UploadMetadata::default())
            .expect("First archive failed");
        let second = archivist
            .ensure_archived(&local, &UploadMetadata::default())
            .expect("Second archive failed");

        let created = match first {
            RemoteStatus::Uploaded(record) => record,
            other => panic!("Expected upload, got {:?}", other),
        };
        assert_eq!(second, RemoteStatus::AlreadyPresent(created.clone()));
        assert_eq!(store.create_calls(), 1);
        assert_eq!(store.objects_named("fw-05.03.2024.xml"), 1);
        assert_eq!(store.content_of(&created.id).as_deref(), Some(&b"<pfsense/>"[..]));
    }

    #[test]
    fn test_find_is_scoped_to_folder() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let local = temp_dir.path().join("fw-05.03.2024.xml");
        fs::write(&local, b"x").unwrap();

        let store = MemoryStore::default();
        let other = RemoteArchivist::new(&store, "other-folder").unwrap();
        other.upload(&local, &UploadMetadata::default()).expect("Upload failed");

        let archivist = RemoteArchivist::new(&store, "folder-1").unwrap();
        assert!(archivist.find("fw-05.03.2024.xml").unwrap().is_none());
        let status = archivist
            .ensure_archived(&local, &UploadMetadata::default())
            .unwrap();
        assert!(matches!(status, RemoteStatus::Uploaded(_)));
        assert_eq!(store.objects_named("fw-05.03.2024.xml"), 2);
    }

    #[test]
    fn test_names_with_quotes_match_exactly() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let local = temp_dir.path().join("o'brien-05.03.2024.xml");
        fs::write(&local, b"x").unwrap();

        let store = MemoryStore::default();
        let archivist = RemoteArchivist::new(&store, "folder-1").unwrap();
        archivist.ensure_archived(&local, &UploadMetadata::default()).unwrap();

        assert!(archivist.find("o'brien-05.03.2024.xml").unwrap().is_some());
        assert!(archivist.find("o").unwrap().is_none());
    }

    #[test]
    fn test_upload_declares_content_type_and_metadata() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let local = temp_dir.path().join("fw-05.03.2024.xml");
        fs::write(&local, b"x").unwrap();

        let store = MemoryStore::default();
        let archivist = RemoteArchivist::new(&store, "folder-1").unwrap();
        let metadata = UploadMetadata {
            description: Some("pfSense configuration".to_string()),
            ..UploadMetadata::default()
        };
        archivist.upload(&local, &metadata).unwrap();

        let request = store.last_request().expect("No request recorded");
        assert_eq!(request.content_type, content_type_for(&local));
        assert_ne!(request.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(request.parent, "folder-1");
        assert_eq!(request.metadata, metadata);
    }

    #[test]
    fn test_upload_missing_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = MemoryStore::default();
        let archivist = RemoteArchivist::new(&store, "folder-1").unwrap();

        let result = archivist.upload(&temp_dir.path().join("gone.xml"), &UploadMetadata::default());
        assert!(matches!(result, Err(EngineError::SourceNotFound { .. })));
        assert_eq!(store.create_calls(), 0);
    }
}
