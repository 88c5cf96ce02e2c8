//! In-memory collaborators shared by the unit tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use crate::automation::AutomationDriver;
use crate::error::EngineError;
use crate::model::RemoteRecord;
use crate::remote::{FileQuery, RemoteStore, UploadRequest};

struct StoredObject {
    record: RemoteRecord,
    parent: String,
    content: Vec<u8>,
}

#[derive(Default)]
struct StoreState {
    objects: Vec<StoredObject>,
    create_calls: usize,
    last_request: Option<UploadRequest>,
}

/// A remote store keeping objects in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }

    pub fn objects_named(&self, name: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.objects.iter().filter(|o| o.record.name == name).count()
    }

    pub fn content_of(&self, id: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .iter()
            .find(|o| o.record.id == id)
            .map(|o| o.content.clone())
    }

    pub fn last_request(&self) -> Option<UploadRequest> {
        self.state.lock().unwrap().last_request.clone()
    }
}

impl RemoteStore for MemoryStore {
    fn find(&self, query: &FileQuery) -> Result<Option<RemoteRecord>, EngineError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .iter()
            .find(|o| o.record.name == query.name && o.parent == query.parent)
            .map(|o| o.record.clone()))
    }

    fn create(&self, local: &Path, request: &UploadRequest) -> Result<RemoteRecord, EngineError> {
        let content = fs::read(local).map_err(|_| EngineError::SourceNotFound {
            path: local.to_path_buf(),
        })?;
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        let id = format!("obj-{}", state.create_calls);
        let record = RemoteRecord {
            id: id.clone(),
            name: request.name.clone(),
            web_view_link: Some(format!("https://drive.example/file/d/{}/view", id)),
        };
        state.objects.push(StoredObject {
            record: record.clone(),
            parent: request.parent.clone(),
            content,
        });
        state.last_request = Some(request.clone());
        Ok(record)
    }
}

/// Plays the browser: writes a partial file, then renames it to `file_name`.
pub struct FakeBrowser {
    pub file_name: String,
    pub content: Vec<u8>,
    pub triggered: usize,
    pub fail_with: Option<String>,
}

impl FakeBrowser {
    pub fn downloading(file_name: &str, content: &[u8]) -> Self {
        FakeBrowser {
            file_name: file_name.to_string(),
            content: content.to_vec(),
            triggered: 0,
            fail_with: None,
        }
    }
}

impl AutomationDriver for FakeBrowser {
    fn trigger_download(&mut self, download_dir: &Path) -> Result<(), EngineError> {
        self.triggered += 1;
        if let Some(message) = &self.fail_with {
            return Err(EngineError::AutomationFailure {
                message: message.clone(),
            });
        }
        let partial: PathBuf = download_dir.join(format!("{}.crdownload", self.file_name));
        fs::write(&partial, &self.content).unwrap();
        fs::rename(&partial, download_dir.join(&self.file_name)).unwrap();
        Ok(())
    }
}
