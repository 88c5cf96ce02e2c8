//! Google Drive v3 implementation of `RemoteStore`.
//!
//! Authentication uses a long-lived OAuth2 refresh token exchanged for
//! short-lived access tokens, which are cached until shortly before they
//! expire. Uploads go through a resumable session and are streamed in
//! fixed-size chunks, so the file is never held in memory as a whole.

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_RANGE, LOCATION, RANGE};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use tracing::debug;
use crate::error::EngineError;
use crate::model::RemoteRecord;
use crate::remote::{FileQuery, RemoteStore, UploadRequest};

pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Upload chunk size. Drive requires multiples of 256 KiB except for the
/// final chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 256 * 1024;

const RECORD_FIELDS: &str = "id,name,webViewLink";
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);
/// Consecutive 308 responses without progress before the upload is abandoned.
const MAX_STALLED_RESUMES: u32 = 3;

/// OAuth2 client credentials plus the long-lived refresh token.
#[derive(Clone)]
pub struct DriveCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl fmt::Debug for DriveCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriveCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Base URLs of the services the client talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveEndpoints {
    pub token_url: String,
    pub api_base: String,
    pub upload_base: String,
}

impl Default for DriveEndpoints {
    fn default() -> Self {
        DriveEndpoints {
            token_url: TOKEN_URL.to_string(),
            api_base: API_BASE.to_string(),
            upload_base: UPLOAD_BASE.to_string(),
        }
    }
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteRecord>,
}

pub struct DriveClient {
    http: Client,
    credentials: DriveCredentials,
    endpoints: DriveEndpoints,
    chunk_size: usize,
    token: Mutex<Option<CachedToken>>,
}

impl DriveClient {
    /// # Errors
    /// `RemoteTransportFailure` if the HTTP client cannot be built.
    pub fn new(credentials: DriveCredentials, timeout: Duration) -> Result<Self, EngineError> {
        let http = Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .user_agent(concat!("cfgbackup/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(DriveClient {
            http,
            credentials,
            endpoints: DriveEndpoints::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            token: Mutex::new(None),
        })
    }

    pub fn with_endpoints(mut self, endpoints: DriveEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn access_token(&self) -> Result<String, EngineError> {
        let mut cached = self
            .token
            .lock()
            .map_err(|_| EngineError::transport("access token cache poisoned"))?;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_EXPIRY_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        debug!(url = %self.endpoints.token_url, "Refreshing access token");
        let response = self
            .http
            .post(&self.endpoints.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", self.credentials.refresh_token.as_str()),
            ])
            .send()?;

        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(classify_token_error(status, &body));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| EngineError::transport(format!("unreadable token response: {}", e)))?;
        let token = CachedToken {
            value: parsed.access_token,
            expires_at: Instant::now() + Duration::from_secs(parsed.expires_in.unwrap_or(3600)),
        };
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    fn start_session(&self, request: &UploadRequest, total: u64) -> Result<String, EngineError> {
        let token = self.access_token()?;
        let response = self
            .http
            .post(format!("{}/files", self.endpoints.upload_base))
            .bearer_auth(token)
            .query(&[
                ("uploadType", "resumable"),
                ("supportsAllDrives", "true"),
                ("fields", RECORD_FIELDS),
            ])
            .header("X-Upload-Content-Type", request.content_type.as_str())
            .header("X-Upload-Content-Length", total.to_string())
            .json(&create_body(request))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_api_error(status, &body, Some(&request.parent)));
        }

        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| EngineError::transport("upload session response had no Location header"))
    }

    fn send_chunks(&self, local: &Path, session: &str, total: u64) -> Result<RemoteRecord, EngineError> {
        let read_error = |e: std::io::Error| EngineError::transport(format!(
            "failed reading {}: {}",
            local.display(),
            e
        ));

        let mut file = File::open(local).map_err(|_| EngineError::SourceNotFound {
            path: local.to_path_buf(),
        })?;
        let mut buffer = vec![0u8; self.chunk_size];
        let mut offset = 0u64;
        let mut stalled = 0u32;

        loop {
            file.seek(SeekFrom::Start(offset)).map_err(read_error)?;
            let len = read_full(&mut file, &mut buffer).map_err(read_error)?;
            let range = content_range(offset, len as u64, total);
            debug!(range = %range, "Uploading chunk");

            let response = self
                .http
                .put(session)
                .bearer_auth(self.access_token()?)
                .header(CONTENT_RANGE, range)
                .body(buffer[..len].to_vec())
                .send()?;

            match response.status() {
                StatusCode::OK | StatusCode::CREATED => return parse_record(response),
                StatusCode::PERMANENT_REDIRECT => {
                    let persisted = response
                        .headers()
                        .get(RANGE)
                        .and_then(|v| v.to_str().ok());
                    let next = next_offset(persisted);
                    if next >= total && total > 0 {
                        return Err(EngineError::transport(
                            "upload session acknowledged every byte but did not finish",
                        ));
                    }
                    if next > offset {
                        stalled = 0;
                    } else {
                        stalled += 1;
                        if stalled >= MAX_STALLED_RESUMES {
                            return Err(EngineError::transport(format!(
                                "upload session made no progress past byte {} of {}",
                                next, total
                            )));
                        }
                    }
                    offset = next;
                }
                status => {
                    let body = response.text().unwrap_or_default();
                    return Err(classify_api_error(status, &body, None));
                }
            }
        }
    }
}

impl RemoteStore for DriveClient {
    fn find(&self, query: &FileQuery) -> Result<Option<RemoteRecord>, EngineError> {
        let token = self.access_token()?;
        let q = render_query(query);
        debug!(q = %q, "Searching Drive");
        let response = self
            .http
            .get(format!("{}/files", self.endpoints.api_base))
            .bearer_auth(token)
            .query(&[
                ("q", q.as_str()),
                ("spaces", "drive"),
                ("fields", "files(id,name,webViewLink)"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
                ("pageSize", "1"),
            ])
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_api_error(status, &body, Some(&query.parent)));
        }
        let list: FileList = response
            .json()
            .map_err(|e| EngineError::transport(format!("unreadable file list: {}", e)))?;
        Ok(list.files.into_iter().next())
    }

    fn create(&self, local: &Path, request: &UploadRequest) -> Result<RemoteRecord, EngineError> {
        let total = std::fs::metadata(local)
            .map_err(|_| EngineError::SourceNotFound {
                path: local.to_path_buf(),
            })?
            .len();
        let session = self.start_session(request, total)?;
        self.send_chunks(local, &session, total)
    }
}

fn parse_record(response: Response) -> Result<RemoteRecord, EngineError> {
    response
        .json::<RemoteRecord>()
        .map_err(|e| EngineError::transport(format!("unreadable upload response: {}", e)))
}

fn create_body(request: &UploadRequest) -> JsonValue {
    let mut body = JsonMap::new();
    body.insert("name".into(), json!(request.name));
    body.insert("parents".into(), json!([request.parent]));
    body.insert("mimeType".into(), json!(request.content_type));
    if let Some(description) = &request.metadata.description {
        body.insert("description".into(), json!(description));
    }
    if !request.metadata.app_properties.is_empty() {
        body.insert("appProperties".into(), json!(request.metadata.app_properties));
    }
    JsonValue::Object(body)
}

/// Render a `FileQuery` in Drive's `q` syntax. String literals are escaped,
/// so names containing quotes cannot change the filter.
pub fn render_query(query: &FileQuery) -> String {
    let mut q = format!(
        "name = '{}' and '{}' in parents",
        escape_literal(&query.name),
        escape_literal(&query.parent)
    );
    if !query.include_trashed {
        q.push_str(" and trashed = false");
    }
    q
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// `Content-Range` header value for a chunk of `len` bytes at `start`.
fn content_range(start: u64, len: u64, total: u64) -> String {
    if len == 0 {
        format!("bytes */{}", total)
    } else {
        format!("bytes {}-{}/{}", start, start + len - 1, total)
    }
}

/// Offset to resume from, given the `Range` header of a 308 response.
fn next_offset(range: Option<&str>) -> u64 {
    range
        .and_then(|r| r.rsplit('-').next())
        .and_then(|last| last.trim().parse::<u64>().ok())
        .map(|last| last + 1)
        .unwrap_or(0)
}

fn read_full(file: &mut File, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match file.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<JsonValue>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.pointer("/error_description"))
                .or_else(|| v.pointer("/error"))
                .and_then(|m| m.as_str().map(str::to_string))
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

/// Map a failed Drive API response to an engine error.
///
/// `folder_id` is given for calls that address the destination folder; a
/// 404 there means the folder is missing or not shared with the account.
fn classify_api_error(status: StatusCode, body: &str, folder_id: Option<&str>) -> EngineError {
    match (status, folder_id) {
        (StatusCode::UNAUTHORIZED, _) => EngineError::RemoteAuthFailure {
            message: api_error_message(body),
        },
        (StatusCode::NOT_FOUND, Some(folder)) => EngineError::RemoteFolderNotFound {
            folder_id: folder.to_string(),
        },
        _ => EngineError::transport(format!(
            "Drive API returned {}: {}",
            status,
            api_error_message(body)
        )),
    }
}

/// Map a failed token refresh to an engine error.
fn classify_token_error(status: StatusCode, body: &str) -> EngineError {
    #[derive(Deserialize)]
    struct OAuthError {
        error: String,
        #[serde(default)]
        error_description: Option<String>,
    }

    match serde_json::from_str::<OAuthError>(body) {
        Ok(err)
            if status == StatusCode::UNAUTHORIZED
                || matches!(
                    err.error.as_str(),
                    "invalid_grant" | "invalid_client" | "unauthorized_client"
                ) =>
        {
            EngineError::RemoteAuthFailure {
                message: match err.error_description {
                    Some(desc) => format!("{} ({})", err.error, desc),
                    None => err.error,
                },
            }
        }
        _ if status == StatusCode::UNAUTHORIZED => EngineError::RemoteAuthFailure {
            message: api_error_message(body),
        },
        _ => EngineError::transport(format!(
            "token endpoint returned {}: {}",
            status,
            api_error_message(body)
        )),
    }
}
