// Copyright 2024 The NativeLink Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use core::time::Duration;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use chrono::{Local, SecondsFormat};
use percent_encoding::percent_decode_str;
use tailserve_config::server::FileServiceConfig;
use tailserve_error::{Code, Error, ResultExt, make_err, make_input_err};
use tailserve_util::background_spawn;
use tailserve_util::buf_channel::make_buf_channel_pair;
use tailserve_util::fs;
use tailserve_util::upload_registry::UploadRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::download::{TailBody, TailOptions, serve_complete, stream_file};
use crate::upload::handle_upload;

const DEFAULT_MAX_UPLOAD_CHUNK_SIZE: usize = 2 * 1024 * 1024;
const DEFAULT_MAX_DOWNLOAD_CHUNK_SIZE: usize = 1024 * 1024;
const DEFAULT_TAIL_POLL_INTERVAL_MS: u64 = 5;

const CORS_ALLOW_ORIGIN: &str = "*";
const CORS_ALLOW_METHODS: &str = "GET,HEAD,OPTIONS";
const CORS_ALLOW_HEADERS: &str = "Origin,Range,Accept-Encoding,Referer";

/// Serves the files under one root directory over HTTP. Uploads, downloads
/// and deletes of the same resource path are coordinated through a single
/// `UploadRegistry`.
#[derive(Debug)]
pub struct FileServer {
    root_directory: PathBuf,
    upload_registry: UploadRegistry,
    max_upload_chunk_size: usize,
    max_download_chunk_size: usize,
    tail_poll_interval: Duration,
}

impl FileServer {
    pub fn new(config: &FileServiceConfig) -> Result<Self, Error> {
        let root_directory = if config.root_directory.is_empty() {
            std::env::current_dir().err_tip(|| "Could not resolve the current directory")?
        } else {
            PathBuf::from(&config.root_directory)
        };
        let max_upload_chunk_size = if config.max_upload_chunk_size == 0 {
            DEFAULT_MAX_UPLOAD_CHUNK_SIZE
        } else {
            config.max_upload_chunk_size
        };
        let max_download_chunk_size = if config.max_download_chunk_size == 0 {
            DEFAULT_MAX_DOWNLOAD_CHUNK_SIZE
        } else {
            config.max_download_chunk_size
        };
        let tail_poll_interval_ms = if config.tail_poll_interval_ms == 0 {
            DEFAULT_TAIL_POLL_INTERVAL_MS
        } else {
            config.tail_poll_interval_ms
        };
        Ok(Self {
            root_directory,
            upload_registry: UploadRegistry::new(),
            max_upload_chunk_size,
            max_download_chunk_size,
            tail_poll_interval: Duration::from_millis(tail_poll_interval_ms),
        })
    }

    /// Overrides the wait between polls of a growing file. Unlike the config
    /// field, a zero interval is kept and means yield-only polling.
    #[must_use]
    pub fn with_tail_poll_interval(mut self, tail_poll_interval: Duration) -> Self {
        self.tail_poll_interval = tail_poll_interval;
        self
    }

    pub fn root_directory(&self) -> &Path {
        &self.root_directory
    }

    pub const fn upload_registry(&self) -> &UploadRegistry {
        &self.upload_registry
    }

    const fn tail_options(&self) -> TailOptions {
        TailOptions {
            max_read_chunk_size: self.max_download_chunk_size,
            poll_interval: self.tail_poll_interval,
        }
    }

    /// Maps a percent-encoded request path onto a file under the root
    /// directory. Paths that would leave the root are rejected.
    pub fn resolve_path(&self, request_path: &str) -> Result<PathBuf, Error> {
        let decoded = percent_decode_str(request_path)
            .decode_utf8()
            .map_err(|e| make_input_err!("Request path is not valid UTF-8: {e}"))?;
        let mut resolved = self.root_directory.clone();
        let mut depth = 0usize;
        for component in Path::new(decoded.as_ref()).components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                // Only the leading slash of the request path.
                Component::RootDir if depth == 0 => {}
                Component::RootDir | Component::ParentDir | Component::Prefix(_) => {
                    return Err(make_input_err!(
                        "Request path {request_path:?} escapes the root directory"
                    ));
                }
            }
        }
        if depth == 0 {
            return Err(make_input_err!("Request path {request_path:?} names no file"));
        }
        Ok(resolved)
    }

    /// True when `path` is an existing regular file. Directories do not count.
    pub async fn exists(&self, path: &Path) -> bool {
        fs::metadata(path)
            .await
            .is_ok_and(|metadata| !metadata.is_dir())
    }

    pub async fn delete(&self, path: &Path) -> Result<(), Error> {
        if !self.exists(path).await {
            return Err(make_err!(Code::NotFound, "{path:?} does not exist"));
        }
        fs::remove_file(path)
            .await
            .err_tip_with_code(|_| (Code::Internal, format!("Could not delete {path:?}")))?;
        info!(?path, "Deleted file");
        Ok(())
    }

    pub async fn upload(&self, path: &Path, body: Body) -> Result<u64, Error> {
        handle_upload(
            &self.upload_registry,
            path,
            body.into_data_stream(),
            self.max_upload_chunk_size,
        )
        .await
    }

    /// Starts a download of `path`. Files nobody is uploading are sent in a
    /// single pass with a known length. Files still being uploaded are
    /// followed by a background task until the upload finishes or the
    /// response body is dropped.
    pub async fn download(self: &Arc<Self>, path: PathBuf) -> Result<Response, Error> {
        if !self.exists(&path).await {
            return Err(make_err!(Code::NotFound, "{path:?} does not exist"));
        }

        if !self.upload_registry.is_active(&path) {
            let complete = serve_complete(&path, self.max_download_chunk_size).await?;
            return Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, complete.size)
                .body(Body::from_stream(complete.stream))
                .err_tip(|| format!("Building response for {path:?}"));
        }

        let (mut tx, rx) = make_buf_channel_pair();
        let cancel = CancellationToken::new();
        let body = TailBody::new(rx, cancel.clone());
        let server = self.clone();
        background_spawn!(
            "tail_download",
            async move {
                match stream_file(
                    &server.upload_registry,
                    &path,
                    &mut tx,
                    &cancel,
                    server.tail_options(),
                )
                .await
                {
                    Ok(offset) if cancel.is_cancelled() => {
                        debug!(?path, offset, "Tailing download stopped by client");
                    }
                    Ok(offset) => info!(?path, offset, "Tailing download finished"),
                    Err(err) if tx.is_pipe_broken() || cancel.is_cancelled() => {
                        debug!(?path, ?err, "Tailing download stopped by client");
                    }
                    Err(err) => error!(?path, ?err, "Tailing download failed"),
                }
            }
        );
        Response::builder()
            .status(StatusCode::OK)
            .body(Body::from_stream(body))
            .err_tip(|| "Building tailing response")
    }

    pub fn into_router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/time", any(time))
            .fallback(dispatch)
            .with_state(self)
            .layer(middleware::map_response(set_cors_headers))
    }
}

async fn dispatch(State(server): State<Arc<FileServer>>, request: Request) -> Response {
    let method = request.method().clone();
    let request_path = request.uri().path().to_string();
    info!(%method, path = %request_path, "Request");

    let result = match method {
        Method::GET => match server.resolve_path(&request_path) {
            Ok(path) => server.download(path).await,
            Err(err) => Err(err),
        },
        Method::POST => match server.resolve_path(&request_path) {
            Ok(path) => server
                .upload(&path, request.into_body())
                .await
                .map(|_| StatusCode::OK.into_response()),
            Err(err) => Err(err),
        },
        Method::DELETE => match server.resolve_path(&request_path) {
            Ok(path) => server
                .delete(&path)
                .await
                .map(|()| StatusCode::OK.into_response()),
            Err(err) => Err(err),
        },
        Method::OPTIONS => Ok(StatusCode::NO_CONTENT.into_response()),
        _ => Err(make_err!(
            Code::Unimplemented,
            "Method {method} is not supported"
        )),
    };

    result.unwrap_or_else(|err| error_response(&method, &request_path, &err))
}

/// Error messages name server-side paths, so clients only get the status
/// reason. The full error goes to the log.
fn error_response(method: &Method, request_path: &str, err: &Error) -> Response {
    let status = err.status_code();
    if status.is_server_error() {
        error!(%method, path = %request_path, ?err, "Request failed");
    } else {
        debug!(%method, path = %request_path, ?err, "Request rejected");
    }
    (status, status.canonical_reason().unwrap_or_default()).into_response()
}

async fn time() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain")],
        Local::now().to_rfc3339_opts(SecondsFormat::Nanos, false),
    )
}

async fn set_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static(CORS_ALLOW_ORIGIN),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(CORS_ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(CORS_ALLOW_HEADERS),
    );
    response
}
