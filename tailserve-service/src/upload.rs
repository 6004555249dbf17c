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

use core::pin::pin;
use std::path::Path;

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use tailserve_error::{Code, Error, ResultExt, error_if};
use tailserve_util::fs;
use tailserve_util::upload_registry::UploadRegistry;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::info;

/// Writes `body` to `path`, replacing whatever was there, and returns the
/// number of bytes written.
///
/// The path is registered in `upload_registry` before anything touches the
/// disk, so a second upload to the same path fails with `AlreadyExists`
/// without side effects. The registration is released when this function
/// returns, whatever the outcome.
///
/// Every chunk read from `body` is written and flushed before the next read,
/// so a download following the file by offset only ever sees a complete
/// prefix of what was received.
pub async fn handle_upload<S, E>(
    upload_registry: &UploadRegistry,
    path: &Path,
    body: S,
    max_chunk_size: usize,
) -> Result<u64, Error>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<Box<dyn core::error::Error + Send + Sync>>,
{
    error_if!(max_chunk_size == 0, "max_chunk_size must be greater than 0");
    let _upload_guard = upload_registry.begin_upload(path)?;

    let mut file = fs::create_file(path)
        .await
        .err_tip_with_code(|_| (Code::Internal, format!("Could not open {path:?} for upload")))?;

    let mut reader = pin!(StreamReader::new(body.map_err(std::io::Error::other)));
    let mut buffer = vec![0u8; max_chunk_size];
    let mut bytes_written: u64 = 0;
    loop {
        let read = reader.read(&mut buffer).await.err_tip_with_code(|_| {
            (
                Code::Internal,
                format!("Failed to read upload body for {path:?} after {bytes_written} bytes"),
            )
        })?;
        if read == 0 {
            break; // EOF.
        }
        file.write_all(&buffer[..read])
            .await
            .err_tip_with_code(|_| (Code::Internal, format!("Failed to write to {path:?}")))?;
        file.flush()
            .await
            .err_tip_with_code(|_| (Code::Internal, format!("Failed to flush {path:?}")))?;
        bytes_written += read as u64;
    }

    info!(?path, bytes_written, "Upload complete");
    Ok(bytes_written)
}
