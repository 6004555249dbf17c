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

use core::pin::Pin;
use core::task::{Context, Poll};
use core::time::Duration;
use std::path::Path;

use bytes::Bytes;
use futures::Stream;
use tailserve_error::{Code, Error, ResultExt, make_err};
use tailserve_util::buf_channel::{DropCloserReadHalf, DropCloserWriteHalf};
use tailserve_util::fs::{self, FileSlot};
use tailserve_util::upload_registry::UploadRegistry;
use tokio::io::{AsyncReadExt, Take};
use tokio_util::io::ReaderStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct TailOptions {
    /// Most bytes read from disk and sent downstream per iteration.
    pub max_read_chunk_size: usize,
    /// How long to wait before polling again once the reader has caught up
    /// with an in-flight upload. Zero only yields to the scheduler.
    pub poll_interval: Duration,
}

/// A file with no upload in flight, opened for a single front-to-back read.
/// The stream never yields more than `size` bytes, even if the file grows.
#[derive(Debug)]
pub struct CompleteFile {
    pub size: u64,
    pub stream: ReaderStream<Take<FileSlot>>,
}

/// Opens `path` for a plain whole-file transfer. Only valid when no upload
/// owns the path, since the returned stream stops at the first end of file.
pub async fn serve_complete(path: &Path, max_read_chunk_size: usize) -> Result<CompleteFile, Error> {
    let file = fs::open_file(path)
        .await
        .err_tip_with_code(|_| (Code::Internal, format!("Could not open {path:?} for download")))?;
    let size = file
        .current_size()
        .await
        .err_tip_with_code(|_| (Code::Internal, format!("Could not stat {path:?}")))?;
    Ok(CompleteFile {
        size,
        stream: ReaderStream::with_capacity(file.take(size), max_read_chunk_size),
    })
}

/// Streams `path` into `downstream` while an upload may still be appending
/// to it, and returns the number of bytes sent.
///
/// Reads past the last known end of the file are provisional: as long as
/// `upload_registry` shows the path as active, the reader waits for
/// `poll_interval` and tries again. Once the upload is gone the remaining
/// bytes are drained and EOF is sent downstream.
///
/// Cancellation ends the stream without error and without EOF; nobody is
/// listening any more. A failed send means the receiver went away and is
/// returned as an error with `downstream.is_pipe_broken()` set.
pub async fn stream_file(
    upload_registry: &UploadRegistry,
    path: &Path,
    downstream: &mut DropCloserWriteHalf,
    cancel: &CancellationToken,
    options: TailOptions,
) -> Result<u64, Error> {
    let mut file = fs::open_file(path)
        .await
        .err_tip_with_code(|_| (Code::Internal, format!("Could not open {path:?} for tailing")))?;
    let mut buffer = vec![0u8; options.max_read_chunk_size];
    let mut offset: u64 = 0;
    // Set once the registry no longer lists the path. Every byte the writer
    // produced is on disk by then, so the next end of file is final.
    let mut upload_finished = false;

    loop {
        if cancel.is_cancelled() {
            debug!(?path, offset, "Download cancelled");
            return Ok(offset);
        }

        let size = file
            .current_size()
            .await
            .err_tip_with_code(|_| (Code::Internal, format!("Could not stat {path:?}")))?;
        if size < offset {
            return Err(make_err!(
                Code::Internal,
                "{path:?} shrank from {offset} to {size} bytes while being streamed"
            ));
        }
        // Ask for one byte more than the file is known to hold, so a read that
        // comes back short is what tells us we reached the end.
        let window = usize::try_from(size - offset)
            .map_or(usize::MAX, |remaining| remaining.saturating_add(1))
            .min(options.max_read_chunk_size);
        let read = file
            .read_at(offset, &mut buffer[..window])
            .await
            .err_tip_with_code(|_| {
                (Code::Internal, format!("Could not read {path:?} at offset {offset}"))
            })?;

        if read > 0 {
            offset += read as u64;
            downstream
                .send(Bytes::copy_from_slice(&buffer[..read]))
                .await
                .err_tip(|| format!("Sending {path:?} downstream"))?;
        }
        if read == window {
            continue;
        }

        if upload_finished {
            downstream
                .send_eof()
                .err_tip(|| format!("Sending EOF for {path:?}"))?;
            return Ok(offset);
        }
        if upload_registry.is_active(path) {
            wait_for_more_data(options.poll_interval, cancel).await;
        } else {
            upload_finished = true;
        }
    }
}

async fn wait_for_more_data(poll_interval: Duration, cancel: &CancellationToken) {
    if poll_interval.is_zero() {
        tokio::task::yield_now().await;
        return;
    }
    tokio::select! {
        () = cancel.cancelled() => {},
        () = tokio::time::sleep(poll_interval) => {},
    }
}

/// Response body of a tailing download. Dropping it, which the HTTP server
/// does once the client disconnects, cancels the token the producing
/// `stream_file()` loop checks.
#[derive(Debug)]
pub struct TailBody {
    reader: DropCloserReadHalf,
    _cancel_on_drop: DropGuard,
}

impl TailBody {
    pub fn new(reader: DropCloserReadHalf, cancel: CancellationToken) -> Self {
        Self {
            reader,
            _cancel_on_drop: cancel.drop_guard(),
        }
    }
}

impl Stream for TailBody {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.reader).poll_next(cx)
    }
}
