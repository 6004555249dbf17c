// Copyright 2023 The NativeLink Authors. All rights reserved.
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
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::{Context, Poll};
use std::sync::Arc;

use bytes::Bytes;
use futures::{Future, Stream};
use tailserve_error::{Code, Error, error_if, make_err, make_input_err};
use tokio::sync::mpsc;

/// Create a channel pair that can be used to transport buffer objects around to
/// different components. The writer half is what a producer "flushes" chunks
/// into; the reader half is handed to the HTTP layer as a response body.
/// If the writer is dropped without calling `send_eof()` the reader reports an
/// error instead of a clean end of stream, so a truncated transfer is never
/// mistaken for a complete one.
#[must_use]
pub fn make_buf_channel_pair() -> (DropCloserWriteHalf, DropCloserReadHalf) {
    // We allow up to 2 items in the buffer at any given time. There is no major
    // reason behind this magic number other than thinking it will be nice to give
    // a little time for another thread to wake up and consume data if another
    // thread is pumping large amounts of data into the channel.
    let (tx, rx) = mpsc::channel(2);
    let eof_sent = Arc::new(AtomicBool::new(false));
    (
        DropCloserWriteHalf {
            tx: Some(tx),
            eof_sent: eof_sent.clone(),
        },
        DropCloserReadHalf { rx, eof_sent },
    )
}

/// Writer half of the pair.
#[derive(Debug)]
pub struct DropCloserWriteHalf {
    tx: Option<mpsc::Sender<Bytes>>,
    eof_sent: Arc<AtomicBool>,
}

impl DropCloserWriteHalf {
    /// Sends data over the channel to the receiver. Resolves once the chunk
    /// has been handed to the receiver's queue; fails if the receiver is gone.
    pub async fn send(&mut self, buf: Bytes) -> Result<(), Error> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| make_err!(Code::Internal, "Tried to send while stream is closed"))?;
        if buf.is_empty() {
            return Err(make_input_err!(
                "Cannot send EOF in send(). Instead use send_eof()"
            ));
        }
        if tx.send(buf).await.is_err() {
            // Close our channel.
            self.tx = None;
            return Err(make_err!(
                Code::Internal,
                "Failed to write to data, receiver disconnected"
            ));
        }
        Ok(())
    }

    /// Sends an EOF (End of File) message to the receiver which will gracefully let the
    /// stream know it has no more data. This will close the stream.
    pub fn send_eof(&mut self) -> Result<(), Error> {
        error_if!(
            self.tx.is_none(),
            "Tried to send an EOF when pipe is broken"
        );
        // Flag that we have sent the EOF.
        self.eof_sent.store(true, Ordering::Release);

        // Now close our stream.
        self.tx = None;
        Ok(())
    }

    /// Returns true once the receiver went away or EOF was sent.
    #[must_use]
    pub const fn is_pipe_broken(&self) -> bool {
        self.tx.is_none()
    }
}

/// Reader half of the pair.
#[derive(Debug)]
pub struct DropCloserReadHalf {
    rx: mpsc::Receiver<Bytes>,
    eof_sent: Arc<AtomicBool>,
}

impl DropCloserReadHalf {
    /// Receive a chunk of data. An empty chunk means EOF.
    pub async fn recv(&mut self) -> Result<Bytes, Error> {
        match self.rx.recv().await {
            Some(chunk) => Ok(chunk),
            // None is a safe EOF received.
            None => {
                if !self.eof_sent.load(Ordering::Acquire) {
                    return Err(make_err!(
                        Code::Internal,
                        "EOF received before sending EOF; sender was probably dropped"
                    ));
                }
                Ok(Bytes::new())
            }
        }
    }
}

impl Stream for DropCloserReadHalf {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // `mpsc::Receiver::recv()` is cancel safe, so recreating the future on
        // every poll never loses a chunk.
        Box::pin(self.recv())
            .as_mut()
            .poll(cx)
            .map(|result| match result {
                Ok(bytes) => {
                    if bytes.is_empty() {
                        return None;
                    }
                    Some(Ok(bytes))
                }
                Err(e) => Some(Err(e.to_std_err())),
            })
    }
}
