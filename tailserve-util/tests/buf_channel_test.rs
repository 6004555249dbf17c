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

use bytes::Bytes;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use tailserve_error::{Code, Error};
use tailserve_macro::tailserve_test;
use tailserve_util::buf_channel::make_buf_channel_pair;
use tokio::try_join;

const DATA1: &str = "foo";
const DATA2: &str = "bar";

#[tailserve_test]
async fn smoke_test() -> Result<(), Error> {
    let (mut tx, mut rx) = make_buf_channel_pair();
    tx.send(DATA1.into()).await?;
    tx.send(DATA2.into()).await?;
    assert_eq!(rx.recv().await?, DATA1);
    assert_eq!(rx.recv().await?, DATA2);
    Ok(())
}

#[tailserve_test]
async fn empty_send_is_rejected_test() -> Result<(), Error> {
    let (mut tx, _rx) = make_buf_channel_pair();
    let err = tx.send(Bytes::new()).await.unwrap_err();
    assert_eq!(err.code, Code::InvalidArgument);
    // The channel is still usable.
    tx.send(DATA1.into()).await?;
    assert!(!tx.is_pipe_broken());
    Ok(())
}

#[tailserve_test]
async fn sending_eof_sets_pipe_broken_test() -> Result<(), Error> {
    let (mut tx, mut rx) = make_buf_channel_pair();
    let tx_fut = async move {
        tx.send(DATA1.into()).await?;
        assert!(!tx.is_pipe_broken());
        tx.send_eof()?;
        assert!(tx.is_pipe_broken());
        Result::<(), Error>::Ok(())
    };
    let rx_fut = async move {
        assert_eq!(rx.recv().await?, Bytes::from(DATA1));
        assert_eq!(rx.recv().await?, Bytes::new());
        Result::<(), Error>::Ok(())
    };
    try_join!(tx_fut, rx_fut)?;
    Ok(())
}

#[tailserve_test]
async fn sender_dropped_without_eof_is_an_error_test() -> Result<(), Error> {
    let (mut tx, mut rx) = make_buf_channel_pair();
    tx.send(DATA1.into()).await?;
    drop(tx);
    assert_eq!(rx.recv().await?, DATA1);
    let err = rx.recv().await.unwrap_err();
    assert_eq!(err.code, Code::Internal);
    Ok(())
}

#[tailserve_test]
async fn send_fails_once_receiver_is_dropped_test() -> Result<(), Error> {
    let (mut tx, rx) = make_buf_channel_pair();
    drop(rx);
    let err = tx.send(DATA1.into()).await.unwrap_err();
    assert_eq!(err.code, Code::Internal);
    assert!(tx.is_pipe_broken());
    Ok(())
}

#[tailserve_test]
async fn stream_ends_cleanly_after_eof_test() -> Result<(), Error> {
    let (mut tx, mut rx) = make_buf_channel_pair();
    tx.send(DATA1.into()).await?;
    tx.send_eof()?;
    assert_eq!(rx.next().await.unwrap().unwrap(), Bytes::from(DATA1));
    assert!(rx.next().await.is_none());
    Ok(())
}

#[tailserve_test]
async fn stream_reports_error_without_eof_test() -> Result<(), Error> {
    let (mut tx, mut rx) = make_buf_channel_pair();
    tx.send(DATA1.into()).await?;
    drop(tx);
    assert_eq!(rx.next().await.unwrap().unwrap(), Bytes::from(DATA1));
    assert!(rx.next().await.unwrap().is_err());
    Ok(())
}
