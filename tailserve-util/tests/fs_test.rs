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

use pretty_assertions::assert_eq;
use tailserve_error::{Code, ResultExt};
use tailserve_macro::tailserve_test;
use tailserve_util::fs;
use tokio::io::AsyncWriteExt;

#[tailserve_test]
async fn create_file_truncates_existing_content() -> Result<(), Box<dyn core::error::Error>> {
    let temp_dir = tempfile::tempdir()?;
    let path = temp_dir.path().join("target");
    std::fs::write(&path, b"old content that is long")?;

    let mut file = fs::create_file(&path).await?;
    file.write_all(b"new").await?;
    file.flush().await?;
    drop(file);

    assert_eq!(std::fs::read(&path)?, b"new");
    Ok(())
}

#[tailserve_test]
async fn read_at_reads_from_offset_and_reports_short_reads()
-> Result<(), Box<dyn core::error::Error>> {
    let temp_dir = tempfile::tempdir()?;
    let path = temp_dir.path().join("data");
    std::fs::write(&path, b"0123456789")?;

    let mut file = fs::open_file(&path).await?;
    let mut buf = [0u8; 4];
    assert_eq!(file.read_at(2, &mut buf).await?, 4);
    assert_eq!(&buf, b"2345");

    // Asking for one byte past the end comes back short.
    let mut buf = [0u8; 5];
    assert_eq!(file.read_at(6, &mut buf).await?, 4);
    assert_eq!(&buf[..4], b"6789");

    assert_eq!(file.read_at(10, &mut buf).await?, 0);
    assert_eq!(file.current_size().await?, 10);
    Ok(())
}

#[tailserve_test]
async fn reader_sees_bytes_flushed_by_separate_writer() -> Result<(), Box<dyn core::error::Error>>
{
    let temp_dir = tempfile::tempdir()?;
    let path = temp_dir.path().join("growing");

    let mut writer = fs::create_file(&path).await?;
    let mut reader = fs::open_file(&path).await?;
    let mut buf = [0u8; 8];
    assert_eq!(reader.read_at(0, &mut buf).await?, 0);

    writer.write_all(b"abc").await?;
    writer.flush().await?;
    assert_eq!(reader.read_at(0, &mut buf).await?, 3);
    assert_eq!(&buf[..3], b"abc");

    writer.write_all(b"def").await?;
    writer.flush().await?;
    assert_eq!(reader.read_at(3, &mut buf).await?, 3);
    assert_eq!(&buf[..3], b"def");
    Ok(())
}

#[tailserve_test]
async fn open_missing_file_is_not_found() -> Result<(), Box<dyn core::error::Error>> {
    let temp_dir = tempfile::tempdir()?;
    let err = fs::open_file(temp_dir.path().join("missing"))
        .await
        .err_tip(|| "In open_missing_file_is_not_found")
        .unwrap_err();
    assert_eq!(err.code, Code::NotFound);
    Ok(())
}

#[tailserve_test]
async fn remove_file_and_metadata() -> Result<(), Box<dyn core::error::Error>> {
    let temp_dir = tempfile::tempdir()?;
    let path = temp_dir.path().join("doomed");
    std::fs::write(&path, b"x")?;
    assert!(fs::metadata(&path).await?.is_file());

    fs::remove_file(&path).await?;
    assert_eq!(fs::metadata(&path).await.unwrap_err().code, Code::NotFound);
    Ok(())
}
