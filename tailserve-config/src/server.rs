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

use serde::{Deserialize, Serialize};
use tailserve_error::{Error, ResultExt};

use crate::serde_utils::{convert_numeric_with_shellexpand, convert_string_with_shellexpand};

#[derive(Deserialize, Serialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct HttpListener {
    /// Address to listen on. Example: `127.0.0.1:8080` or `0.0.0.0:80` to
    /// listen on all IPs.
    #[serde(deserialize_with = "convert_string_with_shellexpand")]
    pub socket_address: String,
}

#[derive(Deserialize, Serialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileServiceConfig {
    /// Directory every request path is resolved under. A request for
    /// `/foo/bar.bin` reads and writes `{root_directory}/foo/bar.bin`.
    ///
    /// Default: the current working directory of the process.
    #[serde(default, deserialize_with = "convert_string_with_shellexpand")]
    pub root_directory: String,

    /// Upper bound on the number of bytes read from an upload body and
    /// written to disk in one iteration. Larger values use more memory per
    /// upload but issue fewer writes.
    ///
    /// Default: 2MiB
    #[serde(default, deserialize_with = "convert_numeric_with_shellexpand")]
    pub max_upload_chunk_size: usize,

    /// Upper bound on the number of bytes read from disk and sent to a
    /// downloader in one iteration.
    ///
    /// Default: 1MiB
    #[serde(default, deserialize_with = "convert_numeric_with_shellexpand")]
    pub max_download_chunk_size: usize,

    /// How long a download that has caught up with an in-flight upload waits
    /// before looking for new bytes again. Zero keeps polling and only yields
    /// to the scheduler between reads.
    ///
    /// Default: 5 (milliseconds)
    #[serde(default, deserialize_with = "convert_numeric_with_shellexpand")]
    pub tail_poll_interval_ms: u64,
}

#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Maximum number of files the service keeps open at one time. Uploads
    /// and downloads wait for a free slot once this many files are open.
    /// Note: This value must be greater than 10.
    ///
    /// Default: 512
    #[serde(default, deserialize_with = "convert_numeric_with_shellexpand")]
    pub max_open_files: usize,
}

#[derive(Deserialize, Serialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct TailServeConfig {
    /// Socket the HTTP server listens on.
    pub listener: HttpListener,

    /// Upload, download and delete settings.
    #[serde(default)]
    pub file_service: FileServiceConfig,

    /// Any global configurations that apply to all modules live here.
    pub global: Option<GlobalConfig>,
}

impl TailServeConfig {
    /// # Errors
    ///
    /// Will return `Err` if we can't load the file.
    pub fn try_from_json5_file(config_file: &str) -> Result<Self, Error> {
        let json_contents = std::fs::read_to_string(config_file)
            .err_tip(|| format!("Could not open config file {config_file}"))?;
        Ok(serde_json5::from_str(&json_contents)?)
    }
}
