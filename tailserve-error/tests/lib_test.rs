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

use std::io;

use http::StatusCode;
use pretty_assertions::assert_eq;
use tailserve_error::{Code, Error, ResultExt, make_err, make_input_err};

#[test]
fn test_err_tip_keeps_code_and_appends_message() {
    let result: Result<(), io::Error> = Err(io::Error::new(io::ErrorKind::NotFound, "gone"));
    let error = result.err_tip(|| "While opening foo").unwrap_err();
    assert_eq!(error.code, Code::NotFound);
    assert_eq!(
        error.messages,
        vec!["gone".to_string(), "While opening foo".to_string()]
    );
}

#[test]
fn test_err_tip_with_code_overrides_io_code() {
    let result: Result<(), io::Error> = Err(io::Error::new(io::ErrorKind::NotFound, "gone"));
    let error = result
        .err_tip_with_code(|_| (Code::Internal, "Could not create upload target"))
        .unwrap_err();
    assert_eq!(error.code, Code::Internal);
    assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[test]
fn test_io_error_kind_mapping() {
    let error: Error = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
    assert_eq!(error.code, Code::Internal);
    let error: Error = io::Error::new(io::ErrorKind::AlreadyExists, "dup").into();
    assert_eq!(error.code, Code::AlreadyExists);
}

#[test]
fn test_to_std_err_round_trips_kind() {
    let std_err = make_err!(Code::NotFound, "missing file").to_std_err();
    assert_eq!(std_err.kind(), io::ErrorKind::NotFound);
    assert_eq!(std_err.to_string(), "missing file");
}

#[test]
fn test_status_code_mapping() {
    assert_eq!(StatusCode::from(Code::NotFound), StatusCode::NOT_FOUND);
    assert_eq!(StatusCode::from(Code::AlreadyExists), StatusCode::CONFLICT);
    assert_eq!(StatusCode::from(Code::InvalidArgument), StatusCode::BAD_REQUEST);
    assert_eq!(
        StatusCode::from(Code::Internal),
        StatusCode::INTERNAL_SERVER_ERROR
    );
    assert_eq!(
        StatusCode::from(Code::PermissionDenied),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[test]
fn test_display_includes_code_and_messages() {
    let error = make_input_err!("bad path").to_string();
    assert_eq!(error, "InvalidArgument: bad path");
    assert_eq!(Error::new(Code::NotFound, String::new()).to_string(), "NotFound");
}

#[test]
fn test_error_if_returns_invalid_argument() {
    fn check(value: usize) -> Result<usize, Error> {
        tailserve_error::error_if!(value == 0, "value must not be zero");
        Ok(value)
    }
    assert_eq!(check(3), Ok(3));
    assert_eq!(check(0).map_err(|e| e.code), Err(Code::InvalidArgument));
}
