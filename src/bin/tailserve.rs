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

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use mimalloc::MiMalloc;
use scopeguard::guard;
use tailserve_config::server::TailServeConfig;
use tailserve_error::{Error, ResultExt, make_input_err};
use tailserve_service::file_server::FileServer;
use tailserve_util::fs::{self, set_open_file_limit};
use tailserve_util::task::TaskExecutor;
use tailserve_util::{background_spawn, init_tracing};
use tokio::net::TcpListener;
#[cfg(target_family = "unix")]
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// Note: If the default changes make sure you update the documentation in
// `tailserve-config/src/server.rs`.
const DEFAULT_MAX_OPEN_FILES: usize = 512;

/// HTTP file server that streams files to downloaders while they are still
/// being uploaded.
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    /// Config file to use.
    #[clap(value_parser)]
    config_file: String,
}

async fn inner_main(cfg: TailServeConfig) -> Result<(), Error> {
    let file_server = Arc::new(
        FileServer::new(&cfg.file_service).err_tip(|| "Could not create file server")?,
    );
    fs::create_dir_all(file_server.root_directory())
        .await
        .err_tip(|| "Could not create root directory")?;
    info!(
        root_directory = ?file_server.root_directory(),
        socket_address = %cfg.listener.socket_address,
        "Starting tailserve"
    );

    let socket_addr = cfg
        .listener
        .socket_address
        .parse::<SocketAddr>()
        .map_err(|e| {
            make_input_err!(
                "Invalid address '{}' - {e:?}",
                cfg.listener.socket_address
            )
        })?;
    let tcp_listener = TcpListener::bind(&socket_addr)
        .await
        .err_tip(|| format!("Could not listen on {socket_addr}"))?;
    let http = auto::Builder::new(TaskExecutor::default());
    let svc = file_server.into_router();

    loop {
        match tcp_listener.accept().await {
            Ok((tcp_stream, remote_addr)) => {
                info!(?remote_addr, ?socket_addr, "Client connected");

                // Runs however the connection task ends, including when it is dropped.
                let scope_guard = guard((), move |()| {
                    info!(?remote_addr, ?socket_addr, "Client disconnected");
                });

                let (http, svc) = (http.clone(), svc.clone());
                background_spawn!(
                    name: "http_connection",
                    fut: async move {
                        let _guard = scope_guard;
                        if let Err(err) = http
                            .serve_connection(
                                TokioIo::new(tcp_stream),
                                TowerToHyperService::new(svc),
                            )
                            .await
                        {
                            error!(?err, "Failed running service");
                        }
                    },
                    target: "tailserve::services",
                    ?remote_addr,
                    ?socket_addr
                );
            }
            Err(err) => {
                error!(?err, "Failed to accept tcp connection");
            }
        }
    }
}

fn main() -> Result<(), Box<dyn core::error::Error>> {
    init_tracing()?;

    let args = Args::parse();
    let cfg = TailServeConfig::try_from_json5_file(&args.config_file)?;

    let max_open_files = cfg
        .global
        .map(|global_cfg| global_cfg.max_open_files)
        .filter(|max_open_files| *max_open_files != 0)
        .unwrap_or(DEFAULT_MAX_OPEN_FILES);
    set_open_file_limit(max_open_files);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        // Every open file may tie up a blocking thread.
        .max_blocking_threads(max_open_files * 10)
        .enable_all()
        .build()?;

    runtime.spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(?err, "Failed to listen to SIGINT");
            return;
        }
        eprintln!("User terminated process via SIGINT");
        std::process::exit(130);
    });

    #[cfg(target_family = "unix")]
    runtime.spawn(async move {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                warn!("Process terminated via SIGTERM");
                std::process::exit(143);
            }
            Err(err) => error!(?err, "Failed to listen to SIGTERM"),
        }
    });

    runtime
        .block_on(inner_main(cfg))
        .err_tip(|| "main() function failed")?;
    Ok(())
}
