// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use argh::FromArgs;
use getset::{CopyGetters, Getters};
use linkband_core::config::DataFormat;
use linkband_engine::{LinkBandEngine, LinkBandEngineError, options::EngineOptions};
use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};
use tracing::{Level, info};
use tracing_subscriber::{
  filter::{EnvFilter, LevelFilter},
  layer::SubscriberExt,
  util::SubscriberInitExt,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 2;
const EXIT_BLUETOOTH: i32 = 3;
const EXIT_INTERRUPTED: i32 = 130;

/// Link Band acquisition server.
///
/// Configuration comes from LINKBAND_* environment variables; the flags
/// below override the environment.
#[derive(FromArgs, Getters, CopyGetters)]
pub struct LinkBandCliArguments {
  /// print version and exit.
  #[argh(switch)]
  #[getset(get_copy = "pub")]
  version: bool,

  /// interface for the WebSocket stream bus (default 127.0.0.1).
  #[argh(option)]
  #[getset(get = "pub")]
  ws_host: Option<String>,

  /// port for the WebSocket stream bus (default 18765).
  #[argh(option)]
  #[getset(get_copy = "pub")]
  ws_port: Option<u16>,

  /// root directory for recorded sessions.
  #[argh(option)]
  #[getset(get = "pub")]
  data_root: Option<String>,

  /// session file format: json_lines or csv.
  #[argh(option)]
  #[getset(get = "pub")]
  data_format: Option<String>,

  /// set log level for output.
  #[argh(option)]
  #[getset(get_copy = "pub")]
  log: Option<Level>,
}

fn setup_console_logging(log_level: Option<Level>) {
  if log_level.is_some() {
    tracing_subscriber::registry()
      .with(tracing_subscriber::fmt::layer())
      .with(LevelFilter::from(log_level))
      .try_init()
      .unwrap();
  } else {
    tracing_subscriber::registry()
      .with(tracing_subscriber::fmt::layer())
      .with(
        EnvFilter::try_from_default_env()
          .or_else(|_| EnvFilter::try_new("info"))
          .unwrap(),
      )
      .try_init()
      .unwrap();
  }
}

fn build_options(args: &LinkBandCliArguments) -> Result<EngineOptions, LinkBandEngineError> {
  let mut options = EngineOptions::from_env()?;
  if let Some(host) = args.ws_host() {
    options.set_ws_host(host.clone());
  }
  if let Some(port) = args.ws_port() {
    options.set_ws_port(port);
  }
  if let Some(root) = args.data_root() {
    options.set_data_root(root.clone());
  }
  if let Some(format) = args.data_format() {
    let format = format
      .parse::<DataFormat>()
      .map_err(LinkBandEngineError::InvalidConfig)?;
    options.set_data_format(format);
  }
  Ok(options)
}

#[tokio::main]
async fn main() {
  let args: LinkBandCliArguments = argh::from_env();
  if args.version() {
    println!("Link Band Engine {VERSION}");
    std::process::exit(EXIT_OK);
  }

  setup_console_logging(args.log());

  let options = match build_options(&args) {
    Ok(options) => options,
    Err(err) => {
      eprintln!("Configuration error: {err}");
      std::process::exit(EXIT_CONFIG);
    }
  };

  let engine = Arc::new(LinkBandEngine::default());
  let interrupted = Arc::new(AtomicBool::new(false));
  {
    let engine = engine.clone();
    let interrupted = interrupted.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        info!("Interrupt received, shutting down");
        interrupted.store(true, Ordering::Relaxed);
        engine.stop();
      }
    });
  }

  // run() observes the stop token and finishes its graceful shutdown
  // sequence before returning.
  let result = engine.run(&options).await;

  let code = match result {
    Ok(()) => {
      if interrupted.load(Ordering::Relaxed) {
        EXIT_INTERRUPTED
      } else {
        EXIT_OK
      }
    }
    Err(LinkBandEngineError::InvalidConfig(err)) => {
      eprintln!("Configuration error: {err}");
      EXIT_CONFIG
    }
    Err(LinkBandEngineError::BluetoothUnavailable) => {
      eprintln!("Bluetooth adapter unavailable");
      EXIT_BLUETOOTH
    }
    Err(LinkBandEngineError::Startup(err)) => {
      eprintln!("Startup failed: {err}");
      EXIT_CONFIG
    }
  };
  std::process::exit(code);
}
