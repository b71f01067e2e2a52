// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Process front-end for the Link Band server.
//!
//! [LinkBandEngine] wires the btleplug hardware manager into a supervisor
//! and runs until stopped; [options] maps `LINKBAND_*` environment
//! variables and CLI overrides onto the server configuration.

#[macro_use]
extern crate log;

pub mod options;

use displaydoc::Display;
use linkband_server::{Supervisor, SupervisorBuilder, supervisor::SupervisorStartError};
use linkband_server_hwmgr_btleplug::BtleplugHardwareManager;
use options::EngineOptions;
use std::sync::Arc;
use thiserror::Error;
use tokio::select;
use tokio_util::sync::CancellationToken;

/// Fatal engine errors, mapped onto process exit codes by the binary.
#[derive(Debug, Error, Display)]
pub enum LinkBandEngineError {
  /// Invalid configuration: {0}
  InvalidConfig(String),
  /// Bluetooth adapter unavailable at startup
  BluetoothUnavailable,
  /// Startup failed: {0}
  Startup(SupervisorStartError),
}

#[derive(Default)]
pub struct LinkBandEngine {
  stop_token: Arc<CancellationToken>,
}

impl LinkBandEngine {
  /// Run the server until `stop` is called or the supervisor exits on its
  /// own. Returns after the graceful shutdown sequence has finished.
  pub async fn run(&self, options: &EngineOptions) -> Result<(), LinkBandEngineError> {
    let config = options.server_config();
    let hardware = Arc::new(BtleplugHardwareManager::new(config.device_name_prefix()));
    if let Err(err) = hardware.probe().await {
      error!("Bluetooth probe failed: {}", err);
      return Err(LinkBandEngineError::BluetoothUnavailable);
    }

    let supervisor: Supervisor = SupervisorBuilder::new(config)
      .hardware_manager(hardware)
      .start()
      .await
      .map_err(LinkBandEngineError::Startup)?;

    info!("Link Band engine running, stream bus at ws://{}", supervisor.bus_addr());
    select! {
      _ = self.stop_token.cancelled() => {
        info!("Stop requested, shutting down");
        supervisor.shutdown().await;
      }
      _ = supervisor.stopped() => {
        info!("Supervisor stopped on its own, exiting");
      }
    }
    Ok(())
  }

  pub fn stop(&self) {
    self.stop_token.cancel();
  }
}
