// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Persistent registry of previously paired devices.
//!
//! The registry is a JSON object keyed by address, rewritten whole through a
//! temp-file-then-rename after every mutation so a crash can never leave a
//! torn file behind. I/O failures are logged and surfaced as booleans; the
//! in-memory set stays consistent regardless.

use linkband_core::sample::DeviceDescriptor;
use std::{
  collections::HashMap,
  fs,
  path::{Path, PathBuf},
  sync::Mutex,
};

pub struct DeviceRegistry {
  path: PathBuf,
  devices: Mutex<HashMap<String, DeviceDescriptor>>,
}

impl DeviceRegistry {
  /// Open (or lazily create) the registry at `path`.
  pub fn open(path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    let devices = match fs::read_to_string(&path) {
      Ok(contents) => match serde_json::from_str::<HashMap<String, DeviceDescriptor>>(&contents) {
        Ok(devices) => {
          info!("Loaded {} registered devices from {:?}", devices.len(), path);
          devices
        }
        Err(err) => {
          error!("Registry file {:?} is corrupt, starting empty: {}", path, err);
          HashMap::new()
        }
      },
      Err(_) => {
        info!("No registry file at {:?}, starting with empty registry", path);
        HashMap::new()
      }
    };
    Self {
      path,
      devices: Mutex::new(devices),
    }
  }

  fn persist(&self, devices: &HashMap<String, DeviceDescriptor>) -> bool {
    let json = match serde_json::to_string_pretty(devices) {
      Ok(json) => json,
      Err(err) => {
        error!("Cannot serialize device registry: {}", err);
        return false;
      }
    };
    let tmp = self.path.with_extension("json.tmp");
    if let Err(err) = fs::write(&tmp, json) {
      error!("Cannot write registry temp file {:?}: {}", tmp, err);
      return false;
    }
    if let Err(err) = fs::rename(&tmp, &self.path) {
      error!("Cannot replace registry file {:?}: {}", self.path, err);
      let _ = fs::remove_file(&tmp);
      return false;
    }
    true
  }

  /// Insert or refresh a device. Returns false only on persistence failure.
  pub fn register(&self, descriptor: DeviceDescriptor) -> bool {
    let mut devices = self.devices.lock().expect("registry mutex poisoned");
    devices.insert(descriptor.address.clone(), descriptor);
    self.persist(&devices)
  }

  /// Remove a device. Returns false if unknown or persistence failed.
  pub fn unregister(&self, address: &str) -> bool {
    let mut devices = self.devices.lock().expect("registry mutex poisoned");
    if devices.remove(address).is_none() {
      return false;
    }
    self.persist(&devices)
  }

  pub fn list(&self) -> Vec<DeviceDescriptor> {
    let mut devices: Vec<_> = self
      .devices
      .lock()
      .expect("registry mutex poisoned")
      .values()
      .cloned()
      .collect();
    devices.sort_by(|a, b| a.address.cmp(&b.address));
    devices
  }

  pub fn is_registered(&self, address: &str) -> bool {
    self
      .devices
      .lock()
      .expect("registry mutex poisoned")
      .contains_key(address)
  }

  pub fn get(&self, address: &str) -> Option<DeviceDescriptor> {
    self
      .devices
      .lock()
      .expect("registry mutex poisoned")
      .get(address)
      .cloned()
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempdir::TempDir;

  fn descriptor(address: &str) -> DeviceDescriptor {
    DeviceDescriptor {
      address: address.to_owned(),
      name: format!("LXB-{address}"),
      last_seen: 1_700_000_000.0,
    }
  }

  #[test]
  fn round_trips_through_disk() {
    let dir = TempDir::new("registry").unwrap();
    let path = dir.path().join("registered_devices.json");

    let registry = DeviceRegistry::open(&path);
    assert!(registry.register(descriptor("AA:01")));
    assert!(registry.register(descriptor("AA:02")));
    assert!(registry.unregister("AA:01"));

    let reloaded = DeviceRegistry::open(&path);
    assert!(!reloaded.is_registered("AA:01"));
    assert!(reloaded.is_registered("AA:02"));
    assert_eq!(reloaded.list().len(), 1);
    assert_eq!(reloaded.get("AA:02").unwrap().name, "LXB-AA:02");
  }

  #[test]
  fn register_then_unregister_restores_file() {
    let dir = TempDir::new("registry").unwrap();
    let path = dir.path().join("registered_devices.json");

    let registry = DeviceRegistry::open(&path);
    registry.register(descriptor("AA:01"));
    let before = fs::read_to_string(&path).unwrap();

    registry.register(descriptor("BB:02"));
    registry.unregister("BB:02");
    let after = fs::read_to_string(&path).unwrap();

    let a: HashMap<String, DeviceDescriptor> = serde_json::from_str(&before).unwrap();
    let b: HashMap<String, DeviceDescriptor> = serde_json::from_str(&after).unwrap();
    assert_eq!(a.len(), b.len());
    assert!(b.contains_key("AA:01"));
  }

  #[test]
  fn unregister_unknown_is_false() {
    let dir = TempDir::new("registry").unwrap();
    let registry = DeviceRegistry::open(dir.path().join("r.json"));
    assert!(!registry.unregister("nope"));
  }

  #[test]
  fn no_temp_file_left_behind() {
    let dir = TempDir::new("registry").unwrap();
    let path = dir.path().join("registered_devices.json");
    let registry = DeviceRegistry::open(&path);
    registry.register(descriptor("AA:01"));
    assert!(path.exists());
    assert!(!path.with_extension("json.tmp").exists());
  }
}
