// Link Band SDK Source Code File - See https://linkband.store for more info.
//
// Copyright 2022-2026 Looxid Labs Inc. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Sensor packet framing and decoding.
//!
//! Every notification packet starts with a 4-byte little-endian device-time
//! anchor in firmware ticks (1 tick = 1 ms), followed by fixed-stride
//! samples:
//!
//! - EEG: 7-byte triplets — status byte, 24-bit signed big-endian ch1,
//!   24-bit signed big-endian ch2. Status bit 0 is ch1 lead-off, bit 1 ch2.
//! - PPG: 6-byte pairs — 24-bit unsigned big-endian red, infrared.
//! - ACC: 6-byte triplets — 16-bit signed little-endian x, y, z raw counts.
//! - Battery: a single level byte, no anchor, clamped to [0, 100].
//!
//! Sample `i` of a packet anchored at `t0` gets
//! `t_device = t0 + i / nominal_rate`. A packet whose anchor regresses more
//! than two sample intervals behind the previous sample is discarded
//! ([DecodeError::ReorderDropped]); a forward jump of more than twice the
//! packet span is logged as a gap but no samples are synthesized.

use byteorder::{ByteOrder, LittleEndian};
use linkband_core::{
  errors::DecodeError,
  sample::{AccSample, BatterySample, EegSample, PpgSample, SensorKind},
};

/// Firmware tick rate of the packet anchor clock.
pub const TICKS_PER_SECOND: f64 = 1000.0;

/// ADC reference voltage, volts.
pub const V_REF: f64 = 4.033;

/// Default EEG front-end gain.
pub const ADC_GAIN: f64 = 12.0;

/// Microvolts per 24-bit ADC count at the default gain.
pub const EEG_UV_PER_COUNT: f64 = V_REF / (ADC_GAIN * ((1 << 23) - 1) as f64) * 1e6;

/// Accelerometer counts per g (±4 g over a signed 16-bit range).
pub const ACC_COUNTS_PER_G: f64 = 8192.0;

const ANCHOR_LEN: usize = 4;
const EEG_STRIDE: usize = 7;
const PPG_STRIDE: usize = 6;
const ACC_STRIDE: usize = 6;

/// Tolerated anchor regression, in sample intervals.
const REORDER_TOLERANCE: f64 = 2.0;

fn read_anchor(packet: &[u8], stride: usize) -> Result<f64, DecodeError> {
  if packet.len() < ANCHOR_LEN + stride {
    return Err(DecodeError::ShortPacket(packet.len()));
  }
  let payload = packet.len() - ANCHOR_LEN;
  if payload % stride != 0 {
    return Err(DecodeError::UnexpectedLength(payload, stride));
  }
  Ok(LittleEndian::read_u32(&packet[..ANCHOR_LEN]) as f64 / TICKS_PER_SECOND)
}

fn sign_extend_24_be(bytes: &[u8]) -> i32 {
  (((bytes[0] as i32) << 24) | ((bytes[1] as i32) << 16) | ((bytes[2] as i32) << 8)) >> 8
}

fn read_u24_be(bytes: &[u8]) -> u32 {
  ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32
}

/// Shared anchor bookkeeping: reorder rejection and gap logging.
struct AnchorTracker {
  sensor: SensorKind,
  last_sample_t: Option<f64>,
}

impl AnchorTracker {
  fn new(sensor: SensorKind) -> Self {
    Self {
      sensor,
      last_sample_t: None,
    }
  }

  /// Validate a packet anchor against the previous packet's last sample.
  fn check(&mut self, anchor: f64, sample_count: usize) -> Result<(), DecodeError> {
    let rate = self.sensor.nominal_rate();
    if let Some(last) = self.last_sample_t {
      if anchor < last - REORDER_TOLERANCE / rate {
        return Err(DecodeError::ReorderDropped);
      }
      let span = sample_count as f64 / rate;
      let expected_next = last + 1.0 / rate;
      if anchor > expected_next + 2.0 * span {
        warn!(
          "{} packet gap: anchor {:.3}s, expected ~{:.3}s ({} samples missing)",
          self.sensor,
          anchor,
          expected_next,
          ((anchor - expected_next) * rate).round() as i64
        );
      }
    }
    self.last_sample_t = Some(anchor + (sample_count.saturating_sub(1)) as f64 / rate);
    Ok(())
  }

  fn reset(&mut self) {
    self.last_sample_t = None;
  }
}

/// Two-channel EEG decoder.
pub struct EegDecoder {
  tracker: AnchorTracker,
  uv_per_count: f64,
}

impl Default for EegDecoder {
  fn default() -> Self {
    Self {
      tracker: AnchorTracker::new(SensorKind::Eeg),
      uv_per_count: EEG_UV_PER_COUNT,
    }
  }
}

impl EegDecoder {
  pub fn decode(&mut self, packet: &[u8]) -> Result<Vec<EegSample>, DecodeError> {
    let anchor = read_anchor(packet, EEG_STRIDE)?;
    let payload = &packet[ANCHOR_LEN..];
    let count = payload.len() / EEG_STRIDE;
    self.tracker.check(anchor, count)?;

    let rate = SensorKind::Eeg.nominal_rate();
    let mut samples = Vec::with_capacity(count);
    for (i, triplet) in payload.chunks_exact(EEG_STRIDE).enumerate() {
      let status = triplet[0];
      samples.push(EegSample {
        t_device: anchor + i as f64 / rate,
        ch1_uv: sign_extend_24_be(&triplet[1..4]) as f64 * self.uv_per_count,
        ch2_uv: sign_extend_24_be(&triplet[4..7]) as f64 * self.uv_per_count,
        leadoff_ch1: status & 0x01 != 0,
        leadoff_ch2: status & 0x02 != 0,
      });
    }
    Ok(samples)
  }

  pub fn reset(&mut self) {
    self.tracker.reset();
  }
}

/// Red/infrared PPG decoder.
pub struct PpgDecoder {
  tracker: AnchorTracker,
}

impl Default for PpgDecoder {
  fn default() -> Self {
    Self {
      tracker: AnchorTracker::new(SensorKind::Ppg),
    }
  }
}

impl PpgDecoder {
  pub fn decode(&mut self, packet: &[u8]) -> Result<Vec<PpgSample>, DecodeError> {
    let anchor = read_anchor(packet, PPG_STRIDE)?;
    let payload = &packet[ANCHOR_LEN..];
    let count = payload.len() / PPG_STRIDE;
    self.tracker.check(anchor, count)?;

    let rate = SensorKind::Ppg.nominal_rate();
    let mut samples = Vec::with_capacity(count);
    for (i, pair) in payload.chunks_exact(PPG_STRIDE).enumerate() {
      samples.push(PpgSample {
        t_device: anchor + i as f64 / rate,
        red: read_u24_be(&pair[0..3]),
        ir: read_u24_be(&pair[3..6]),
      });
    }
    Ok(samples)
  }

  pub fn reset(&mut self) {
    self.tracker.reset();
  }
}

/// 3-axis accelerometer decoder, raw counts scaled to g.
pub struct AccDecoder {
  tracker: AnchorTracker,
}

impl Default for AccDecoder {
  fn default() -> Self {
    Self {
      tracker: AnchorTracker::new(SensorKind::Acc),
    }
  }
}

impl AccDecoder {
  pub fn decode(&mut self, packet: &[u8]) -> Result<Vec<AccSample>, DecodeError> {
    let anchor = read_anchor(packet, ACC_STRIDE)?;
    let payload = &packet[ANCHOR_LEN..];
    let count = payload.len() / ACC_STRIDE;
    self.tracker.check(anchor, count)?;

    let rate = SensorKind::Acc.nominal_rate();
    let mut samples = Vec::with_capacity(count);
    for (i, triplet) in payload.chunks_exact(ACC_STRIDE).enumerate() {
      samples.push(AccSample {
        t_device: anchor + i as f64 / rate,
        x: LittleEndian::read_i16(&triplet[0..2]) as f64 / ACC_COUNTS_PER_G,
        y: LittleEndian::read_i16(&triplet[2..4]) as f64 / ACC_COUNTS_PER_G,
        z: LittleEndian::read_i16(&triplet[4..6]) as f64 / ACC_COUNTS_PER_G,
      });
    }
    Ok(samples)
  }

  pub fn reset(&mut self) {
    self.tracker.reset();
  }
}

/// Battery decoder. The firmware sends a bare level byte at 1 Hz; the
/// device timestamp is taken from the host clock at receive time.
#[derive(Default)]
pub struct BatteryDecoder {}

impl BatteryDecoder {
  pub fn decode(&mut self, packet: &[u8], t_host: f64) -> Result<Vec<BatterySample>, DecodeError> {
    if packet.is_empty() {
      return Err(DecodeError::ShortPacket(0));
    }
    Ok(vec![BatterySample {
      t_device: t_host,
      level_percent: packet[0].min(100),
    }])
  }

  pub fn reset(&mut self) {}
}
