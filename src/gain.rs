//! Gain quantization
//!
//! The host expresses gain as a normalized float in `[0.0, 1.0]`; hardware
//! wants discrete settings. Two laws cover the supported tuners: a fixed
//! step ladder (wideband LNA) and a device-reported table (dongle tuner).
//! Requests outside the normalized range are clamped, never rejected.

/// Fixed-step gain ladder: settings are multiples of `step_db` up to
/// `max_db` inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SteppedGain {
    pub max_db: u32,
    pub step_db: u32,
}

impl SteppedGain {
    /// Maps `normalized` onto the nearest ladder setting, half-way requests
    /// rounding up.
    pub fn quantize(&self, normalized: f32) -> u32 {
        let steps = (self.max_db / self.step_db) as f32;
        let notch = (normalized.clamp(0.0, 1.0) * steps + 0.5) as u32;
        (notch * self.step_db).min(self.max_db)
    }
}

/// Device-reported discrete gain table, in the device's native unit
/// (tenths of a dB for the dongle tuner), ascending.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GainTable {
    entries: Vec<i32>,
}

impl GainTable {
    pub fn new(entries: Vec<i32>) -> Self {
        GainTable { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Denormalizes `normalized` over the table's span and returns the
    /// entry closest to it, earlier entries winning ties. `None` when the
    /// device reported no table.
    pub fn quantize(&self, normalized: f32) -> Option<i32> {
        let first = *self.entries.first()?;
        let last = *self.entries.last()?;
        let span = (last - first) as f32;
        let target = (normalized.clamp(0.0, 1.0) * span + first as f32) as i32;

        let mut nearest = first;
        for &entry in &self.entries {
            if (target - entry).abs() < (target - nearest).abs() {
                nearest = entry;
            }
        }
        Some(nearest)
    }
}
