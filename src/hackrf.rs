//! HackRF Capture Session Module
//!
//! This module adapts a HackRF-family wideband transceiver to the
//! [`CaptureSource`] contract. The vendor driver is reached through the
//! `dynsdr` crate; everything here is session logic: configuration,
//! cached tuning, gain quantization, and the blocking stream call.

use std::sync::{Mutex, MutexGuard, PoisonError};

use dynsdr::BlockSink;
use tracing::{debug, info, warn};

use crate::config;
use crate::convert::SampleLaw;
use crate::error::{Error, Result};
use crate::gain::SteppedGain;
use crate::stream::{CaptureIo, RunFlag, SampleBridge};
use crate::{CaptureSource, SampleSink};

/// Bytes per vendor transfer, fixed by the driver's USB pipeline.
pub const TRANSFER_LEN: usize = dynsdr::hackrf::TRANSFER_LEN;

/// The LNA ladder the normalized gain contract drives: 0 to 40 dB in
/// 8 dB steps.
const LNA_GAIN: SteppedGain = SteppedGain {
    max_db: 40,
    step_db: 8,
};

/**
 * Settings transport for wideband transceivers
 */
///
/// Extends the raw capture transport with the tuning surface the session
/// drives. Implemented below for the runtime-loaded driver handle, and by
/// scripted devices in tests.
pub trait WidebandIo: CaptureIo {
    /// Opens a device, by serial number when one is given.
    fn open(serial: Option<&str>) -> Result<Self>
    where
        Self: Sized;

    fn set_sample_rate(&mut self, hz: u32) -> Result<()>;
    fn set_baseband_filter(&mut self, hz: u32) -> Result<()>;
    fn set_hw_sync(&mut self, enabled: bool) -> Result<()>;
    fn set_amp(&mut self, enabled: bool) -> Result<()>;
    fn set_lna_gain(&mut self, db: u32) -> Result<()>;
    fn set_vga_gain(&mut self, db: u32) -> Result<()>;
    fn set_center_freq(&mut self, hz: u64) -> Result<()>;
}

impl CaptureIo for dynsdr::HackrfHandle {
    fn start_capture(&mut self, sink: BlockSink) -> Result<()> {
        Ok(dynsdr::HackrfHandle::start_capture(self, sink)?)
    }

    fn is_capturing(&self) -> bool {
        dynsdr::HackrfHandle::is_capturing(self)
    }

    fn stop_capture(&mut self) -> Result<()> {
        Ok(dynsdr::HackrfHandle::stop_capture(self)?)
    }
}

impl WidebandIo for dynsdr::HackrfHandle {
    fn open(serial: Option<&str>) -> Result<Self> {
        Ok(dynsdr::HackrfHandle::open(serial)?)
    }

    fn set_sample_rate(&mut self, hz: u32) -> Result<()> {
        Ok(dynsdr::HackrfHandle::set_sample_rate(self, hz as f64)?)
    }

    fn set_baseband_filter(&mut self, hz: u32) -> Result<()> {
        Ok(dynsdr::HackrfHandle::set_baseband_filter(self, hz)?)
    }

    fn set_hw_sync(&mut self, enabled: bool) -> Result<()> {
        Ok(dynsdr::HackrfHandle::set_hw_sync_mode(self, enabled)?)
    }

    fn set_amp(&mut self, enabled: bool) -> Result<()> {
        Ok(dynsdr::HackrfHandle::set_amp_enable(self, enabled)?)
    }

    fn set_lna_gain(&mut self, db: u32) -> Result<()> {
        Ok(dynsdr::HackrfHandle::set_lna_gain(self, db)?)
    }

    fn set_vga_gain(&mut self, db: u32) -> Result<()> {
        Ok(dynsdr::HackrfHandle::set_vga_gain(self, db)?)
    }

    fn set_center_freq(&mut self, hz: u64) -> Result<()> {
        Ok(dynsdr::HackrfHandle::set_freq(self, hz)?)
    }
}

/// Parsed wideband configuration string.
///
/// Recognized keys: `sernum` (device serial), `rate` (Hz), `amp` (on/off
/// RF amplifier), `bw` (baseband filter Hz). Anything else is a parameter
/// error.
#[derive(Debug, Clone, Default, PartialEq)]
struct HackrfParams {
    sernum: Option<String>,
    rate: Option<u32>,
    amp: Option<bool>,
    bw: Option<u32>,
}

impl HackrfParams {
    fn parse(config: &str) -> Result<Self> {
        let mut params = HackrfParams::default();
        for (key, value) in config::pairs(config)? {
            match key {
                "sernum" => params.sernum = Some(value.to_string()),
                "rate" => params.rate = Some(config::parse_u32(key, value)?),
                "amp" => params.amp = Some(config::parse_bool(key, value)?),
                "bw" => params.bw = Some(config::parse_u32(key, value)?),
                _ => return Err(config::unknown_key(key)),
            }
        }
        Ok(params)
    }
}

/// Cached device tuning. Confirmed values only: a field changes after the
/// hardware accepts the setting, never before.
#[derive(Debug, Clone, PartialEq)]
struct Settings {
    rate: u32,
    freq: u32,
    lna_db: u32,
    vga_db: u32,
    amp: bool,
    bw: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            rate: 105_000_000,
            freq: 595_000_000,
            lna_db: 40,
            vga_db: 20,
            amp: false,
            bw: None,
        }
    }
}

#[derive(Debug)]
struct State<D> {
    dev: Option<D>,
    settings: Settings,
    /// Changes whenever the installed device does. The stream teardown
    /// releases the lock around the vendor stop and uses the epoch to
    /// notice a device retired or replaced in the gap.
    epoch: u64,
}

/**
 * HackRF capture session
 */
///
/// One session per device. All methods take `&self`: tuning calls are
/// valid from any thread while another is parked inside
/// [`CaptureSource::start_streaming`], and [`CaptureSource::stop`] is the
/// cross-thread way to end a stream. The device handle lives behind a
/// mutex that is never held while the streaming call is parked, nor while
/// the vendor stop waits out the last delivery.
#[derive(Debug)]
pub struct HackrfSource<D: WidebandIo = dynsdr::HackrfHandle> {
    state: Mutex<State<D>>,
    flag: RunFlag,
}

impl<D: WidebandIo> HackrfSource<D> {
    /// Creates an unopened session with default tuning: 595 MHz center,
    /// 105 Msps, LNA 40 dB, VGA 20 dB, amplifier off.
    pub fn new() -> Self {
        HackrfSource {
            state: Mutex::new(State {
                dev: None,
                settings: Settings::default(),
                epoch: 0,
            }),
            flag: RunFlag::new(),
        }
    }

    /// Builds a session around an already-open transport, applying
    /// `config` as [`CaptureSource::init`] would.
    pub fn with_device(dev: D, config: &str) -> Result<Self> {
        let source = HackrfSource::new();
        let params = HackrfParams::parse(config)?;
        source.install(dev, params)?;
        Ok(source)
    }

    fn lock(&self) -> MutexGuard<'_, State<D>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring-up sequence: rate, optional baseband filter, hardware sync
    /// off, amplifier, VGA, LNA, frequency. The transport is installed
    /// only once every call succeeded; on failure it is dropped, which
    /// closes the device.
    fn install(&self, mut dev: D, params: HackrfParams) -> Result<()> {
        let mut state = self.lock();
        let mut settings = state.settings.clone();
        settings.rate = params.rate.unwrap_or(settings.rate);
        settings.amp = params.amp.unwrap_or(settings.amp);
        settings.bw = params.bw.or(settings.bw);

        dev.set_sample_rate(settings.rate)?;
        if let Some(bw) = settings.bw {
            dev.set_baseband_filter(bw)?;
        }
        dev.set_hw_sync(false)?;
        dev.set_amp(settings.amp)?;
        dev.set_vga_gain(settings.vga_db)?;
        dev.set_lna_gain(settings.lna_db)?;
        dev.set_center_freq(settings.freq as u64)?;

        info!(
            rate = settings.rate,
            freq = settings.freq,
            amp = settings.amp,
            "wideband session ready"
        );
        state.settings = settings;
        state.epoch = state.epoch.wrapping_add(1);
        state.dev = Some(dev);
        Ok(())
    }
}

impl<D: WidebandIo> Default for HackrfSource<D> {
    fn default() -> Self {
        HackrfSource::new()
    }
}

impl<D: WidebandIo> CaptureSource for HackrfSource<D> {
    fn name(&self) -> &'static str {
        "HackRF Compatible Plugin"
    }

    fn init(&self, config: &str) -> Result<()> {
        if self.flag.is_up() {
            return Err(Error::device("cannot re-init while streaming"));
        }
        let params = HackrfParams::parse(config)?;
        let dev = D::open(params.sernum.as_deref())?;
        self.install(dev, params)
    }

    /// Rate changes are refused silently while streaming: the call
    /// returns the rate the stream is running at. Before `init` the
    /// request is only cached, to be applied at bring-up.
    fn set_sample_rate(&self, rate: u32) -> Result<u32> {
        let mut state = self.lock();
        if self.flag.is_up() {
            debug!(requested = rate, "rate change ignored while streaming");
            return Ok(state.settings.rate);
        }
        if let Some(dev) = state.dev.as_mut() {
            dev.set_sample_rate(rate)?;
        }
        state.settings.rate = rate;
        Ok(rate)
    }

    fn sample_rate(&self) -> u32 {
        self.lock().settings.rate
    }

    fn set_center_freq(&self, freq: u32) -> Result<()> {
        let mut state = self.lock();
        if let Some(dev) = state.dev.as_mut() {
            dev.set_center_freq(freq as u64)?;
        }
        state.settings.freq = freq;
        Ok(())
    }

    fn set_gain(&self, gain: f32) -> Result<()> {
        let db = LNA_GAIN.quantize(gain);
        let mut state = self.lock();
        if let Some(dev) = state.dev.as_mut() {
            dev.set_lna_gain(db)?;
        }
        state.settings.lna_db = db;
        debug!(requested = gain, db, "lna gain set");
        Ok(())
    }

    fn start_streaming(&self, sink: Box<dyn SampleSink>) -> Result<()> {
        let mut state = self.lock();
        if self.flag.is_up() {
            return Err(Error::device("stream already running"));
        }
        let settings = state.settings.clone();
        {
            let dev = state
                .dev
                .as_mut()
                .ok_or_else(|| Error::device("device not open"))?;

            // Reapply the cached tuning: another host may have touched the
            // hardware since the last stream.
            dev.set_sample_rate(settings.rate)?;
            dev.set_vga_gain(settings.vga_db)?;
            dev.set_lna_gain(settings.lna_db)?;
            dev.set_center_freq(settings.freq as u64)?;

            let bridge = SampleBridge::new(
                self.flag.clone(),
                SampleLaw::SignedCentered,
                TRANSFER_LEN,
                sink,
            );
            self.flag.raise();
            if let Err(err) = dev.start_capture(bridge.into_sink()) {
                self.flag.clear();
                return Err(err);
            }
        }
        drop(state);
        info!(rate = settings.rate, freq = settings.freq, "wideband stream running");

        self.flag
            .await_shutdown(|| self.lock().dev.as_ref().map_or(false, |d| d.is_capturing()));
        self.flag.clear();

        // The vendor stop waits for the delivery thread, which may still be
        // inside the application sink; it runs with the state lock released
        // so a sink that calls back into this session cannot wedge it.
        let (parked, epoch) = {
            let mut state = self.lock();
            (state.dev.take(), state.epoch)
        };
        let result = match parked {
            Some(mut dev) => {
                let result = dev.stop_capture();
                let mut state = self.lock();
                if state.epoch == epoch {
                    state.dev = Some(dev);
                }
                result
            }
            None => Ok(()),
        };
        if let Err(err) = &result {
            warn!(error = %err, "vendor stop failed");
        }
        info!("wideband stream ended");
        result
    }

    /// Signals the streaming call to wind down and returns at once.
    /// Always succeeds, streaming or not; the parked streaming call does
    /// the vendor-side stop as it unwinds.
    fn stop(&self) -> Result<()> {
        self.flag.clear();
        Ok(())
    }

    fn cleanup(&self) {
        self.flag.clear();
        // Dropped outside the lock: closing a mid-stream device waits for
        // its delivery thread.
        let dev = {
            let mut state = self.lock();
            state.epoch = state.epoch.wrapping_add(1);
            state.dev.take()
        };
        if dev.is_some() {
            debug!("wideband device released");
        }
    }
}
