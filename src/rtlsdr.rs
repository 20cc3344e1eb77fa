//! RTL-SDR Capture Session Module
//!
//! This module adapts RTL2832U-based dongles to the [`CaptureSource`]
//! contract, driving the vendor library through the `dynsdr` crate.
//! Device selection, the tuner gain table, confirmed-rate caching and the
//! blocking stream call all live here.

use std::sync::{Mutex, MutexGuard, PoisonError};

use dynsdr::BlockSink;
use tracing::{debug, info, warn};

use crate::config;
use crate::convert::SampleLaw;
use crate::error::{Error, Result};
use crate::gain::GainTable;
use crate::stream::{CaptureIo, RunFlag, SampleBridge};
use crate::{CaptureSource, SampleSink};

/// Bytes per vendor transfer; the dongle's conventional asynchronous
/// buffer size.
pub const TRANSFER_LEN: usize = dynsdr::rtlsdr::DEFAULT_TRANSFER_LEN;

/**
 * Settings transport for RTL2832U tuners
 */
///
/// Extends the raw capture transport with the dongle's tuning surface.
/// Implemented below for the runtime-loaded driver handle, and by
/// scripted devices in tests.
pub trait TunerIo: CaptureIo {
    /// Opens a device matching `spec`: an index, or an exact, prefix or
    /// suffix serial number match.
    fn open(spec: &str) -> Result<Self>
    where
        Self: Sized;

    fn set_sample_rate(&mut self, hz: u32) -> Result<()>;

    /// Rate the hardware is actually running at; 0 when unknown.
    fn sample_rate(&self) -> u32;

    fn set_center_freq(&mut self, hz: u32) -> Result<()>;
    fn set_manual_gain_mode(&mut self, manual: bool) -> Result<()>;
    fn tuner_gains(&mut self) -> Result<Vec<i32>>;
    fn set_tuner_gain(&mut self, tenth_db: i32) -> Result<()>;

    /// Tuner bandwidth in Hz, 0 selecting automatic.
    fn set_tuner_bandwidth(&mut self, hz: u32) -> Result<()>;

    fn reset_buffer(&mut self) -> Result<()>;
}

impl CaptureIo for dynsdr::RtlSdrHandle {
    fn start_capture(&mut self, sink: BlockSink) -> Result<()> {
        Ok(dynsdr::RtlSdrHandle::start_capture(self, sink)?)
    }

    fn is_capturing(&self) -> bool {
        dynsdr::RtlSdrHandle::is_capturing(self)
    }

    fn stop_capture(&mut self) -> Result<()> {
        Ok(dynsdr::RtlSdrHandle::stop_capture(self)?)
    }
}

impl TunerIo for dynsdr::RtlSdrHandle {
    fn open(spec: &str) -> Result<Self> {
        Ok(dynsdr::RtlSdrHandle::open_matching(spec)?)
    }

    fn set_sample_rate(&mut self, hz: u32) -> Result<()> {
        Ok(dynsdr::RtlSdrHandle::set_sample_rate(self, hz)?)
    }

    fn sample_rate(&self) -> u32 {
        dynsdr::RtlSdrHandle::sample_rate(self)
    }

    fn set_center_freq(&mut self, hz: u32) -> Result<()> {
        Ok(dynsdr::RtlSdrHandle::set_center_freq(self, hz)?)
    }

    fn set_manual_gain_mode(&mut self, manual: bool) -> Result<()> {
        Ok(dynsdr::RtlSdrHandle::set_tuner_gain_mode(self, manual)?)
    }

    fn tuner_gains(&mut self) -> Result<Vec<i32>> {
        Ok(dynsdr::RtlSdrHandle::tuner_gains(self)?)
    }

    fn set_tuner_gain(&mut self, tenth_db: i32) -> Result<()> {
        Ok(dynsdr::RtlSdrHandle::set_tuner_gain(self, tenth_db)?)
    }

    fn set_tuner_bandwidth(&mut self, hz: u32) -> Result<()> {
        Ok(dynsdr::RtlSdrHandle::set_tuner_bandwidth(self, hz)?)
    }

    fn reset_buffer(&mut self) -> Result<()> {
        Ok(dynsdr::RtlSdrHandle::reset_buffer(self)?)
    }
}

/// Parsed dongle configuration string.
///
/// Recognized keys: `args` (device index or serial match), `rate` (Hz),
/// `bw` (tuner bandwidth Hz, 0 for automatic). Anything else is a
/// parameter error.
#[derive(Debug, Clone, Default, PartialEq)]
struct RtlParams {
    args: Option<String>,
    rate: Option<u32>,
    bw: Option<u32>,
}

impl RtlParams {
    fn parse(config: &str) -> Result<Self> {
        let mut params = RtlParams::default();
        for (key, value) in config::pairs(config)? {
            match key {
                "args" => params.args = Some(value.to_string()),
                "rate" => params.rate = Some(config::parse_u32(key, value)?),
                "bw" => params.bw = Some(config::parse_u32(key, value)?),
                _ => return Err(config::unknown_key(key)),
            }
        }
        Ok(params)
    }
}

/// Cached device tuning. The rate is whatever the hardware confirmed via
/// read-back after the last successful set, not the raw request.
#[derive(Debug, Clone, PartialEq)]
struct Settings {
    rate: u32,
    freq: u32,
    bw: u32,
    /// Confirmed tuner gain in tenths of a dB; `None` leaves the tuner in
    /// automatic gain mode.
    gain: Option<i32>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            rate: 2_800_000,
            freq: 105_000_000,
            bw: 0,
            gain: None,
        }
    }
}

struct State<D> {
    dev: Option<D>,
    settings: Settings,
    gains: GainTable,
    /// Changes whenever the installed device does. The stream teardown
    /// releases the lock around the vendor stop and uses the epoch to
    /// notice a device retired or replaced in the gap.
    epoch: u64,
}

/**
 * RTL-SDR capture session
 */
///
/// One session per dongle. All methods take `&self`: tuning calls are
/// valid from any thread while another is parked inside
/// [`CaptureSource::start_streaming`], and [`CaptureSource::stop`] is the
/// cross-thread way to end a stream. The device handle lives behind a
/// mutex that is never held while the streaming call is parked, nor while
/// the vendor stop waits out the last delivery.
pub struct RtlSdrSource<D: TunerIo = dynsdr::RtlSdrHandle> {
    state: Mutex<State<D>>,
    flag: RunFlag,
}

impl<D: TunerIo> RtlSdrSource<D> {
    /// Creates an unopened session with default tuning: 105 MHz center,
    /// 2.8 Msps, automatic gain.
    pub fn new() -> Self {
        RtlSdrSource {
            state: Mutex::new(State {
                dev: None,
                settings: Settings::default(),
                gains: GainTable::default(),
                epoch: 0,
            }),
            flag: RunFlag::new(),
        }
    }

    /// Builds a session around an already-open transport, applying
    /// `config` as [`CaptureSource::init`] would.
    pub fn with_device(dev: D, config: &str) -> Result<Self> {
        let source = RtlSdrSource::new();
        let params = RtlParams::parse(config)?;
        source.install(dev, params)?;
        Ok(source)
    }

    fn lock(&self) -> MutexGuard<'_, State<D>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring-up sequence: manual gain mode, gain table snapshot, rate with
    /// read-back, tuner bandwidth, frequency, then back to automatic
    /// gain. A missing gain table is tolerated; later gain requests are
    /// ignored until the tuner reports one. On failure the transport is
    /// dropped, which closes the device.
    fn install(&self, mut dev: D, params: RtlParams) -> Result<()> {
        let mut state = self.lock();
        let mut settings = state.settings.clone();
        settings.rate = params.rate.unwrap_or(settings.rate);
        settings.bw = params.bw.unwrap_or(settings.bw);

        dev.set_manual_gain_mode(true)?;
        let gains = match dev.tuner_gains() {
            Ok(list) => GainTable::new(list),
            Err(err) => {
                warn!(error = %err, "tuner gain table unavailable");
                GainTable::default()
            }
        };
        if gains.is_empty() {
            debug!("tuner reported no gains; gain requests will be ignored");
        }

        dev.set_sample_rate(settings.rate)?;
        let confirmed = dev.sample_rate();
        if confirmed != 0 {
            settings.rate = confirmed;
        }
        dev.set_tuner_bandwidth(settings.bw)?;
        dev.set_center_freq(settings.freq)?;
        dev.set_manual_gain_mode(false)?;

        info!(
            rate = settings.rate,
            freq = settings.freq,
            gains = gains.len(),
            "dongle session ready"
        );
        state.settings = settings;
        state.gains = gains;
        state.epoch = state.epoch.wrapping_add(1);
        state.dev = Some(dev);
        Ok(())
    }
}

impl<D: TunerIo> Default for RtlSdrSource<D> {
    fn default() -> Self {
        RtlSdrSource::new()
    }
}

impl<D: TunerIo> CaptureSource for RtlSdrSource<D> {
    fn name(&self) -> &'static str {
        "RTL-SDR Compatible Plugin"
    }

    fn init(&self, config: &str) -> Result<()> {
        if self.flag.is_up() {
            return Err(Error::device("cannot re-init while streaming"));
        }
        let params = RtlParams::parse(config)?;
        let dev = D::open(params.args.as_deref().unwrap_or("0"))?;
        self.install(dev, params)
    }

    /// Rate changes are refused silently while streaming: the call
    /// returns the rate the stream is running at. Otherwise the hardware
    /// is set and then read back, and the confirmed value is cached and
    /// returned. Before `init` the request is only cached.
    fn set_sample_rate(&self, rate: u32) -> Result<u32> {
        let mut state = self.lock();
        if self.flag.is_up() {
            debug!(requested = rate, "rate change ignored while streaming");
            return Ok(state.settings.rate);
        }
        match state.dev.as_mut() {
            Some(dev) => {
                dev.set_sample_rate(rate)?;
                let confirmed = dev.sample_rate();
                state.settings.rate = if confirmed == 0 { rate } else { confirmed };
            }
            None => state.settings.rate = rate,
        }
        Ok(state.settings.rate)
    }

    /// Reads the live rate back from an open, idle device; otherwise the
    /// cached value.
    fn sample_rate(&self) -> u32 {
        let mut state = self.lock();
        if !self.flag.is_up() {
            let refreshed = state.dev.as_ref().map(|dev| dev.sample_rate()).unwrap_or(0);
            if refreshed != 0 {
                state.settings.rate = refreshed;
            }
        }
        state.settings.rate
    }

    fn set_center_freq(&self, freq: u32) -> Result<()> {
        let mut state = self.lock();
        if let Some(dev) = state.dev.as_mut() {
            dev.set_center_freq(freq)?;
        }
        state.settings.freq = freq;
        Ok(())
    }

    /// Quantizes onto the tuner's reported gain table and switches the
    /// tuner to manual mode. With no table the request is ignored.
    fn set_gain(&self, gain: f32) -> Result<()> {
        let mut state = self.lock();
        let Some(tenth_db) = state.gains.quantize(gain) else {
            debug!(requested = gain, "no gain table; request ignored");
            return Ok(());
        };
        if let Some(dev) = state.dev.as_mut() {
            dev.set_manual_gain_mode(true)?;
            dev.set_tuner_gain(tenth_db)?;
        }
        state.settings.gain = Some(tenth_db);
        debug!(requested = gain, tenth_db, "tuner gain set");
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
            dev.set_center_freq(settings.freq)?;
            match settings.gain {
                Some(tenth_db) => {
                    dev.set_manual_gain_mode(true)?;
                    dev.set_tuner_gain(tenth_db)?;
                }
                None => dev.set_manual_gain_mode(false)?,
            }
            dev.reset_buffer()?;

            let bridge = SampleBridge::new(
                self.flag.clone(),
                SampleLaw::UnsignedOffset,
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
        info!(rate = settings.rate, freq = settings.freq, "dongle stream running");

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
        info!("dongle stream ended");
        result
    }

    /// Signals the streaming call to wind down and returns at once.
    /// Always succeeds, streaming or not; the parked streaming call does
    /// the vendor-side cancel as it unwinds.
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
            state.gains = GainTable::default();
            state.epoch = state.epoch.wrapping_add(1);
            state.dev.take()
        };
        if dev.is_some() {
            debug!("dongle released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let params = RtlParams::parse("args 00000103 rate 2400000 bw 300000").unwrap();
        assert_eq!(
            params,
            RtlParams {
                args: Some("00000103".to_string()),
                rate: Some(2_400_000),
                bw: Some(300_000),
            }
        );
    }

    #[test]
    fn test_parse_empty_config_is_all_defaults() {
        assert_eq!(RtlParams::parse(" ").unwrap(), RtlParams::default());
    }

    #[test]
    fn test_parse_rejects_unknown_key() {
        let err = RtlParams::parse("sernum abc").unwrap_err();
        assert!(matches!(err, Error::Parameter(_)));
        assert!(err.to_string().contains("sernum"));
    }

    #[test]
    fn test_parse_rejects_dangling_key() {
        assert!(RtlParams::parse("args").is_err());
    }

    #[test]
    fn test_default_tuning() {
        let settings = Settings::default();
        assert_eq!(settings.rate, 2_800_000);
        assert_eq!(settings.freq, 105_000_000);
        assert_eq!(settings.bw, 0);
        assert_eq!(settings.gain, None);
    }
}
