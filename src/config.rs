//! Viewer configuration
//!
//! Tunables for the filter pipeline and the display, with defaults that
//! match what works on the ET5 firmware. Values can be loaded from a JSON
//! file and overridden through `IRSCOPE_*` environment variables:
//!
//! | Variable                       | Field                              |
//! |--------------------------------|------------------------------------|
//! | `IRSCOPE_MODE`                 | `display.mode`                     |
//! | `IRSCOPE_WIDTH`                | `display.width`                    |
//! | `IRSCOPE_BRIGHTNESS_FLOOR`     | `filter.brightness_floor`          |
//! | `IRSCOPE_INTERLEAVE_THRESHOLD` | `filter.interleave_threshold`      |
//! | `IRSCOPE_STRIPE_FILTER`        | `filter.stripe_filter`             |
//! | `IRSCOPE_FRAME_HOLD`           | `filter.frame_hold`                |
//! | `IRSCOPE_ACCUMULATE`           | `filter.accumulate`                |
//! | `IRSCOPE_TARGET_FRAME_SIZE`    | `filter.target_frame_size`         |
//!
//! Unparseable values are logged and ignored.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::frame_classifier::{INTERLEAVE_THRESHOLD, SAMPLE_WINDOW};

/// Default display width in pixels
pub const DEFAULT_WIDTH: usize = 642;
/// Default display height in pixels
pub const DEFAULT_HEIGHT: usize = 480;
/// Width of the backing pixel buffer
pub const MAX_WIDTH: usize = 1284;
/// Narrowest allowed display width
pub const MIN_WIDTH: usize = 10;

/// Default location of the one-shot frame save
pub const DEFAULT_SAVE_PATH: &str = "/tmp/ir_scope_frame.raw";

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for [`ViewerConfig`]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Display geometry cannot hold a single row
    #[error("Invalid display geometry: {0}")]
    InvalidDisplay(String),
}

/// Result type alias for configuration loading.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Byte-to-pixel mapping used by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecodeMode {
    /// One byte per pixel
    #[default]
    Raw,
    /// Every second byte starting at offset 0
    DeinterleaveEven,
    /// Every second byte starting at offset 1
    DeinterleaveOdd,
    /// Little-endian 16-bit samples
    Le16,
}

impl DecodeMode {
    /// All modes in cycling order
    pub const ALL: [DecodeMode; 4] = [
        DecodeMode::Raw,
        DecodeMode::DeinterleaveEven,
        DecodeMode::DeinterleaveOdd,
        DecodeMode::Le16,
    ];

    /// Parse from environment variable string
    pub fn from_env_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "raw" | "raw-8bit" | "8bit" => Self::Raw,
            "deint-even" | "even" => Self::DeinterleaveEven,
            "deint-odd" | "odd" => Self::DeinterleaveOdd,
            "16bit-le" | "16bit" | "le16" => Self::Le16,
            _ => {
                log::warn!("Unknown decode mode '{}', defaulting to 'raw'", s);
                Self::Raw
            }
        }
    }

    /// Next mode in the cycle, wrapping around
    pub fn next(self) -> Self {
        match self {
            Self::Raw => Self::DeinterleaveEven,
            Self::DeinterleaveEven => Self::DeinterleaveOdd,
            Self::DeinterleaveOdd => Self::Le16,
            Self::Le16 => Self::Raw,
        }
    }

    /// Short name shown in status output
    pub fn name(self) -> &'static str {
        match self {
            Self::Raw => "RAW 8-bit",
            Self::DeinterleaveEven => "Deint EVEN",
            Self::DeinterleaveOdd => "Deint ODD",
            Self::Le16 => "16-bit LE",
        }
    }
}

impl std::fmt::Display for DecodeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Tunables of the filter pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Neighbour difference above which a frame counts as interleaved
    pub interleave_threshold: f64,
    /// Size band tolerance in percent of the locked size
    pub size_tolerance_pct: usize,
    /// Largest accepted brightness change between accepted frames
    pub brightness_tolerance: u32,
    /// Frames darker than this are rejected
    pub brightness_floor: u32,
    /// Amount the floor drops on each "lower brightness" command
    pub brightness_floor_step: u32,
    /// Frames shorter than this are dropped as noise
    pub min_frame_size: usize,
    /// Bytes sampled for brightness and neighbour difference
    pub sample_window: usize,
    /// Reject interleaved frames
    pub stripe_filter: bool,
    /// Enable size band and brightness continuity locking
    pub frame_hold: bool,
    /// Stitch fragments until `target_frame_size` bytes are collected
    pub accumulate: bool,
    /// Target size for accumulation, 0 when unknown
    pub target_frame_size: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            interleave_threshold: INTERLEAVE_THRESHOLD,
            size_tolerance_pct: 20,
            brightness_tolerance: 40,
            brightness_floor: 15,
            brightness_floor_step: 5,
            min_frame_size: 100,
            sample_window: SAMPLE_WINDOW,
            stripe_filter: true,
            frame_hold: true,
            accumulate: false,
            target_frame_size: 0,
        }
    }
}

impl FilterConfig {
    /// Lower the brightness floor by one step, stopping at zero
    pub fn lower_brightness_floor(&mut self) -> u32 {
        self.brightness_floor = self
            .brightness_floor
            .saturating_sub(self.brightness_floor_step);
        self.brightness_floor
    }

    /// Inclusive size band around `locked_size`
    pub fn size_band(&self, locked_size: usize) -> (usize, usize) {
        let lo = locked_size * 100usize.saturating_sub(self.size_tolerance_pct) / 100;
        let hi = locked_size * (100 + self.size_tolerance_pct) / 100;
        (lo, hi)
    }
}

/// Display geometry and decode mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Active decoder
    pub mode: DecodeMode,
    /// Displayed width in pixels
    pub width: usize,
    /// Displayed height in pixels
    pub height: usize,
    /// Width of the pixel buffer, upper bound for `width`
    pub max_width: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            mode: DecodeMode::Raw,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            max_width: MAX_WIDTH,
        }
    }
}

impl DisplayConfig {
    /// Change the width by `delta`, clamped to `[MIN_WIDTH, max_width]`
    pub fn adjust_width(&mut self, delta: i32) -> usize {
        let width = self.width as i64 + delta as i64;
        self.width = width.clamp(MIN_WIDTH as i64, self.width_ceiling() as i64) as usize;
        self.width
    }

    /// Check the geometry and pull `width` into `[MIN_WIDTH, max_width]`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidDisplay`] if `max_width` is below
    /// [`MIN_WIDTH`] or `height` is zero.
    pub fn validate(&mut self) -> Result<()> {
        if self.max_width < MIN_WIDTH {
            return Err(ConfigError::InvalidDisplay(format!(
                "max_width {} is below the minimum width {}",
                self.max_width, MIN_WIDTH
            )));
        }
        if self.height == 0 {
            return Err(ConfigError::InvalidDisplay("height is zero".to_string()));
        }

        let width = self.width.clamp(MIN_WIDTH, self.max_width);
        if width != self.width {
            log::warn!(
                "Display width {} outside [{}, {}], using {}",
                self.width,
                MIN_WIDTH,
                self.max_width,
                width
            );
            self.width = width;
        }
        Ok(())
    }

    /// Upper width bound, never below [`MIN_WIDTH`]
    fn width_ceiling(&self) -> usize {
        self.max_width.max(MIN_WIDTH)
    }

    /// Back to [`DEFAULT_WIDTH`]
    pub fn reset_width(&mut self) {
        self.width = DEFAULT_WIDTH.min(self.max_width);
    }

    /// Pixels in the backing buffer
    pub fn buffer_len(&self) -> usize {
        self.max_width * self.height
    }
}

/// Complete viewer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Filter pipeline tunables
    pub filter: FilterConfig,
    /// Display settings
    pub display: DisplayConfig,
    /// Destination of the one-shot raw frame save
    pub save_path: PathBuf,
    /// Wait for a single packet, in milliseconds
    pub read_timeout_ms: u64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            display: DisplayConfig::default(),
            save_path: PathBuf::from(DEFAULT_SAVE_PATH),
            read_timeout_ms: 500,
        }
    }
}

impl ViewerConfig {
    /// Load from a JSON file; missing fields take their defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, is not valid JSON, or
    /// describes a display geometry that fails [`DisplayConfig::validate`].
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut config: Self = serde_json::from_reader(reader)?;
        config.display.validate()?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Per-packet read timeout
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Apply `IRSCOPE_*` overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup("IRSCOPE_MODE") {
            self.display.mode = DecodeMode::from_env_str(&mode);
        }
        if let Some(width) = parse_var::<usize, _>(&lookup, "IRSCOPE_WIDTH") {
            self.display.width = width.clamp(MIN_WIDTH, self.display.width_ceiling());
        }
        if let Some(floor) = parse_var(&lookup, "IRSCOPE_BRIGHTNESS_FLOOR") {
            self.filter.brightness_floor = floor;
        }
        if let Some(threshold) = parse_var(&lookup, "IRSCOPE_INTERLEAVE_THRESHOLD") {
            self.filter.interleave_threshold = threshold;
        }
        if let Some(on) = parse_flag(&lookup, "IRSCOPE_STRIPE_FILTER") {
            self.filter.stripe_filter = on;
        }
        if let Some(on) = parse_flag(&lookup, "IRSCOPE_FRAME_HOLD") {
            self.filter.frame_hold = on;
        }
        if let Some(on) = parse_flag(&lookup, "IRSCOPE_ACCUMULATE") {
            self.filter.accumulate = on;
        }
        if let Some(size) = parse_var(&lookup, "IRSCOPE_TARGET_FRAME_SIZE") {
            self.filter.target_frame_size = size;
        }
    }
}

fn parse_var<T, L>(lookup: &L, key: &str) -> Option<T>
where
    T: FromStr,
    L: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring {}='{}': not a valid value", key, raw);
            None
        }
    }
}

fn parse_flag<L>(lookup: &L, key: &str) -> Option<bool>
where
    L: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().to_lowercase().as_str() {
        "1" | "on" | "true" | "yes" => Some(true),
        "0" | "off" | "false" | "no" => Some(false),
        _ => {
            log::warn!("Ignoring {}='{}': expected on/off", key, raw);
            None
        }
    }
}
