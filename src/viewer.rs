//! Capture/view loop and interactive controls
//!
//! [`Viewer`] pulls frames from a [`PacketSource`], strips metadata, runs the
//! stabilizer and renders accepted frames into an ARGB buffer that is handed
//! to a [`DisplaySink`]. Key presses arrive as [`Command`]s and are applied
//! between frames.

use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::analysis::hex_string;
use crate::capture::save_frame;
use crate::config::{DecodeMode, ViewerConfig};
use crate::decoder::render_frame;
use crate::frame_assembler::{FrameAssembler, FrameReader};
use crate::metadata::strip_metadata_header;
use crate::source::{PacketSource, SourceError};
use crate::stabilizer::{FilterOutcome, RejectReason, RejectionCounters, StabilizerState};

/// Reassembled frames shorter than this never reach the pipeline
pub const MIN_RAW_FRAME_SIZE: usize = 100;

/// Accepted frames logged with a hex preview
const LOGGED_FRAMES: u64 = 5;

/// Bytes shown in the per-frame preview
const PREVIEW_BYTES: usize = 20;

/// Interactive controls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Next decode mode
    CycleMode,
    /// Change the display width by the given number of pixels
    AdjustWidth(i32),
    /// Back to the default width
    ResetWidth,
    /// Toggle rejection of interleaved frames
    ToggleStripeFilter,
    /// Toggle fragment accumulation
    ToggleAccumulate,
    /// Toggle size and brightness locking
    ToggleFrameHold,
    /// Lock the size band to the held frame
    LockSize,
    /// Lower the brightness floor by one step
    LowerBrightnessFloor,
    /// Save the next displayed frame
    SaveNextFrame,
    /// Stop the viewer
    Quit,
}

impl Command {
    /// Map a key press to a command
    ///
    /// Width keys move by 10 with shift held, by 1 otherwise. Escape quits.
    pub fn from_key(key: char, shift: bool) -> Option<Self> {
        let step = if shift { 10 } else { 1 };
        let command = match key.to_ascii_lowercase() {
            'q' | '\u{1b}' => Command::Quit,
            'm' => Command::CycleMode,
            '=' | '+' => Command::AdjustWidth(step),
            '-' | '_' => Command::AdjustWidth(-step),
            'r' => Command::ResetWidth,
            's' => Command::ToggleStripeFilter,
            'a' => Command::ToggleAccumulate,
            'h' => Command::ToggleFrameHold,
            'l' => Command::LockSize,
            'b' => Command::LowerBrightnessFloor,
            'd' => Command::SaveNextFrame,
            _ => return None,
        };
        Some(command)
    }

    /// Map a key string, one command per character
    ///
    /// Uppercase letters count as shifted, unknown keys are skipped.
    pub fn parse_keys(keys: &str) -> Vec<Self> {
        keys.chars()
            .filter_map(|c| Self::from_key(c, c.is_ascii_uppercase()))
            .collect()
    }
}

/// Where rendered frames go
pub trait DisplaySink {
    /// Show a `width x height` ARGB image
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the image cannot be shown.
    fn present(&mut self, pixels: &[u32], width: usize, height: usize) -> std::io::Result<()>;

    /// Update the status line
    fn set_title(&mut self, _title: &str) {}
}

/// Discards frames, counting them
#[derive(Debug, Default)]
pub struct NullDisplay {
    presented: u64,
    title: String,
}

impl NullDisplay {
    /// Create a new sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames presented so far
    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// Last status line
    pub fn title(&self) -> &str {
        &self.title
    }
}

impl DisplaySink for NullDisplay {
    fn present(&mut self, _pixels: &[u32], _width: usize, _height: usize) -> std::io::Result<()> {
        self.presented += 1;
        Ok(())
    }

    fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }
}

/// Writes every presented frame to a binary PGM file, overwriting it
#[derive(Debug)]
pub struct PgmSink {
    path: PathBuf,
    presented: u64,
}

impl PgmSink {
    /// Create a sink writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            presented: 0,
        }
    }

    /// Output file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames written so far
    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl DisplaySink for PgmSink {
    fn present(&mut self, pixels: &[u32], width: usize, height: usize) -> std::io::Result<()> {
        let mut out = BufWriter::new(File::create(&self.path)?);
        write!(out, "P5\n{} {}\n255\n", width, height)?;
        // Body is always width * height bytes; missing pixels are black
        let mut gray: Vec<u8> = pixels
            .iter()
            .take(width * height)
            .map(|&p| (p & 0xFF) as u8)
            .collect();
        gray.resize(width * height, 0);
        out.write_all(&gray)?;
        out.flush()?;
        self.presented += 1;
        Ok(())
    }
}

/// Frames per second over one-second windows of wall time
#[derive(Debug)]
struct FpsCounter {
    window_start: Instant,
    frames: u32,
    fps: f64,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            frames: 0,
            fps: 0.0,
        }
    }

    /// Count a frame; returns the new rate when a window closes
    fn tick(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < Duration::from_secs(1) {
            return None;
        }
        self.fps = self.frames as f64 / elapsed.as_secs_f64();
        self.frames = 0;
        self.window_start = now;
        Some(self.fps)
    }
}

/// What one [`Viewer::step`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A frame was rendered and presented
    Displayed,
    /// The frame was rejected by a gate
    Rejected(RejectReason),
    /// The frame went into the accumulation buffer
    Accumulating,
    /// Empty or too short to look at
    Dropped,
    /// A quit command was applied, nothing was read
    Quit,
}

/// Snapshot of the viewer's counters, rendered as the window title
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerStatus {
    /// Displayed width
    pub width: usize,
    /// Displayed frames per second
    pub fps: f64,
    /// Frames displayed
    pub displayed: u64,
    /// Frames that reached the pipeline
    pub total: u64,
    /// Brightness of the last displayed frame
    pub brightness: u32,
    /// Neighbour difference of the last displayed frame
    pub neighbor_diff: f64,
    /// Active decoder
    pub mode: DecodeMode,
    /// Size of the last displayed frame
    pub last_size: usize,
    /// Rejections by gate
    pub counters: RejectionCounters,
    /// Accumulation enabled
    pub accumulate: bool,
    /// Frame-hold enabled
    pub frame_hold: bool,
    /// Last notice for the user, e.g. a failed save
    pub message: Option<String>,
}

impl fmt::Display for ViewerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IR Scope | w={} | {:.1} fps | #{} (of {}) | avg={} nd={:.0} | {} | {}B | skip: S={} D={} Z={} B={}",
            self.width,
            self.fps,
            self.displayed,
            self.total,
            self.brightness,
            self.neighbor_diff,
            self.mode,
            self.last_size,
            self.counters.stripe,
            self.counters.dark,
            self.counters.size,
            self.counters.brightness_jump,
        )?;
        if self.accumulate {
            f.write_str(" [ACCUM]")?;
        }
        if self.frame_hold {
            f.write_str(" [HOLD]")?;
        }
        if let Some(message) = &self.message {
            write!(f, " | {}", message)?;
        }
        Ok(())
    }
}

/// The capture/view loop
pub struct Viewer<S, D> {
    reader: FrameReader<S>,
    display: D,
    config: ViewerConfig,
    stabilizer: StabilizerState,
    pixels: Vec<u32>,
    pending: VecDeque<Command>,
    save_next: bool,
    quit: bool,
    frames_total: u64,
    frames_displayed: u64,
    last_brightness: u32,
    last_neighbor_diff: f64,
    last_size: usize,
    fps: FpsCounter,
    message: Option<String>,
}

impl<S: PacketSource, D: DisplaySink> Viewer<S, D> {
    /// Create a viewer over `source`
    pub fn new(source: S, display: D, mut config: ViewerConfig) -> Self {
        config.display.adjust_width(0);
        let reader =
            FrameReader::with_assembler(source, FrameAssembler::new(), config.read_timeout());
        let pixels = vec![0u32; config.display.buffer_len()];
        Self {
            reader,
            display,
            config,
            stabilizer: StabilizerState::new(),
            pixels,
            pending: VecDeque::new(),
            save_next: false,
            quit: false,
            frames_total: 0,
            frames_displayed: 0,
            last_brightness: 0,
            last_neighbor_diff: 0.0,
            last_size: 0,
            fps: FpsCounter::new(),
            message: None,
        }
    }

    /// Current configuration
    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    /// Filter pipeline state
    pub fn stabilizer(&self) -> &StabilizerState {
        &self.stabilizer
    }

    /// The display sink
    pub fn display(&self) -> &D {
        &self.display
    }

    /// Consume the viewer, returning the display sink
    pub fn into_display(self) -> D {
        self.display
    }

    /// Whether a quit command was applied
    pub fn quit_requested(&self) -> bool {
        self.quit
    }

    /// Queue a command for the next step
    pub fn queue_command(&mut self, command: Command) {
        self.pending.push_back(command);
    }

    /// Apply a command immediately
    pub fn apply(&mut self, command: Command) {
        let filter = &mut self.config.filter;
        let display = &mut self.config.display;

        match command {
            Command::CycleMode => {
                display.mode = display.mode.next();
                log::info!("[MODE] -> {}", display.mode);
            }
            Command::AdjustWidth(delta) => {
                let width = display.adjust_width(delta);
                log::info!("[WIDTH] -> {}", width);
            }
            Command::ResetWidth => {
                display.reset_width();
                log::info!("[WIDTH] -> {} (reset)", display.width);
            }
            Command::ToggleStripeFilter => {
                filter.stripe_filter = !filter.stripe_filter;
                log::info!("[STRIPE FILTER] {}", on_off(filter.stripe_filter));
            }
            Command::ToggleAccumulate => {
                filter.accumulate = !filter.accumulate;
                self.stabilizer.reset_accumulation();
                log::info!(
                    "[ACCUMULATE] {} (target={} bytes)",
                    on_off(filter.accumulate),
                    filter.target_frame_size
                );
            }
            Command::ToggleFrameHold => {
                filter.frame_hold = !filter.frame_hold;
                if filter.frame_hold {
                    log::info!("[HOLD] ON (stabilized)");
                } else {
                    self.stabilizer.clear_hold();
                    log::info!("[HOLD] OFF (show all)");
                }
            }
            Command::LockSize => match self.stabilizer.lock_to_held() {
                Some(size) => log::info!(
                    "[LOCK] Locked to size band: {} +/-{}%",
                    size,
                    filter.size_tolerance_pct
                ),
                None => log::info!("[LOCK] Cleared size lock"),
            },
            Command::LowerBrightnessFloor => {
                let floor = filter.lower_brightness_floor();
                log::info!("[BRIGHTNESS] threshold -> {}", floor);
            }
            Command::SaveNextFrame => {
                self.save_next = true;
                log::info!("[SAVE] Will save next displayed frame");
            }
            Command::Quit => self.quit = true,
        }
    }

    /// Counters and last-frame figures
    pub fn status(&self) -> ViewerStatus {
        ViewerStatus {
            width: self.config.display.width,
            fps: self.fps.fps,
            displayed: self.frames_displayed,
            total: self.frames_total,
            brightness: self.last_brightness,
            neighbor_diff: self.last_neighbor_diff,
            mode: self.config.display.mode,
            last_size: self.last_size,
            counters: self.stabilizer.counters(),
            accumulate: self.config.filter.accumulate,
            frame_hold: self.config.filter.frame_hold,
            message: self.message.clone(),
        }
    }

    /// Apply queued commands, then fetch and handle one frame
    ///
    /// # Errors
    ///
    /// Returns the source's error; [`SourceError::Exhausted`] once a finite
    /// source has nothing left.
    pub fn step(&mut self, running: &AtomicBool) -> Result<StepOutcome, SourceError> {
        while let Some(command) = self.pending.pop_front() {
            self.apply(command);
        }
        if self.quit {
            return Ok(StepOutcome::Quit);
        }

        let frame = self.reader.next_frame(running)?;
        if frame.len() < MIN_RAW_FRAME_SIZE {
            return Ok(StepOutcome::Dropped);
        }
        self.frames_total += 1;

        let payload = strip_metadata_header(&frame).payload;
        let accepted = match self.stabilizer.process(payload, &self.config.filter) {
            FilterOutcome::TooSmall => return Ok(StepOutcome::Dropped),
            FilterOutcome::Accumulating => return Ok(StepOutcome::Accumulating),
            FilterOutcome::Rejected(reason) => {
                log::trace!("Rejected {} byte frame: {:?}", payload.len(), reason);
                return Ok(StepOutcome::Rejected(reason));
            }
            FilterOutcome::Accepted(accepted) => accepted,
        };

        let display = &self.config.display;
        self.frames_displayed += 1;
        if self.frames_displayed <= LOGGED_FRAMES {
            log::debug!(
                "[Frame {}] {} bytes, mode={}, avg={}, nd={:.1}, first {}: {}",
                self.frames_displayed,
                accepted.data.len(),
                display.mode,
                accepted.brightness,
                accepted.neighbor_diff,
                PREVIEW_BYTES,
                hex_string(&accepted.data[..accepted.data.len().min(PREVIEW_BYTES)])
            );
        }

        if self.save_next {
            self.save_next = false;
            self.message = Some(match save_frame(&self.config.save_path, accepted.data) {
                Ok(()) => format!(
                    "saved {} bytes (w={} mode={})",
                    accepted.data.len(),
                    display.width,
                    display.mode
                ),
                Err(e) => {
                    log::warn!(
                        "Failed to save frame to {}: {}",
                        self.config.save_path.display(),
                        e
                    );
                    format!("save failed: {}", e)
                }
            });
        }

        self.last_brightness = accepted.brightness;
        self.last_neighbor_diff = accepted.neighbor_diff;
        self.last_size = accepted.data.len();

        let (width, height) = (display.width, display.height);
        let written = render_frame(accepted.data, &mut self.pixels, width, height, display.mode);
        log::trace!("Rendered {} pixels", written);

        let npix = (width * height).min(self.pixels.len());
        if let Err(e) = self.display.present(&self.pixels[..npix], width, height) {
            log::warn!("Failed to present frame: {}", e);
        }

        if self.fps.tick(Instant::now()).is_some() {
            let title = self.status().to_string();
            self.display.set_title(&title);
        }

        Ok(StepOutcome::Displayed)
    }

    /// Run until `running` is cleared, a quit command, or the source ends
    ///
    /// # Errors
    ///
    /// Returns transport errors from the source; exhaustion ends the loop
    /// cleanly.
    pub fn run(&mut self, running: &AtomicBool) -> Result<ViewerStatus, SourceError> {
        let result = loop {
            if !running.load(Ordering::Relaxed) || self.quit {
                break Ok(());
            }
            match self.step(running) {
                Ok(_) => {}
                Err(SourceError::Exhausted) => break Ok(()),
                Err(e) => {
                    log::error!("USB error: {}", e);
                    break Err(e);
                }
            }
        };

        let status = self.status();
        log::info!(
            "[DONE] {} displayed, {} total, skip: stripe={} dark={} size={} bright={}",
            status.displayed,
            status.total,
            status.counters.stripe,
            status.counters.dark,
            status.counters.size,
            status.counters.brightness_jump
        );
        result.map(|()| status)
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}
