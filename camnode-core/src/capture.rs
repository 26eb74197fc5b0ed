//! Image acquisition over the single hardware frame buffer.
//!
//! The [`AcquisitionUnit`] lends the driver's frame buffer out as an
//! [`ImageArtifact`] ticket. Tickets are neither `Clone` nor `Copy`, and the
//! unit refuses a second `acquire` while one is outstanding, so at most one
//! view of the buffer exists at a time. Returning the ticket through
//! [`AcquisitionUnit::release`] hands the buffer back to the driver.

use core::fmt;

/// Sensor output resolution.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameSize {
    /// 1600x1200.
    Uxga,
    /// 800x600.
    Svga,
}

impl FrameSize {
    pub const fn dimensions(self) -> (u16, u16) {
        match self {
            FrameSize::Uxga => (1600, 1200),
            FrameSize::Svga => (800, 600),
        }
    }
}

/// Where the driver allocates its frame buffers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BufferLocation {
    Psram,
    Dram,
}

/// Memory available to the capture pipeline, detected at boot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemoryClass {
    /// External PSRAM is present.
    Abundant,
    /// Only internal DRAM is available.
    Constrained,
}

/// Capture parameters applied once at boot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CapturePreset {
    pub frame_size: FrameSize,
    /// JPEG quantiser; lower is higher quality.
    pub jpeg_quality: u8,
    pub buffer_count: u8,
    pub buffer_location: BufferLocation,
    pub xclk_hz: u32,
}

/// Sensor master clock shared by both presets.
pub const SENSOR_XCLK_HZ: u32 = 20_000_000;

/// High-resolution, dual-buffer preset used when PSRAM is present.
pub const HIGH_RESOLUTION_PRESET: CapturePreset = CapturePreset {
    frame_size: FrameSize::Uxga,
    jpeg_quality: 10,
    buffer_count: 2,
    buffer_location: BufferLocation::Psram,
    xclk_hz: SENSOR_XCLK_HZ,
};

/// Reduced, single-buffer preset for internal memory only.
pub const REDUCED_PRESET: CapturePreset = CapturePreset {
    frame_size: FrameSize::Svga,
    jpeg_quality: 12,
    buffer_count: 1,
    buffer_location: BufferLocation::Dram,
    xclk_hz: SENSOR_XCLK_HZ,
};

impl MemoryClass {
    /// Selects the capture preset for this memory class.
    pub const fn preset(self) -> CapturePreset {
        match self {
            MemoryClass::Abundant => HIGH_RESOLUTION_PRESET,
            MemoryClass::Constrained => REDUCED_PRESET,
        }
    }
}

/// Image sensor identified during initialisation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SensorModel {
    Ov2640,
    Ov3660,
    Ov5640,
    Unknown(u16),
}

/// Orientation and colour corrections applied after configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SensorTuning {
    pub vertical_flip: bool,
    pub brightness: i8,
    pub saturation: i8,
}

impl SensorModel {
    /// Maps a product id read over SCCB to a known sensor.
    pub const fn from_product_id(pid: u16) -> Self {
        match pid {
            0x2642 | 0x2641 => SensorModel::Ov2640,
            0x3660 => SensorModel::Ov3660,
            0x5640 => SensorModel::Ov5640,
            other => SensorModel::Unknown(other),
        }
    }

    /// Corrections needed by sensors that come up flipped and washed out.
    pub const fn tuning(self) -> Option<SensorTuning> {
        match self {
            SensorModel::Ov3660 => Some(SensorTuning {
                vertical_flip: true,
                brightness: 1,
                saturation: -2,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for SensorModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorModel::Ov2640 => f.write_str("OV2640"),
            SensorModel::Ov3660 => f.write_str("OV3660"),
            SensorModel::Ov5640 => f.write_str("OV5640"),
            SensorModel::Unknown(pid) => write!(f, "unknown(0x{pid:04x})"),
        }
    }
}

/// Dimensions reported by the driver for a grabbed frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FrameGeometry {
    pub width: u16,
    pub height: u16,
}

/// Abstraction over the camera peripheral and its frame buffer.
pub trait FrameSource {
    /// Driver-specific failure detail.
    type Error: fmt::Debug;

    /// Powers the sensor, identifies it, and applies the preset.
    fn init(&mut self, preset: &CapturePreset) -> Result<SensorModel, Self::Error>;

    fn apply_tuning(&mut self, tuning: &SensorTuning) -> Result<(), Self::Error>;

    /// Captures one frame into the driver's buffer. `None` means no data.
    async fn grab(&mut self) -> Option<FrameGeometry>;

    /// Bytes of the most recently grabbed frame.
    fn frame(&self) -> &[u8];

    /// Returns the frame buffer to the driver for reuse.
    fn give_back(&mut self);

    fn deinit(&mut self) -> Result<(), Self::Error>;

    /// Drives the sensor power-down line to its inactive level.
    fn assert_power_down(&mut self);
}

/// Acquisition failures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AcquisitionError {
    /// The peripheral could not be initialised. Fatal; the device restarts.
    PeripheralInit,
    /// `acquire` was called before a successful `configure`.
    NotConfigured,
    /// A capture completed without data. Retryable.
    NoData,
    /// The previous artifact has not been released.
    Busy,
}

impl AcquisitionError {
    pub const fn is_fatal(self) -> bool {
        matches!(self, AcquisitionError::PeripheralInit)
    }
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionError::PeripheralInit => f.write_str("camera init failed"),
            AcquisitionError::NotConfigured => f.write_str("camera not configured"),
            AcquisitionError::NoData => f.write_str("capture returned no data"),
            AcquisitionError::Busy => f.write_str("frame buffer still in use"),
        }
    }
}

/// Sensor setup applied by [`AcquisitionUnit::configure`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SensorSetup {
    pub preset: CapturePreset,
    pub model: SensorModel,
    /// Tuning that was applied, if the sensor needed any.
    pub tuning: Option<SensorTuning>,
}

/// Exclusive handle on the frame currently held in the hardware buffer.
#[must_use = "artifacts must be released back to the acquisition unit"]
#[derive(Debug, Eq, PartialEq)]
pub struct ImageArtifact {
    ticket: u32,
    width: u16,
    height: u16,
    len: usize,
}

impl ImageArtifact {
    pub const fn width(&self) -> u16 {
        self.width
    }

    pub const fn height(&self) -> u16 {
        self.height
    }

    /// Encoded image size in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Arena owning the frame source and tracking the outstanding artifact.
pub struct AcquisitionUnit<S> {
    source: S,
    setup: Option<SensorSetup>,
    outstanding: Option<u32>,
    next_ticket: u32,
}

impl<S> AcquisitionUnit<S>
where
    S: FrameSource,
{
    pub const fn new(source: S) -> Self {
        Self {
            source,
            setup: None,
            outstanding: None,
            next_ticket: 0,
        }
    }

    /// Initialises the sensor with the preset for `memory`.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionError::PeripheralInit`] when the driver cannot
    /// bring the sensor up. A failed tuning step is not an error.
    pub fn configure(&mut self, memory: MemoryClass) -> Result<SensorSetup, AcquisitionError> {
        let preset = memory.preset();
        let model = self
            .source
            .init(&preset)
            .map_err(|_| AcquisitionError::PeripheralInit)?;

        let tuning = model
            .tuning()
            .filter(|tuning| self.source.apply_tuning(tuning).is_ok());

        let setup = SensorSetup {
            preset,
            model,
            tuning,
        };
        self.setup = Some(setup);
        Ok(setup)
    }

    pub const fn setup(&self) -> Option<&SensorSetup> {
        self.setup.as_ref()
    }

    /// Returns `true` while an artifact has not been released.
    pub const fn is_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Captures one frame and lends it out as an artifact.
    ///
    /// # Errors
    ///
    /// [`AcquisitionError::NoData`] when the capture was empty,
    /// [`AcquisitionError::Busy`] while the previous artifact is outstanding,
    /// and [`AcquisitionError::NotConfigured`] before [`Self::configure`].
    pub async fn acquire(&mut self) -> Result<ImageArtifact, AcquisitionError> {
        if self.setup.is_none() {
            return Err(AcquisitionError::NotConfigured);
        }
        if self.outstanding.is_some() {
            return Err(AcquisitionError::Busy);
        }

        let Some(geometry) = self.source.grab().await else {
            return Err(AcquisitionError::NoData);
        };
        let len = self.source.frame().len();
        if len == 0 {
            self.source.give_back();
            return Err(AcquisitionError::NoData);
        }

        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.wrapping_add(1);
        self.outstanding = Some(ticket);

        Ok(ImageArtifact {
            ticket,
            width: geometry.width,
            height: geometry.height,
            len,
        })
    }

    /// Encoded bytes behind an outstanding artifact.
    pub fn bytes(&self, artifact: &ImageArtifact) -> &[u8] {
        assert_eq!(
            self.outstanding,
            Some(artifact.ticket),
            "artifact does not belong to the outstanding frame"
        );
        let frame = self.source.frame();
        &frame[..artifact.len.min(frame.len())]
    }

    /// Returns the frame buffer to the driver.
    pub fn release(&mut self, artifact: ImageArtifact) {
        assert_eq!(
            self.outstanding,
            Some(artifact.ticket),
            "released artifact does not match the outstanding frame"
        );
        self.source.give_back();
        self.outstanding = None;
    }

    /// De-initialises the peripheral and asserts its power-down line.
    ///
    /// The power-down line is asserted even when de-initialisation fails.
    ///
    /// # Errors
    ///
    /// Returns the driver error from de-initialisation.
    pub fn shut_down(&mut self) -> Result<(), S::Error> {
        if self.outstanding.take().is_some() {
            self.source.give_back();
        }
        let result = if self.setup.take().is_some() {
            self.source.deinit()
        } else {
            Ok(())
        };
        self.source.assert_power_down();
        result
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}
