//! DVP camera on the LCD_CAM peripheral with SCCB register access.

use alloc::boxed::Box;
use alloc::vec;

use camnode_core::capture::{CapturePreset, FrameGeometry, FrameSize, FrameSource, SensorModel, SensorTuning};
use embassy_time::{Duration, Instant, Timer};
use esp_hal::Blocking;
use esp_hal::delay::Delay;
use esp_hal::dma::{DmaBufError, DmaRxBuf};
use esp_hal::gpio::Output;
use esp_hal::i2c::master::{Error as I2cError, I2c};
use esp_hal::lcd_cam::cam::Camera;

/// SCCB address of OV2640-class sensors (8-bit registers).
const SCCB_ADDR_8BIT: u8 = 0x30;
/// SCCB address of OV3660/OV5640-class sensors (16-bit registers).
const SCCB_ADDR_16BIT: u8 = 0x3C;

/// Largest encoded frame the DMA buffer accepts.
const FRAME_CAPACITY: usize = 192 * 1024;
const GRAB_TIMEOUT: Duration = Duration::from_secs(3);
const GRAB_POLL: Duration = Duration::from_millis(5);

#[derive(Debug)]
pub enum CameraError {
    Sccb(I2cError),
    NoSensor,
    Dma(DmaBufError),
    FrameLent,
}

impl From<I2cError> for CameraError {
    fn from(err: I2cError) -> Self {
        CameraError::Sccb(err)
    }
}

pub struct DvpCamera {
    sccb: I2c<'static, Blocking>,
    pwdn: Output<'static>,
    camera: Option<Camera<'static>>,
    buffer: Option<DmaRxBuf>,
    address: u8,
    geometry: FrameGeometry,
    frame_len: usize,
    lent: bool,
}

impl DvpCamera {
    pub fn new(camera: Camera<'static>, sccb: I2c<'static, Blocking>, pwdn: Output<'static>) -> Self {
        Self {
            sccb,
            pwdn,
            camera: Some(camera),
            buffer: None,
            address: SCCB_ADDR_8BIT,
            geometry: FrameGeometry {
                width: 0,
                height: 0,
            },
            frame_len: 0,
            lent: false,
        }
    }

    fn write8(&mut self, reg: u8, value: u8) -> Result<(), I2cError> {
        self.sccb.write(self.address, &[reg, value])
    }

    fn write16(&mut self, reg: u16, value: u8) -> Result<(), I2cError> {
        let [hi, lo] = reg.to_be_bytes();
        self.sccb.write(self.address, &[hi, lo, value])
    }

    fn read8(&mut self, reg: u8) -> Result<u8, I2cError> {
        let mut value = [0u8];
        self.sccb.write_read(self.address, &[reg], &mut value)?;
        Ok(value[0])
    }

    fn read16(&mut self, reg: u16) -> Result<u8, I2cError> {
        let mut value = [0u8];
        self.sccb
            .write_read(self.address, &reg.to_be_bytes(), &mut value)?;
        Ok(value[0])
    }

    fn wide_registers(&self) -> bool {
        self.address == SCCB_ADDR_16BIT
    }

    /// Reads the product id, trying both SCCB register widths.
    fn probe(&mut self) -> Result<SensorModel, CameraError> {
        self.address = SCCB_ADDR_8BIT;
        // Sensor bank holds PIDH/PIDL on OV2640.
        if self.write8(0xFF, 0x01).is_ok() {
            let pid = u16::from_be_bytes([self.read8(0x0A)?, self.read8(0x0B)?]);
            return Ok(SensorModel::from_product_id(pid));
        }

        self.address = SCCB_ADDR_16BIT;
        let pid = u16::from_be_bytes([self.read16(0x300A)?, self.read16(0x300B)?]);
        if pid == 0 || pid == 0xFFFF {
            return Err(CameraError::NoSensor);
        }
        Ok(SensorModel::from_product_id(pid))
    }

    fn apply_preset(&mut self, preset: &CapturePreset) -> Result<(), I2cError> {
        let (width, height) = preset.frame_size.dimensions();
        let delay = Delay::new();

        if self.wide_registers() {
            self.write16(0x3008, 0x82)?;
            delay.delay_millis(10);
            let [w_hi, w_lo] = width.to_be_bytes();
            let [h_hi, h_lo] = height.to_be_bytes();
            self.write16(0x3808, w_hi)?;
            self.write16(0x3809, w_lo)?;
            self.write16(0x380A, h_hi)?;
            self.write16(0x380B, h_lo)?;
            self.write16(0x4407, preset.jpeg_quality)?;
            self.write16(0x3008, 0x02)
        } else {
            self.write8(0xFF, 0x01)?;
            self.write8(0x12, 0x80)?;
            delay.delay_millis(10);
            let zoom_w = width / 4;
            let zoom_h = height / 4;
            self.write8(0xFF, 0x00)?;
            self.write8(0x5A, zoom_w.to_le_bytes()[0])?;
            self.write8(0x5B, zoom_h.to_le_bytes()[0])?;
            let high_bits = ((zoom_h >> 6) & 0x04) | ((zoom_w >> 8) & 0x03);
            self.write8(0x5C, high_bits.to_le_bytes()[0])?;
            self.write8(0x44, preset.jpeg_quality)
        }
    }

    fn restore(&mut self, camera: Camera<'static>, buffer: DmaRxBuf) {
        self.camera = Some(camera);
        self.buffer = Some(buffer);
    }
}

impl FrameSource for DvpCamera {
    type Error = CameraError;

    fn init(&mut self, preset: &CapturePreset) -> Result<SensorModel, CameraError> {
        self.pwdn.set_low();
        Delay::new().delay_millis(10);

        let model = self.probe()?;
        self.apply_preset(preset)?;

        let (width, height) = preset.frame_size.dimensions();
        self.geometry = FrameGeometry { width, height };

        let (descriptors, _) = esp_hal::dma_descriptors!(FRAME_CAPACITY, 0);
        let storage = Box::leak(vec![0u8; frame_capacity(preset.frame_size)].into_boxed_slice());
        self.buffer = Some(DmaRxBuf::new(descriptors, storage).map_err(CameraError::Dma)?);
        Ok(model)
    }

    fn apply_tuning(&mut self, tuning: &SensorTuning) -> Result<(), CameraError> {
        if self.wide_registers() {
            if tuning.vertical_flip {
                self.write16(0x3820, 0x46)?;
            }
            self.write16(0x5587, tuning.brightness.unsigned_abs() << 4)?;
            self.write16(0x5588, if tuning.brightness < 0 { 0x09 } else { 0x01 })?;
            self.write16(0x5583, stepped_register(tuning.saturation))?;
            self.write16(0x5584, stepped_register(tuning.saturation))?;
        } else {
            if tuning.vertical_flip {
                self.write8(0xFF, 0x01)?;
                self.write8(0x04, 0x50)?;
            }
            self.write8(0xFF, 0x00)?;
            self.write8(0x7C, 0x09)?;
            self.write8(0x7D, stepped_register(tuning.brightness))?;
        }
        Ok(())
    }

    async fn grab(&mut self) -> Option<FrameGeometry> {
        if self.lent {
            return None;
        }
        let camera = self.camera.take()?;
        let Some(buffer) = self.buffer.take() else {
            self.camera = Some(camera);
            return None;
        };

        let transfer = match camera.receive(buffer) {
            Ok(transfer) => transfer,
            Err((err, camera, buffer)) => {
                defmt::warn!("camera: dma start failed: {:?}", err);
                self.restore(camera, buffer);
                return None;
            }
        };

        let started = Instant::now();
        while !transfer.is_done() && started.elapsed() < GRAB_TIMEOUT {
            Timer::after(GRAB_POLL).await;
        }
        if !transfer.is_done() {
            let (camera, buffer) = transfer.stop();
            self.restore(camera, buffer);
            return None;
        }
        let (result, camera, buffer) = transfer.wait();
        self.restore(camera, buffer);
        if result.is_err() {
            return None;
        }

        let len = self.buffer.as_ref().and_then(|buffer| jpeg_len(buffer.as_slice()))?;
        self.frame_len = len;
        self.lent = true;
        Some(self.geometry)
    }

    fn frame(&self) -> &[u8] {
        match &self.buffer {
            Some(buffer) if self.lent => &buffer.as_slice()[..self.frame_len],
            _ => &[],
        }
    }

    fn give_back(&mut self) {
        self.lent = false;
        self.frame_len = 0;
    }

    fn deinit(&mut self) -> Result<(), CameraError> {
        if self.lent {
            return Err(CameraError::FrameLent);
        }
        self.camera = None;
        self.buffer = None;
        Ok(())
    }

    fn assert_power_down(&mut self) {
        self.pwdn.set_high();
    }
}

const fn frame_capacity(frame_size: FrameSize) -> usize {
    match frame_size {
        FrameSize::Uxga => FRAME_CAPACITY,
        FrameSize::Svga => 64 * 1024,
    }
}

/// Length of the JPEG stream at the start of `bytes`, through the EOI marker.
fn jpeg_len(bytes: &[u8]) -> Option<usize> {
    if bytes.get(..2)? != [0xFF, 0xD8] {
        return None;
    }
    bytes
        .windows(2)
        .skip(2)
        .position(|pair| pair == [0xFF, 0xD9])
        .map(|index| index + 4)
}

/// Signed tuning step applied around the sensor's neutral register value.
fn stepped_register(level: i8) -> u8 {
    let value = 0x40 + i16::from(level) * 0x10;
    u8::try_from(value.clamp(0, 0xFF)).unwrap_or(0x40)
}
