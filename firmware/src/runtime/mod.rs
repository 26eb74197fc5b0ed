use core::time::Duration;

use camnode_core::capture::{MemoryClass, SENSOR_XCLK_HZ};
use camnode_core::config::{CycleTiming, DeviceConfig};
use camnode_core::cycle::CycleController;
use embassy_executor::Spawner;
use embassy_net::{Runner, StackResources};
use esp_alloc as _;
use esp_backtrace as _;
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::lcd_cam::LcdCam;
use esp_hal::lcd_cam::cam::{Camera, Config as CamConfig};
use esp_hal::rng::Rng;
use esp_hal::rtc_cntl::Rtc;
use esp_hal::rtc_cntl::sleep::TimerWakeupSource;
use esp_hal::system::software_reset;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_println as _;
use esp_radio::Controller;
use esp_radio::wifi::WifiDevice;

use crate::hw::{DvpCamera, RtcSleep, WifiStation};
use crate::net::{RX_BUFFER_LEN, StackConnector, TX_BUFFER_LEN};
use crate::telemetry::{ConsoleSink, EmbassyClock};

esp_bootloader_esp_idf::esp_app_desc!();

macro_rules! mk_static {
    ($t:ty, $val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        STATIC_CELL.init($val)
    }};
}

const WIFI_SSID: &str = env!("CAMNODE_WIFI_SSID");
const WIFI_PASSWORD: &str = env!("CAMNODE_WIFI_PASSWORD");
const ENDPOINT: &str = env!("CAMNODE_ENDPOINT");
const DEVICE_ID: &str = env!("CAMNODE_DEVICE_ID");
const API_KEY: &str = env!("CAMNODE_API_KEY");
const WAKE_INTERVAL_SECS: Option<&str> = option_env!("CAMNODE_WAKE_INTERVAL_SECS");

/// Internal heap kept for the radio, which cannot allocate from PSRAM.
const INTERNAL_HEAP_BYTES: usize = 72 * 1024;

fn device_config() -> Result<DeviceConfig, camnode_core::config::ConfigError> {
    let mut timing = CycleTiming::DEFAULT;
    if let Some(secs) = WAKE_INTERVAL_SECS.and_then(|secs| secs.parse::<u64>().ok()) {
        timing = timing.with_wake_interval(Duration::from_secs(secs));
    }
    Ok(DeviceConfig::from_parts(WIFI_SSID, WIFI_PASSWORD, ENDPOINT, DEVICE_ID, API_KEY)?
        .with_timing(timing))
}

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));
    let wake_cause = esp_hal::rtc_cntl::wakeup_cause();
    defmt::info!(
        "camnode: boot cpu={} wake-cause={}",
        CpuClock::max(),
        defmt::Debug2Format(&wake_cause)
    );

    // The flash LED shares no state with the cycle; keep it dark.
    let _flash = Output::new(peripherals.GPIO2, Level::Low, OutputConfig::default());

    esp_alloc::heap_allocator!(size: INTERNAL_HEAP_BYTES);
    let (_, psram_len) = esp_hal::psram::psram_raw_parts(&peripherals.PSRAM);
    let memory = if psram_len > 0 {
        esp_alloc::psram_allocator!(&peripherals.PSRAM, esp_hal::psram);
        MemoryClass::Abundant
    } else {
        MemoryClass::Constrained
    };
    defmt::info!("camnode: memory {} ({} bytes psram)", defmt::Debug2Format(&memory), psram_len);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let mut rtc = Rtc::new(peripherals.LPWR);
    let config = match device_config() {
        Ok(config) => config,
        Err(err) => {
            defmt::error!("camnode: invalid build configuration: {}", defmt::Display2Format(&err));
            let timer = TimerWakeupSource::new(CycleTiming::DEFAULT.wake_interval);
            rtc.sleep_deep(&[&timer]);
        }
    };

    let radio = match esp_radio::init() {
        Ok(radio) => mk_static!(Controller<'static>, radio),
        Err(err) => {
            defmt::error!("camnode: radio init failed: {:?}", err);
            software_reset();
        }
    };
    let (controller, interfaces) =
        match esp_radio::wifi::new(radio, peripherals.WIFI, Default::default()) {
            Ok(parts) => parts,
            Err(err) => {
                defmt::error!("camnode: wifi init failed: {:?}", err);
                software_reset();
            }
        };

    let rng = Rng::new();
    let seed = (u64::from(rng.random()) << 32) | u64::from(rng.random());
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        mk_static!(StackResources<3>, StackResources::<3>::new()),
        seed,
    );
    if spawner.spawn(net_task(runner)).is_err() {
        defmt::error!("camnode: failed to spawn network task");
        software_reset();
    }

    let camera = match Camera::new(
        LcdCam::new(peripherals.LCD_CAM).cam,
        peripherals.DMA_CH0,
        CamConfig::default().with_frequency(Rate::from_hz(SENSOR_XCLK_HZ)),
    ) {
        Ok(camera) => camera
            .with_master_clock(peripherals.GPIO15)
            .with_pixel_clock(peripherals.GPIO13)
            .with_vsync(peripherals.GPIO6)
            .with_h_enable(peripherals.GPIO7)
            .with_data0(peripherals.GPIO11)
            .with_data1(peripherals.GPIO9)
            .with_data2(peripherals.GPIO8)
            .with_data3(peripherals.GPIO10)
            .with_data4(peripherals.GPIO12)
            .with_data5(peripherals.GPIO18)
            .with_data6(peripherals.GPIO17)
            .with_data7(peripherals.GPIO16),
        Err(err) => {
            defmt::error!("camnode: camera peripheral rejected config: {:?}", err);
            software_reset();
        }
    };
    let sccb = match I2c::new(
        peripherals.I2C0,
        I2cConfig::default().with_frequency(Rate::from_khz(100)),
    ) {
        Ok(i2c) => i2c.with_sda(peripherals.GPIO4).with_scl(peripherals.GPIO5),
        Err(err) => {
            defmt::error!("camnode: sccb bus rejected config: {:?}", err);
            software_reset();
        }
    };
    let pwdn = Output::new(peripherals.GPIO1, Level::High, OutputConfig::default());

    let connector = StackConnector::new(
        stack,
        mk_static!([u8; RX_BUFFER_LEN], [0; RX_BUFFER_LEN]),
        mk_static!([u8; TX_BUFFER_LEN], [0; TX_BUFFER_LEN]),
    );
    let wake_interval = config.timing.wake_interval;

    let cycle = CycleController::new(
        config,
        memory,
        WifiStation::new(controller, stack),
        DvpCamera::new(camera, sccb, pwdn),
        connector,
        RtcSleep::new(rtc, wake_interval),
        EmbassyClock,
        ConsoleSink,
    );

    match cycle.run().await {
        Ok(report) => defmt::warn!(
            "camnode: suspend returned after {}; restarting",
            defmt::Display2Format(&report.outcome)
        ),
        Err(fault) => defmt::error!("camnode: {}", defmt::Display2Format(&fault)),
    }
    software_reset();
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await;
}
