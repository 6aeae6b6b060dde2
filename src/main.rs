#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]

use defmt::{info, warn};
use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::dma_loop_buffer;
use esp_hal::gpio::Level;
use esp_hal::lcd_cam::LcdCam;
use esp_hal::lcd_cam::lcd::dpi::{Config as DpiConfig, Dpi, Format, FrameTiming};
use esp_hal::lcd_cam::lcd::{ClockMode, Phase, Polarity};
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use {esp_backtrace as _, esp_println as _};

mod backlight;
mod config;
mod i2c;
mod spi3w;
mod st7701;
mod tca9555;
mod wifi;

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

// Panel geometry, fixed by the glass
const PANEL_WIDTH: usize = 480;

#[esp_rtos::main]
async fn main(spawner: Spawner) {
    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    esp_alloc::heap_allocator!(size: 96 * 1024);

    let time_g0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(time_g0.timer0);

    info!("Embassy initialized!");

    // The station link is optional: no credentials, no radio.
    if config::WIFI_SSID.is_empty() {
        info!("no station credentials configured, staying offline");
    } else {
        let station = wifi::StationConfig {
            ssid: config::WIFI_SSID,
            password: config::WIFI_PASSWORD,
            auth_method: config::auth_method(),
            max_retries: config::WIFI_MAX_RETRIES,
        };
        let mut link = wifi::start(spawner, peripherals.WIFI, station)
            .await
            .expect("failed to start wifi station");
        match link
            .await_outcome(Some(Duration::from_secs(config::WIFI_WAIT_SECS)))
            .await
        {
            wifi::WaitResult::Connected => info!("network link ready"),
            wifi::WaitResult::Failed => warn!("network link failed, continuing offline"),
            wifi::WaitResult::TimedOut => {
                warn!("network link still pending, continuing offline")
            }
        }
    }

    // Panel control path: I2C -> TCA9555 -> bit-banged 3-wire SPI
    i2c::init(peripherals.I2C1, peripherals.GPIO17, peripherals.GPIO18).await;
    let pins = tca9555::init().expect("failed to configure IO expander");

    let bus = spi3w::ThreeWireBus::new(pins);
    let mut panel = st7701::St7701::new(bus);
    panel.init().await.expect("panel initialization failed");

    // Pixel path: LCD_CAM in DPI mode, 16-bit RGB565 bus, 480x480@60Hz.
    // Timing constants come with the panel; DE is not wired on this board.
    let lcd_cam = LcdCam::new(peripherals.LCD_CAM);
    let dpi_config = DpiConfig::default()
        .with_frequency(Rate::from_mhz(16))
        .with_clock_mode(ClockMode {
            polarity: Polarity::IdleLow,
            phase: Phase::ShiftLow,
        })
        .with_format(Format {
            enable_2byte_mode: true,
            ..Default::default()
        })
        .with_timing(FrameTiming {
            horizontal_active_width: 480,
            horizontal_total_width: 510,
            horizontal_blank_front_porch: 10,
            vertical_active_height: 480,
            vertical_total_height: 508,
            vertical_blank_front_porch: 8,
            hsync_width: 10,
            vsync_width: 2,
            hsync_position: 0,
        })
        .with_vsync_idle_level(Level::High)
        .with_hsync_idle_level(Level::High)
        .with_de_idle_level(Level::Low)
        .with_disable_black_region(false);

    let dpi = Dpi::new(lcd_cam.lcd, peripherals.DMA_CH2, dpi_config)
        .expect("failed to configure DPI output")
        .with_pclk(peripherals.GPIO41)
        .with_vsync(peripherals.GPIO40)
        .with_hsync(peripherals.GPIO39)
        .with_data0(peripherals.GPIO1)
        .with_data1(peripherals.GPIO2)
        .with_data2(peripherals.GPIO3)
        .with_data3(peripherals.GPIO4)
        .with_data4(peripherals.GPIO5)
        .with_data5(peripherals.GPIO6)
        .with_data6(peripherals.GPIO7)
        .with_data7(peripherals.GPIO8)
        .with_data8(peripherals.GPIO9)
        .with_data9(peripherals.GPIO10)
        .with_data10(peripherals.GPIO11)
        .with_data11(peripherals.GPIO12)
        .with_data12(peripherals.GPIO13)
        .with_data13(peripherals.GPIO42)
        .with_data14(peripherals.GPIO46)
        .with_data15(peripherals.GPIO45);

    // One scanline, looped by the DMA engine: vertical color bars prove the
    // data path without a full framebuffer.
    let mut dma_buf = dma_loop_buffer!(PANEL_WIDTH * 2);
    const BARS: [u16; 6] = [0xF800, 0x07E0, 0x001F, 0xFFE0, 0xFFFF, 0x0000];
    for (x, chunk) in dma_buf.chunks_mut(2).enumerate() {
        let color = BARS[x / (PANEL_WIDTH / BARS.len())];
        chunk.copy_from_slice(&color.to_le_bytes());
    }

    let _transfer = dpi
        .send(false, dma_buf)
        .map_err(|e| e.0)
        .expect("failed to start RGB refresh");
    info!("RGB refresh running");

    let _bl_channel = backlight::init(
        peripherals.LEDC,
        peripherals.GPIO14,
        config::BACKLIGHT_DUTY_PCT,
    );

    info!("panel bring-up complete");

    loop {
        Timer::after(Duration::from_secs(5)).await;
    }
}
