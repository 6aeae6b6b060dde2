use defmt::info;
use esp_hal::gpio::DriveMode;
use esp_hal::gpio::interconnect::PeripheralOutput;
use esp_hal::ledc::{
    LSGlobalClkSource, Ledc, LowSpeed,
    channel::{self, ChannelIFace as _},
    timer::{self, TimerIFace as _},
};
use esp_hal::peripherals::LEDC;
use esp_hal::time::Rate;
use static_cell::StaticCell;

static BACKLIGHT_TIMER: StaticCell<timer::Timer<'static, LowSpeed>> = StaticCell::new();

/// Drive the backlight pin from a low-speed LEDC channel at 1 kHz / 8-bit
/// resolution. The returned channel stays valid for the life of the firmware;
/// dropping it leaves the PWM running.
///
/// # Panics
///
/// Panics when the timer or channel rejects the configuration; a panel
/// without backlight is indistinguishable from a dead one.
pub fn init(
    ledc: LEDC<'static>,
    pin: impl PeripheralOutput<'static>,
    duty_pct: u8,
) -> channel::Channel<'static, LowSpeed> {
    let mut ledc = Ledc::new(ledc);
    ledc.set_global_slow_clock(LSGlobalClkSource::APBClk);

    let mut bl_timer = ledc.timer::<LowSpeed>(timer::Number::Timer0);
    bl_timer
        .configure(timer::config::Config {
            duty: timer::config::Duty::Duty8Bit,
            clock_source: timer::LSClockSource::APBClk,
            frequency: Rate::from_khz(1),
        })
        .expect("backlight timer config");
    let bl_timer = BACKLIGHT_TIMER.init(bl_timer);

    let mut bl_channel = ledc.channel::<LowSpeed>(channel::Number::Channel0, pin);
    bl_channel
        .configure(channel::config::Config {
            timer: &*bl_timer,
            duty_pct: duty_pct.min(100),
            drive_mode: DriveMode::PushPull,
        })
        .expect("backlight channel config");

    info!("backlight on at {}%", duty_pct.min(100));
    bl_channel
}
