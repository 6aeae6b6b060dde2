use core::cell::RefCell;
use critical_section::Mutex;
use esp_hal::Blocking;
use esp_hal::gpio::interconnect::PeripheralOutput;
use esp_hal::i2c::master::Config as I2cConfig;
use esp_hal::i2c::master::{Error as I2cError, I2c, Instance};
use esp_hal::time::Rate;

static I2C: Mutex<RefCell<Option<I2c<Blocking>>>> = Mutex::new(RefCell::new(None));

/// Bring up the shared I2C master bus.
///
/// 400 kHz is the ceiling of the TCA9555, the only device on this bus.
///
/// # Panics
///
/// Panics when the controller cannot be configured; the panel is dead without
/// its expander, so there is nothing to fall back to.
pub async fn init(
    i2c: impl Instance + 'static,
    sda: impl PeripheralOutput<'static>,
    scl: impl PeripheralOutput<'static>,
) {
    let i2c = I2c::new(
        i2c,
        I2cConfig::default().with_frequency(Rate::from_khz(400)),
    )
    .expect("Failed to initialize I2C")
    .with_sda(sda)
    .with_scl(scl);

    critical_section::with(|cs| {
        I2C.borrow_ref_mut(cs).replace(i2c);
    });
}

/// Run a closure against the shared bus.
pub fn with_i2c<F, R>(f: F) -> Result<R, I2cError>
where
    F: FnOnce(&mut I2c<Blocking>) -> Result<R, I2cError>,
{
    critical_section::with(|cs| {
        let mut i2c_ref = I2C.borrow_ref_mut(cs);
        let i2c = i2c_ref.as_mut().expect("I2C bus used before init");
        f(i2c)
    })
}
