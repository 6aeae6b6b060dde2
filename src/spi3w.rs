//! Write-only 3-wire SPI command channel, bit-banged through the IO expander.
//!
//! The panel's configuration interface is a 9-bit SPI word: a D/C marker bit
//! followed by the data byte, MSB first, latched on the rising clock edge,
//! with CS framing every word. The lines hang off the TCA9555 rather than a
//! hardware SPI peripheral, so each edge is one I2C write. Slow, but the
//! channel only ever carries the one-shot init sequence.

use crate::tca9555::{PanelPins, io_bits};
use esp_hal::i2c::master::Error as I2cError;

pub struct ThreeWireBus {
    pins: PanelPins,
}

impl ThreeWireBus {
    pub fn new(pins: PanelPins) -> Self {
        Self { pins }
    }

    pub fn write_command(&mut self, cmd: u8) -> Result<(), I2cError> {
        self.write_word(false, cmd)
    }

    pub fn write_data(&mut self, data: u8) -> Result<(), I2cError> {
        self.write_word(true, data)
    }

    /// Direct access to the expander lines, for the panel reset pin that
    /// shares the port with the SPI signals.
    pub fn pins_mut(&mut self) -> &mut PanelPins {
        &mut self.pins
    }

    fn write_word(&mut self, is_data: bool, byte: u8) -> Result<(), I2cError> {
        self.pins.set(io_bits::PANEL_CS_IO, false)?;
        self.shift_bit(is_data)?;
        let mut mask = 0x80u8;
        while mask != 0 {
            self.shift_bit(byte & mask != 0)?;
            mask >>= 1;
        }
        self.pins.set(io_bits::PANEL_CS_IO, true)
    }

    fn shift_bit(&mut self, bit: bool) -> Result<(), I2cError> {
        self.pins.set(io_bits::PANEL_SDA_IO, bit)?;
        self.pins.set(io_bits::PANEL_SCL_IO, true)?;
        self.pins.set(io_bits::PANEL_SCL_IO, false)
    }
}
