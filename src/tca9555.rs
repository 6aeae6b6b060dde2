use crate::i2c;
use defmt::info;
use esp_hal::i2c::master::Error as I2cError;

pub const TCA9555_ADDR: u8 = 0x20; // 7-bit address, A2..A0 strapped low

// Register map, one 8-bit pair per function
pub mod registers {
    pub const INPUT_PORT_0: u8 = 0;
    pub const INPUT_PORT_1: u8 = 1;
    pub const OUTPUT_PORT_0: u8 = 2;
    pub const OUTPUT_PORT_1: u8 = 3;
    pub const INVERSION_PORT_0: u8 = 4;
    pub const INVERSION_PORT_1: u8 = 5;
    pub const CONFIG_PORT_0: u8 = 6;
    pub const CONFIG_PORT_1: u8 = 7;
}

// Panel control lines (P0: bit 0~7, P1: bit 8~15). Everything the panel
// needs lives on port 1; port 0 is unpopulated on this board.
pub mod io_bits {
    pub const PANEL_RST_IO: u16 = 0x0400; // P1.2
    pub const PANEL_SCL_IO: u16 = 0x2000; // P1.5
    pub const PANEL_SDA_IO: u16 = 0x4000; // P1.6
    pub const PANEL_CS_IO: u16 = 0x8000; // P1.7
}

/// Port 1 output lines driving the panel, with a write-through shadow so
/// every level change costs exactly one bus write.
pub struct PanelPins {
    shadow: u8,
}

impl PanelPins {
    /// Set one panel control line. `bit` is one of [`io_bits`].
    pub fn set(&mut self, bit: u16, level: bool) -> Result<(), I2cError> {
        let mask = (bit >> 8) as u8;
        let next = if level {
            self.shadow | mask
        } else {
            self.shadow & !mask
        };
        if next == self.shadow {
            return Ok(());
        }
        i2c::with_i2c(|i2c| i2c.write(TCA9555_ADDR, &[registers::OUTPUT_PORT_1, next]))?;
        self.shadow = next;
        Ok(())
    }
}

/// Probe and configure the expander: return it to power-on defaults, then
/// claim the panel control lines as outputs at their idle levels (CS and
/// reset high, clock and data low).
pub fn init() -> Result<PanelPins, I2cError> {
    software_reset()?;

    let idle = ((io_bits::PANEL_CS_IO | io_bits::PANEL_RST_IO) >> 8) as u8;
    let outputs =
        ((io_bits::PANEL_CS_IO | io_bits::PANEL_RST_IO | io_bits::PANEL_SCL_IO | io_bits::PANEL_SDA_IO)
            >> 8) as u8;

    i2c::with_i2c(|i2c| {
        // Latch idle levels before flipping the lines to output so the panel
        // never sees a glitch on CS.
        i2c.write(TCA9555_ADDR, &[registers::OUTPUT_PORT_1, idle])?;
        i2c.write(TCA9555_ADDR, &[registers::CONFIG_PORT_0, 0xFF])?;
        i2c.write(TCA9555_ADDR, &[registers::CONFIG_PORT_1, !outputs])
    })?;

    info!("TCA9555 found and configured");
    Ok(PanelPins { shadow: idle })
}

/// The TCA9555 has no reset command; restore the datasheet power-on values
/// register by register instead.
fn software_reset() -> Result<(), I2cError> {
    i2c::with_i2c(|i2c| {
        i2c.write(TCA9555_ADDR, &[registers::OUTPUT_PORT_0, 0xFF])?;
        i2c.write(TCA9555_ADDR, &[registers::OUTPUT_PORT_1, 0xFF])?;
        i2c.write(TCA9555_ADDR, &[registers::INVERSION_PORT_0, 0x00])?;
        i2c.write(TCA9555_ADDR, &[registers::INVERSION_PORT_1, 0x00])?;
        i2c.write(TCA9555_ADDR, &[registers::CONFIG_PORT_0, 0xFF])?;
        i2c.write(TCA9555_ADDR, &[registers::CONFIG_PORT_1, 0xFF])
    })
}

/// Read back both input ports, high byte P1, low byte P0. Diagnostic only.
#[allow(unused)]
pub fn read_input_ports() -> Result<u16, I2cError> {
    i2c::with_i2c(|i2c| {
        let mut port0 = [0u8];
        let mut port1 = [0u8];
        i2c.write_read(TCA9555_ADDR, &[registers::INPUT_PORT_0], &mut port0)?;
        i2c.write_read(TCA9555_ADDR, &[registers::INPUT_PORT_1], &mut port1)?;
        Ok((port1[0] as u16) << 8 | port0[0] as u16)
    })
}
