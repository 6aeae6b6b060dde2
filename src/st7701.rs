//! ST7701 panel configuration driver.
//!
//! The ST7701 takes its register setup over the 3-wire SPI channel while the
//! pixel data arrives on the separate 16-bit RGB bus. This module owns the
//! command side only: hardware reset, the vendor initialization table and the
//! sleep-out/display-on sequencing. The RGB timing lives with the DPI setup
//! in `main`.

use crate::spi3w::ThreeWireBus;
use crate::tca9555::io_bits;
use defmt::info;
use embassy_time::Timer;
use esp_hal::i2c::master::Error as I2cError;

// Standard command set
const CMD_SLPOUT: u8 = 0x11; // Sleep Out
const CMD_DISPON: u8 = 0x29; // Display ON
const CMD_MADCTL: u8 = 0x36; // Memory Data Access Control
const CMD_COLMOD: u8 = 0x3A; // Interface Pixel Format

struct PanelCommand {
    cmd: u8,
    data: &'static [u8],
}

// Vendor initialization table for this panel glass ("type 9" timing
// variant). The values are the manufacturer's, consumed verbatim: Command2
// bank selection (FFh), display line and porch setup, the gamma cluster in
// bank 0, the power/VCOM cluster in bank 1 and the GIP waveform programming.
const INIT_SEQUENCE: &[PanelCommand] = &[
    // Command2, BK0
    PanelCommand { cmd: 0xFF, data: &[0x77, 0x01, 0x00, 0x00, 0x10] },
    PanelCommand { cmd: 0xC0, data: &[0x3B, 0x00] }, // display line setting
    PanelCommand { cmd: 0xC1, data: &[0x0B, 0x02] }, // porch control
    PanelCommand { cmd: 0xC2, data: &[0x07, 0x02] }, // inversion, frame rate
    PanelCommand { cmd: 0xCC, data: &[0x10] },
    PanelCommand { cmd: 0xCD, data: &[0x08] },
    PanelCommand {
        cmd: 0xB0, // positive gamma
        data: &[
            0x00, 0x11, 0x18, 0x0E, 0x11, 0x06, 0x07, 0x08, 0x07, 0x22, 0x04, 0x12, 0x0F, 0xAA,
            0x31, 0x18,
        ],
    },
    PanelCommand {
        cmd: 0xB1, // negative gamma
        data: &[
            0x00, 0x11, 0x19, 0x0E, 0x12, 0x07, 0x08, 0x08, 0x08, 0x22, 0x04, 0x11, 0x11, 0xA9,
            0x32, 0x18,
        ],
    },
    // Command2, BK1: power rails and VCOM
    PanelCommand { cmd: 0xFF, data: &[0x77, 0x01, 0x00, 0x00, 0x11] },
    PanelCommand { cmd: 0xB0, data: &[0x60] }, // VOP
    PanelCommand { cmd: 0xB1, data: &[0x30] }, // VCOM
    PanelCommand { cmd: 0xB2, data: &[0x87] }, // VGH
    PanelCommand { cmd: 0xB3, data: &[0x80] },
    PanelCommand { cmd: 0xB5, data: &[0x49] }, // VGL
    PanelCommand { cmd: 0xB7, data: &[0x85] },
    PanelCommand { cmd: 0xB8, data: &[0x21] },
    PanelCommand { cmd: 0xC1, data: &[0x78] }, // source pre-drive
    PanelCommand { cmd: 0xC2, data: &[0x78] },
    // GIP waveform programming
    PanelCommand { cmd: 0xE0, data: &[0x00, 0x1B, 0x02] },
    PanelCommand {
        cmd: 0xE1,
        data: &[0x08, 0xA0, 0x00, 0x00, 0x07, 0xA0, 0x00, 0x00, 0x00, 0x44, 0x44],
    },
    PanelCommand {
        cmd: 0xE2,
        data: &[
            0x11, 0x11, 0x44, 0x44, 0xED, 0xA0, 0x00, 0x00, 0xEC, 0xA0, 0x00, 0x00,
        ],
    },
    PanelCommand { cmd: 0xE3, data: &[0x00, 0x00, 0x11, 0x11] },
    PanelCommand { cmd: 0xE4, data: &[0x44, 0x44] },
    PanelCommand {
        cmd: 0xE5,
        data: &[
            0x0A, 0xE9, 0xD8, 0xA0, 0x0C, 0xEB, 0xD8, 0xA0, 0x0E, 0xED, 0xD8, 0xA0, 0x10, 0xEF,
            0xD8, 0xA0,
        ],
    },
    PanelCommand { cmd: 0xE6, data: &[0x00, 0x00, 0x11, 0x11] },
    PanelCommand { cmd: 0xE7, data: &[0x44, 0x44] },
    PanelCommand {
        cmd: 0xE8,
        data: &[
            0x09, 0xE8, 0xD8, 0xA0, 0x0B, 0xEA, 0xD8, 0xA0, 0x0D, 0xEC, 0xD8, 0xA0, 0x0F, 0xEE,
            0xD8, 0xA0,
        ],
    },
    PanelCommand { cmd: 0xEB, data: &[0x02, 0x00, 0xE4, 0xE4, 0x88, 0x00, 0x40] },
    PanelCommand { cmd: 0xEC, data: &[0x3C, 0x00] },
    PanelCommand {
        cmd: 0xED,
        data: &[
            0xAB, 0x89, 0x76, 0x54, 0x02, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x20, 0x45, 0x67,
            0x98, 0xBA,
        ],
    },
    // back to Command1
    PanelCommand { cmd: 0xFF, data: &[0x77, 0x01, 0x00, 0x00, 0x00] },
    PanelCommand { cmd: CMD_MADCTL, data: &[0x00] },
    PanelCommand { cmd: CMD_COLMOD, data: &[0x50] }, // 16-bit RGB interface
];

/// ST7701 command-channel driver.
pub struct St7701 {
    bus: ThreeWireBus,
}

impl St7701 {
    pub fn new(bus: ThreeWireBus) -> Self {
        Self { bus }
    }

    /// Full bring-up: hardware reset, vendor table, sleep out, display on.
    pub async fn init(&mut self) -> Result<(), I2cError> {
        self.hardware_reset().await?;

        for command in INIT_SEQUENCE {
            self.write_command(command.cmd, command.data)?;
        }

        self.write_command(CMD_SLPOUT, &[])?;
        // The controller ignores everything for up to 120 ms after sleep out
        Timer::after_millis(120).await;

        self.write_command(CMD_DISPON, &[])?;
        Timer::after_millis(20).await;

        info!("ST7701 panel initialized");
        Ok(())
    }

    /// Reset pulse per datasheet: at least 10 us low, then 120 ms for the
    /// controller to reload its defaults.
    async fn hardware_reset(&mut self) -> Result<(), I2cError> {
        let pins = self.bus.pins_mut();
        pins.set(io_bits::PANEL_RST_IO, false)?;
        Timer::after_millis(10).await;
        pins.set(io_bits::PANEL_RST_IO, true)?;
        Timer::after_millis(120).await;
        Ok(())
    }

    fn write_command(&mut self, cmd: u8, data: &[u8]) -> Result<(), I2cError> {
        self.bus.write_command(cmd)?;
        for byte in data {
            self.bus.write_data(*byte)?;
        }
        Ok(())
    }
}
