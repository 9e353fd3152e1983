/*
 *  display/drivers/ssd1680.rs
 *
 *  inkmon - weather metrics on e-paper
 *  (c) 2020-26 Stuart Hunter
 *
 *  SSD1680 2.13" e-paper over spidev and sysfs GPIO
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use embedded_graphics::pixelcolor::BinaryColor;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiDevice;
use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::sysfs_gpio::Direction;
use linux_embedded_hal::{Delay, SpidevDevice, SysfsPin};
use log::{debug, info};
use std::time::{Duration, Instant};

use crate::config::BusConfig;
use crate::display::error::DisplayError;
use crate::display::framebuffer::FrameBuffer;
use crate::display::traits::{check_frame_size, ColorDepth, DisplayCapabilities, DisplayDriver};

/// Native geometry: gates run along the long edge
const NATIVE_WIDTH: usize = 122;
const NATIVE_HEIGHT: usize = 250;
const ROW_BYTES: usize = NATIVE_WIDTH.div_ceil(8);

/// Drawing geometry, landscape
pub const WIDTH: u32 = NATIVE_HEIGHT as u32;
pub const HEIGHT: u32 = NATIVE_WIDTH as u32;

/// A full refresh takes ~2-4 s; anything much longer is a wiring fault
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);
const BUSY_POLL_MS: u32 = 10;
/// spidev default bufsiz
const SPI_CHUNK: usize = 4096;

mod cmd {
    pub const DRIVER_OUTPUT_CONTROL: u8 = 0x01;
    pub const DEEP_SLEEP: u8 = 0x10;
    pub const DATA_ENTRY_MODE: u8 = 0x11;
    pub const SW_RESET: u8 = 0x12;
    pub const TEMP_SENSOR: u8 = 0x18;
    pub const MASTER_ACTIVATION: u8 = 0x20;
    pub const DISPLAY_UPDATE_CONTROL_1: u8 = 0x21;
    pub const DISPLAY_UPDATE_CONTROL_2: u8 = 0x22;
    pub const WRITE_RAM_BW: u8 = 0x24;
    pub const WRITE_RAM_RED: u8 = 0x26;
    pub const BORDER_WAVEFORM: u8 = 0x3C;
    pub const RAM_X_RANGE: u8 = 0x44;
    pub const RAM_Y_RANGE: u8 = 0x45;
    pub const RAM_X_COUNTER: u8 = 0x4E;
    pub const RAM_Y_COUNTER: u8 = 0x4F;
}

/// SSD1680 driver wrapper
pub struct Ssd1680Driver {
    spi: SpidevDevice,
    dc: SysfsPin,
    rst: SysfsPin,
    busy: SysfsPin,
    delay: Delay,
    capabilities: DisplayCapabilities,
    initialized: bool,
}

fn gpio_err(pin: u64, e: impl std::fmt::Debug) -> DisplayError {
    DisplayError::GpioError(format!("GPIO {}: {:?}", pin, e))
}

fn line_err<E: std::fmt::Debug>(line: &'static str) -> impl Fn(E) -> DisplayError {
    move |e| DisplayError::GpioError(format!("{}: {:?}", line, e))
}

fn open_pin(pin: u64, direction: Direction) -> Result<SysfsPin, DisplayError> {
    let p = SysfsPin::new(pin);
    p.export().map_err(|e| gpio_err(pin, e))?;
    p.set_direction(direction).map_err(|e| gpio_err(pin, e))?;
    Ok(p)
}

impl Ssd1680Driver {
    /// Open the SPI device and claim the DC, RST and BUSY lines.
    ///
    /// Nothing is sent to the panel until `init()`.
    pub fn new_spi(bus: &BusConfig, color_depth: ColorDepth) -> Result<Self, DisplayError> {
        info!(
            "Opening SSD1680 on {} (DC {}, RST {}, BUSY {})",
            bus.device, bus.dc_pin, bus.rst_pin, bus.busy_pin
        );

        let mut spi = SpidevDevice::open(&bus.device)
            .map_err(|e| DisplayError::SpiError(format!("Failed to open {}: {:?}", bus.device, e)))?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(bus.speed_hz.unwrap_or(4_000_000))
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        spi.configure(&options)
            .map_err(|e| DisplayError::SpiError(format!("Failed to configure {}: {}", bus.device, e)))?;

        let dc = open_pin(bus.dc_pin, Direction::Out)?;
        let rst = open_pin(bus.rst_pin, Direction::Out)?;
        let busy = open_pin(bus.busy_pin, Direction::In)?;

        Ok(Self {
            spi,
            dc,
            rst,
            busy,
            delay: Delay,
            capabilities: DisplayCapabilities {
                name: match color_depth {
                    ColorDepth::Monochrome => "SSD1680",
                    ColorDepth::TriColor => "SSD1680 (B/W/R)",
                },
                width: WIDTH,
                height: HEIGHT,
                color_depth,
                is_physical: true,
            },
            initialized: false,
        })
    }

    fn command(&mut self, command: u8) -> Result<(), DisplayError> {
        self.dc.set_low().map_err(line_err("DC"))?;
        self.spi
            .write(&[command])
            .map_err(|e| DisplayError::SpiError(format!("command 0x{:02X}: {:?}", command, e)))
    }

    fn data(&mut self, data: &[u8]) -> Result<(), DisplayError> {
        self.dc.set_high().map_err(line_err("DC"))?;
        for chunk in data.chunks(SPI_CHUNK) {
            self.spi
                .write(chunk)
                .map_err(|e| DisplayError::SpiError(format!("data: {:?}", e)))?;
        }
        Ok(())
    }

    fn command_with(&mut self, command: u8, data: &[u8]) -> Result<(), DisplayError> {
        self.command(command)?;
        self.data(data)
    }

    /// BUSY is high while the controller works.
    fn wait_busy(&mut self) -> Result<(), DisplayError> {
        let start = Instant::now();
        while self.busy.is_high().map_err(line_err("BUSY"))? {
            if start.elapsed() > BUSY_TIMEOUT {
                return Err(DisplayError::BusyTimeout(BUSY_TIMEOUT));
            }
            self.delay.delay_ms(BUSY_POLL_MS);
        }
        debug!("panel idle after {:?}", start.elapsed());
        Ok(())
    }

    fn hardware_reset(&mut self) -> Result<(), DisplayError> {
        self.rst.set_high().map_err(line_err("RST"))?;
        self.delay.delay_ms(20);
        self.rst.set_low().map_err(line_err("RST"))?;
        self.delay.delay_ms(2);
        self.rst.set_high().map_err(line_err("RST"))?;
        self.delay.delay_ms(20);
        Ok(())
    }

    fn set_ram_cursor(&mut self) -> Result<(), DisplayError> {
        self.command_with(cmd::RAM_X_COUNTER, &[0x00])?;
        self.command_with(cmd::RAM_Y_COUNTER, &[0x00, 0x00])
    }
}

/// Landscape frame to native RAM layout: rotate 90 degrees, 1 = white.
pub fn to_panel_buffer(frame: &FrameBuffer) -> Vec<u8> {
    let mut buf = vec![0xFFu8; ROW_BYTES * NATIVE_HEIGHT];
    let lw = frame.width();
    for ly in 0..frame.height().min(NATIVE_WIDTH) {
        for lx in 0..lw.min(NATIVE_HEIGHT) {
            if frame.get_pixel(lx, ly) != Some(BinaryColor::On) {
                continue;
            }
            let px = ly;
            let py = NATIVE_HEIGHT - 1 - lx;
            buf[py * ROW_BYTES + px / 8] &= !(0x80 >> (px % 8));
        }
    }
    buf
}

impl DisplayDriver for Ssd1680Driver {
    fn capabilities(&self) -> &DisplayCapabilities {
        &self.capabilities
    }

    fn init(&mut self) -> Result<(), DisplayError> {
        let last_gate = (NATIVE_HEIGHT - 1) as u16;
        let [gate_lo, gate_hi] = last_gate.to_le_bytes();

        self.hardware_reset()?;
        self.wait_busy()?;
        self.command(cmd::SW_RESET)?;
        self.wait_busy()?;

        self.command_with(cmd::DRIVER_OUTPUT_CONTROL, &[gate_lo, gate_hi, 0x00])?;
        // x increment, y increment
        self.command_with(cmd::DATA_ENTRY_MODE, &[0x03])?;
        self.command_with(cmd::RAM_X_RANGE, &[0x00, (ROW_BYTES - 1) as u8])?;
        self.command_with(cmd::RAM_Y_RANGE, &[0x00, 0x00, gate_lo, gate_hi])?;
        self.command_with(cmd::BORDER_WAVEFORM, &[0x05])?;
        self.command_with(cmd::DISPLAY_UPDATE_CONTROL_1, &[0x00, 0x80])?;
        // internal temperature sensor
        self.command_with(cmd::TEMP_SENSOR, &[0x80])?;
        self.set_ram_cursor()?;
        self.wait_busy()
            .map_err(|e| DisplayError::InitializationFailed(e.to_string()))?;

        self.initialized = true;
        info!("{} initialized", self.capabilities.name);
        Ok(())
    }

    fn update(&mut self, frame: &FrameBuffer) -> Result<(), DisplayError> {
        if !self.initialized {
            return Err(DisplayError::NotInitialized);
        }
        check_frame_size(&self.capabilities, frame)?;

        let black = to_panel_buffer(frame);
        self.set_ram_cursor()?;
        self.command_with(cmd::WRITE_RAM_BW, &black)?;
        if self.capabilities.color_depth == ColorDepth::TriColor {
            // red plane: 1 = red, so all zero
            self.set_ram_cursor()?;
            self.command_with(cmd::WRITE_RAM_RED, &vec![0u8; black.len()])?;
        }

        // full refresh with the OTP waveform
        self.command_with(cmd::DISPLAY_UPDATE_CONTROL_2, &[0xF7])?;
        self.command(cmd::MASTER_ACTIVATION)?;
        self.wait_busy()
    }

    fn sleep(&mut self) -> Result<(), DisplayError> {
        if !self.initialized {
            return Ok(());
        }
        info!("Putting {} to deep sleep", self.capabilities.name);
        self.command_with(cmd::DEEP_SLEEP, &[0x01])?;
        self.initialized = false;
        Ok(())
    }
}
