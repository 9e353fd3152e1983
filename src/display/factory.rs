/*
 *  display/factory.rs
 *
 *  inkmon - weather metrics on e-paper
 *  (c) 2020-26 Stuart Hunter
 *
 *  Display driver factory for creating drivers from configuration
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

use log::info;
use std::path::Path;

use crate::config::{DisplayConfig, DriverKind};
use crate::display::drivers::file::FileDriver;
use crate::display::error::DisplayFactoryError;
use crate::display::traits::DisplayDriver;

#[cfg(feature = "driver-ssd1680")]
use crate::display::drivers::ssd1680::{self, Ssd1680Driver};
#[cfg(feature = "driver-ssd1680")]
use crate::display::traits::ColorDepth;

/// Type alias for boxed display driver trait objects
pub type BoxedDriver = Box<dyn DisplayDriver>;

/// Factory for creating display drivers from configuration
pub struct DisplayDriverFactory;

impl DisplayDriverFactory {
    /// Create a display driver from configuration
    ///
    /// An `output` path always wins and yields a file driver; otherwise the
    /// configured panel driver is opened. The driver is not initialized.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let config = DisplayConfig {
    ///     driver: Some(DriverKind::Ssd1680),
    ///     ..Default::default()
    /// };
    ///
    /// let driver = DisplayDriverFactory::create_from_config(&config, None)?;
    /// ```
    pub fn create_from_config(
        config: &DisplayConfig,
        output: Option<&Path>,
    ) -> Result<BoxedDriver, DisplayFactoryError> {
        Self::validate_config(config, output)?;

        if let Some(path) = output {
            info!("Rendering to {}", path.display());
            return Ok(Box::new(FileDriver::new(path, config.width(), config.height())));
        }

        let driver_kind = config.driver.ok_or(DisplayFactoryError::NoDriverSpecified)?;
        match driver_kind {
            DriverKind::File => Err(DisplayFactoryError::ConfigError(
                "file driver needs an output path (--output)".to_string(),
            )),

            #[cfg(feature = "driver-ssd1680")]
            DriverKind::Ssd1680 | DriverKind::Ssd1680TriColor => {
                let depth = if driver_kind == DriverKind::Ssd1680TriColor {
                    ColorDepth::TriColor
                } else {
                    ColorDepth::Monochrome
                };
                let bus = config.bus.clone().unwrap_or_default();
                Ok(Box::new(Ssd1680Driver::new_spi(&bus, depth)?))
            }

            #[cfg(not(feature = "driver-ssd1680"))]
            DriverKind::Ssd1680 | DriverKind::Ssd1680TriColor => {
                Err(DisplayFactoryError::DriverNotEnabled("driver-ssd1680"))
            }
        }
    }

    /// Validate a configuration without creating a driver
    ///
    /// This is useful for checking configuration at startup before attempting
    /// to initialize hardware.
    pub fn validate_config(config: &DisplayConfig, output: Option<&Path>) -> Result<(), DisplayFactoryError> {
        if output.is_none() && config.driver.is_none() {
            return Err(DisplayFactoryError::NoDriverSpecified);
        }

        if config.width() == 0 || config.height() == 0 {
            return Err(DisplayFactoryError::ConfigError(format!(
                "Invalid display size {}x{}",
                config.width(),
                config.height()
            )));
        }

        #[cfg(feature = "driver-ssd1680")]
        if output.is_none()
            && matches!(config.driver, Some(DriverKind::Ssd1680 | DriverKind::Ssd1680TriColor))
        {
            if (config.width(), config.height()) != (ssd1680::WIDTH, ssd1680::HEIGHT) {
                return Err(DisplayFactoryError::ConfigError(format!(
                    "SSD1680 panel is {}x{}, got {}x{}",
                    ssd1680::WIDTH,
                    ssd1680::HEIGHT,
                    config.width(),
                    config.height()
                )));
            }
            if let Some(bus) = config.bus.as_ref() {
                if bus.dc_pin == bus.rst_pin || bus.dc_pin == bus.busy_pin || bus.rst_pin == bus.busy_pin {
                    return Err(DisplayFactoryError::ConfigError(
                        "dc_pin, rst_pin and busy_pin must differ".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}
