/*
 *  display/error.rs
 *
 *  inkmon - weather metrics on e-paper
 *  (c) 2020-26 Stuart Hunter
 *
 *  Unified error types for display subsystem
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

use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Unified error type for all display operations
#[derive(Debug)]
pub enum DisplayError {
    /// Hardware initialization failed
    InitializationFailed(String),

    /// SPI communication error
    SpiError(String),

    /// GPIO pin error
    GpioError(String),

    /// Panel kept BUSY asserted for too long
    BusyTimeout(Duration),

    /// update() called before init()
    NotInitialized,

    /// Invalid configuration
    InvalidConfiguration(String),

    /// Frame size does not match the panel
    BufferSizeMismatch { expected: usize, actual: usize },

    /// Drawing operation failed
    DrawingError(String),

    /// Writing an image file failed
    Io(std::io::Error),
}

impl fmt::Display for DisplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayError::InitializationFailed(msg) =>
                write!(f, "Display initialization failed: {}", msg),
            DisplayError::SpiError(msg) =>
                write!(f, "SPI communication error: {}", msg),
            DisplayError::GpioError(msg) =>
                write!(f, "GPIO error: {}", msg),
            DisplayError::BusyTimeout(waited) =>
                write!(f, "Panel still busy after {:?}", waited),
            DisplayError::NotInitialized =>
                write!(f, "Display used before init()"),
            DisplayError::InvalidConfiguration(msg) =>
                write!(f, "Invalid configuration: {}", msg),
            DisplayError::BufferSizeMismatch { expected, actual } =>
                write!(f, "Frame size mismatch: expected {} pixels, got {}", expected, actual),
            DisplayError::DrawingError(msg) =>
                write!(f, "Drawing error: {}", msg),
            DisplayError::Io(err) =>
                write!(f, "I/O error: {}", err),
        }
    }
}

impl Error for DisplayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DisplayError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DisplayError {
    fn from(err: std::io::Error) -> Self {
        DisplayError::Io(err)
    }
}

/// Factory error types
#[derive(Debug)]
pub enum DisplayFactoryError {
    /// No driver configured and no output file given
    NoDriverSpecified,

    /// Driver known but not compiled into this build
    DriverNotEnabled(&'static str),

    /// Display driver initialization failed
    DriverInitFailed(DisplayError),

    /// Configuration validation error
    ConfigError(String),
}

impl fmt::Display for DisplayFactoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayFactoryError::NoDriverSpecified =>
                write!(f, "No display detected: configure a display driver or an output file"),
            DisplayFactoryError::DriverNotEnabled(feature) =>
                write!(f, "Driver not enabled. Enable with --features {}", feature),
            DisplayFactoryError::DriverInitFailed(err) =>
                write!(f, "Driver initialization failed: {}", err),
            DisplayFactoryError::ConfigError(msg) =>
                write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for DisplayFactoryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DisplayFactoryError::DriverInitFailed(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DisplayError> for DisplayFactoryError {
    fn from(err: DisplayError) -> Self {
        DisplayFactoryError::DriverInitFailed(err)
    }
}
