/*
 *  display/mod.rs
 *
 *  inkmon - weather metrics on e-paper
 *  (c) 2020-26 Stuart Hunter
 *
 *  Display subsystem - drawing, frames and output backends
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

// Core trait definitions
pub mod traits;
pub mod error;
pub mod framebuffer;
pub mod factory;

// Output backends (panel drivers conditionally compiled on features)
pub mod drivers;

// Metrics layout and the drawer/driver pairing the redraw loop talks to
pub mod drawer;
pub mod panel;

// Re-exports for convenience
pub use traits::{DisplayDriver, DisplayCapabilities, ColorDepth};
pub use error::{DisplayError, DisplayFactoryError};
pub use framebuffer::FrameBuffer;
pub use factory::{DisplayDriverFactory, BoxedDriver};
pub use drawer::MetricsDrawer;
pub use panel::Panel;
pub use drivers::file::FileDriver;

#[cfg(feature = "driver-ssd1680")]
pub use drivers::ssd1680::Ssd1680Driver;
