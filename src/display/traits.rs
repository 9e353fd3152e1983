/*
 *  display/traits.rs
 *
 *  inkmon - weather metrics on e-paper
 *  (c) 2020-26 Stuart Hunter
 *
 *  Core trait definitions for display driver abstraction
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

use crate::display::error::DisplayError;
use crate::display::framebuffer::FrameBuffer;

/// Ink planes the panel can show
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorDepth {
    /// Black on white
    Monochrome,

    /// Black and red on white; we only ever draw black
    TriColor,
}

/// Display capabilities and metadata
#[derive(Debug, Clone)]
pub struct DisplayCapabilities {
    /// Human readable panel name for logs
    pub name: &'static str,

    /// Drawing width in pixels (landscape)
    pub width: u32,

    /// Drawing height in pixels
    pub height: u32,

    pub color_depth: ColorDepth,

    /// Whether `update` touches physical hardware (slow, wears the panel)
    pub is_physical: bool,
}

/// Minimal hardware abstraction - every output backend implements this
///
/// A backend receives whole frames; there is no partial update. `update`
/// may block for seconds on e-paper hardware.
pub trait DisplayDriver: Send {
    /// Returns the capabilities of this display
    fn capabilities(&self) -> &DisplayCapabilities;

    /// Returns the display dimensions as (width, height)
    fn dimensions(&self) -> (u32, u32) {
        let caps = self.capabilities();
        (caps.width, caps.height)
    }

    /// Bring the hardware into a state where `update` can be called
    fn init(&mut self) -> Result<(), DisplayError>;

    /// Push a complete frame to the output
    ///
    /// The frame must match `dimensions()`.
    fn update(&mut self, frame: &FrameBuffer) -> Result<(), DisplayError>;

    /// Put the panel into its lowest power state; the image stays visible
    fn sleep(&mut self) -> Result<(), DisplayError> {
        Ok(())
    }
}

/// Reject frames that do not match the driver geometry.
pub fn check_frame_size(caps: &DisplayCapabilities, frame: &FrameBuffer) -> Result<(), DisplayError> {
    let expected = (caps.width * caps.height) as usize;
    let actual = frame.width() * frame.height();
    if frame.width() != caps.width as usize || frame.height() != caps.height as usize {
        return Err(DisplayError::BufferSizeMismatch { expected, actual });
    }
    Ok(())
}
