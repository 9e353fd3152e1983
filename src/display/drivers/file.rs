/*
 *  display/drivers/file.rs
 *
 *  inkmon - weather metrics on e-paper
 *  (c) 2020-26 Stuart Hunter
 *
 *  Writes each frame to a PBM image instead of a panel
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
use std::fs;
use std::path::PathBuf;

use crate::display::error::DisplayError;
use crate::display::framebuffer::FrameBuffer;
use crate::display::traits::{check_frame_size, ColorDepth, DisplayCapabilities, DisplayDriver};

/// Binary PBM (P4) file writer. Every update overwrites the file.
#[derive(Debug)]
pub struct FileDriver {
    path: PathBuf,
    capabilities: DisplayCapabilities,
}

impl FileDriver {
    pub fn new(path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            path: path.into(),
            capabilities: DisplayCapabilities {
                name: "PBM file",
                width,
                height,
                color_depth: ColorDepth::Monochrome,
                is_physical: false,
            },
        }
    }
}

impl DisplayDriver for FileDriver {
    fn capabilities(&self) -> &DisplayCapabilities {
        &self.capabilities
    }

    fn init(&mut self) -> Result<(), DisplayError> {
        if self.path.is_dir() {
            return Err(DisplayError::InvalidConfiguration(format!(
                "output {} is a directory",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn update(&mut self, frame: &FrameBuffer) -> Result<(), DisplayError> {
        check_frame_size(&self.capabilities, frame)?;
        fs::write(&self.path, frame.to_pbm())?;
        info!("Image written to {}", self.path.display());
        Ok(())
    }
}
