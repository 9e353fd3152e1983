/*
 *  display/framebuffer.rs
 *
 *  inkmon - weather metrics on e-paper
 *  (c) 2020-26 Stuart Hunter
 *
 *  Runtime-sized 1-bit framebuffer, drawn with embedded-graphics
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

use core::convert::Infallible;
use embedded_graphics::geometry::{OriginDimensions, Size};
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;

/// Monochrome frame, one `BinaryColor` per pixel, row-major.
///
/// `BinaryColor::On` is ink (black), `Off` is paper (white).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    buf: Vec<BinaryColor>,
    w: usize,
    h: usize,
}

impl FrameBuffer {
    /// Blank (all paper) frame
    pub fn new(width: u32, height: u32) -> Self {
        let (w, h) = (width as usize, height as usize);
        Self { buf: vec![BinaryColor::Off; w * h], w, h }
    }

    pub fn width(&self) -> usize { self.w }
    pub fn height(&self) -> usize { self.h }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.w as u32, self.h as u32)
    }

    pub fn clear_color(&mut self, color: BinaryColor) {
        self.buf.fill(color);
    }

    /// Map (x,y) to linear index; returns None if out of bounds
    #[inline]
    fn idx(&self, p: Point) -> Option<usize> {
        if p.x >= 0 && p.y >= 0 {
            let (x, y) = (p.x as usize, p.y as usize);
            if x < self.w && y < self.h {
                return Some(y * self.w + x);
            }
        }
        None
    }

    pub fn get_pixel(&self, x: usize, y: usize) -> Option<BinaryColor> {
        if x < self.w && y < self.h {
            Some(self.buf[y * self.w + x])
        } else {
            None
        }
    }

    pub fn count_on_pixels(&self) -> usize {
        self.buf.iter().filter(|c| c.is_on()).count()
    }

    /// Bytes per packed row; rows are padded to a whole byte.
    pub fn row_stride(&self) -> usize {
        self.w.div_ceil(8)
    }

    /// Pack rows MSB first, 1 = ink. Each row starts on a byte boundary.
    pub fn to_packed_rows(&self) -> Vec<u8> {
        let stride = self.row_stride();
        let mut bytes = vec![0u8; stride * self.h];
        for (y, row) in self.buf.chunks(self.w.max(1)).enumerate().take(self.h) {
            for (x, pixel) in row.iter().enumerate() {
                if pixel.is_on() {
                    bytes[y * stride + x / 8] |= 0x80 >> (x % 8);
                }
            }
        }
        bytes
    }

    /// Binary PBM (P4). PBM uses 1 for black, which matches `On` = ink.
    pub fn to_pbm(&self) -> Vec<u8> {
        let mut out = format!("P4\n{} {}\n", self.w, self.h).into_bytes();
        out.extend_from_slice(&self.to_packed_rows());
        out
    }
}

impl OriginDimensions for FrameBuffer {
    fn size(&self) -> Size {
        Size::new(self.w as u32, self.h as u32)
    }
}

impl DrawTarget for FrameBuffer {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(p, c) in pixels {
            if let Some(i) = self.idx(p) {
                self.buf[i] = c;
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        self.clear_color(color);
        Ok(())
    }
}
