/*
 *  display/drawer.rs
 *
 *  inkmon - weather metrics on e-paper
 *  (c) 2020-26 Stuart Hunter
 *
 *  Lays out temperature, CO2, pressure and the clock on a 1-bit frame
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

use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use embedded_graphics::mono_font::iso_8859_1::{FONT_6X10, FONT_10X20};
use embedded_graphics::mono_font::{MonoFont, MonoTextStyle};
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};
use embedded_graphics::text::{Baseline, Text};
use log::debug;

use crate::display::error::DisplayError;
use crate::display::framebuffer::FrameBuffer;
use crate::metrics::ReadingsSnapshot;

const MEDIUM_FONT: &MonoFont<'static> = &FONT_10X20;
const SMALL_FONT: &MonoFont<'static> = &FONT_6X10;
/// Large text is the medium font blown up by this factor
const LARGE_SCALE: u32 = 2;

/// gap between the temperature and the CO2 line
const LINE_GAP: i32 = 10;
/// clock distance from the right edge
const RIGHT_MARGIN: i32 = 10;
/// gap between time and date
const DATE_GAP: i32 = 5;

const NOT_AVAILABLE: &str = "N/A";

pub fn temperature_text(value: Option<f64>) -> String {
    match value {
        Some(t) => format!("{}°C", t.trunc() as i64),
        None => NOT_AVAILABLE.to_string(),
    }
}

/// Everything after the "CO2" label
pub fn co2_text(value: Option<f64>) -> String {
    match value {
        Some(ppm) => format!(" : {} ppm", ppm.trunc() as i64),
        None => format!(" : {}", NOT_AVAILABLE),
    }
}

pub fn pressure_text(value: Option<f64>) -> String {
    match value {
        Some(hpa) => format!("Pressure: {} hPa", hpa.trunc() as i64),
        None => format!("Pressure: {}", NOT_AVAILABLE),
    }
}

/// `H:MM`, hour not zero padded
pub fn time_text(now: &NaiveDateTime) -> String {
    format!("{}:{:02}", now.hour(), now.minute())
}

/// `D.M.`
pub fn date_text(now: &NaiveDateTime) -> String {
    format!("{}.{}.", now.day(), now.month())
}

/// Renders a readings snapshot into a frame the size of the panel.
pub struct MetricsDrawer {
    frame: FrameBuffer,
}

impl MetricsDrawer {
    pub fn new(width: u32, height: u32) -> Self {
        Self { frame: FrameBuffer::new(width, height) }
    }

    /// Draw using the local wall clock
    pub fn draw_image(&mut self, readings: &ReadingsSnapshot) -> Result<&FrameBuffer, DisplayError> {
        self.draw_image_at(readings, &Local::now().naive_local())
    }

    pub fn draw_image_at(
        &mut self,
        readings: &ReadingsSnapshot,
        now: &NaiveDateTime,
    ) -> Result<&FrameBuffer, DisplayError> {
        self.frame.clear_color(BinaryColor::Off);

        self.draw_date_time(now)?;
        let text_height = self.draw_outside_temperature(readings.temperature)?;
        let current_height = self.draw_co2(readings.co2, text_height)?;
        self.draw_pressure(readings.pressure, current_height)?;

        Ok(&self.frame)
    }

    fn draw_text(&mut self, text: &str, at: Point, font: &MonoFont<'static>) -> Result<Point, DisplayError> {
        let style = MonoTextStyle::new(font, BinaryColor::On);
        Text::with_baseline(text, at, style, Baseline::Top)
            .draw(&mut self.frame)
            .map_err(|_| DisplayError::DrawingError(format!("Failed to draw '{}'", text)))
    }

    /// Mono fonts are fixed pitch; width is glyphs times advance.
    fn text_width(text: &str, font: &MonoFont<'static>) -> i32 {
        let n = text.chars().count() as u32;
        (n * (font.character_size.width + font.character_spacing)) as i32
    }

    /// Draw `text` at `scale` times the font size, returns the text height.
    fn draw_scaled_text(&mut self, text: &str, at: Point, font: &MonoFont<'static>, scale: u32) -> Result<i32, DisplayError> {
        let width = Self::text_width(text, font).max(1) as u32;
        let height = font.character_size.height;

        let mut glyphs = FrameBuffer::new(width, height);
        let style = MonoTextStyle::new(font, BinaryColor::On);
        Text::with_baseline(text, Point::zero(), style, Baseline::Top)
            .draw(&mut glyphs)
            .map_err(|_| DisplayError::DrawingError(format!("Failed to draw '{}'", text)))?;

        let block = PrimitiveStyle::with_fill(BinaryColor::On);
        for y in 0..glyphs.height() {
            for x in 0..glyphs.width() {
                if glyphs.get_pixel(x, y) != Some(BinaryColor::On) {
                    continue;
                }
                let origin = at + Point::new((x as u32 * scale) as i32, (y as u32 * scale) as i32);
                Rectangle::new(origin, Size::new(scale, scale))
                    .into_styled(block)
                    .draw(&mut self.frame)
                    .map_err(|_| DisplayError::DrawingError("Failed to scale text".to_string()))?;
            }
        }
        Ok((height * scale) as i32)
    }

    /// Time in the top right corner, date underneath.
    fn draw_date_time(&mut self, now: &NaiveDateTime) -> Result<(), DisplayError> {
        let time = time_text(now);
        let date = date_text(now);
        let x = self.frame.width() as i32 - Self::text_width(&time, MEDIUM_FONT) - RIGHT_MARGIN;
        debug!("{} {} at x={}", time, date, x);

        self.draw_text(&time, Point::new(x, 0), MEDIUM_FONT)?;
        let date_y = MEDIUM_FONT.character_size.height as i32 + DATE_GAP;
        self.draw_text(&date, Point::new(x, date_y), MEDIUM_FONT)?;
        Ok(())
    }

    fn draw_outside_temperature(&mut self, value: Option<f64>) -> Result<i32, DisplayError> {
        let text = temperature_text(value);
        debug!("{}", text);
        self.draw_scaled_text(&text, Point::zero(), MEDIUM_FONT, LARGE_SCALE)
    }

    /// CO2 line below the temperature, returns the y of the next line.
    fn draw_co2(&mut self, value: Option<f64>, text_height: i32) -> Result<i32, DisplayError> {
        let y = text_height + LINE_GAP;
        let rest = co2_text(value);
        debug!("CO2{}", rest);

        let next = self.draw_text("CO", Point::new(0, y), MEDIUM_FONT)?;
        // subscript sits on the baseline of the medium text
        let sub_y = y + MEDIUM_FONT.baseline as i32 - SMALL_FONT.baseline as i32 + 2;
        let next = self.draw_text("2", Point::new(next.x, sub_y), SMALL_FONT)?;
        self.draw_text(&rest, Point::new(next.x, y), MEDIUM_FONT)?;

        Ok(y + MEDIUM_FONT.character_size.height as i32)
    }

    fn draw_pressure(&mut self, value: Option<f64>, y: i32) -> Result<(), DisplayError> {
        let text = pressure_text(value);
        debug!("{}", text);
        self.draw_text(&text, Point::new(0, y), MEDIUM_FONT)?;
        Ok(())
    }
}
