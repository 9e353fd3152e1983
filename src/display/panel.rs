/*
 *  display/panel.rs
 *
 *  inkmon - weather metrics on e-paper
 *  (c) 2020-26 Stuart Hunter
 *
 *  Drawer plus driver: one redraw renders and pushes a frame
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

use crate::display::drawer::MetricsDrawer;
use crate::display::error::DisplayError;
use crate::display::factory::BoxedDriver;
use crate::metrics::ReadingsSnapshot;
use crate::scheduler::RedrawTarget;

pub struct Panel {
    drawer: MetricsDrawer,
    driver: BoxedDriver,
}

impl Panel {
    /// The drawing canvas takes the driver's dimensions.
    pub fn new(driver: BoxedDriver) -> Self {
        let (width, height) = driver.dimensions();
        info!(
            "Display {} {}x{} ({:?})",
            driver.capabilities().name,
            width,
            height,
            driver.capabilities().color_depth
        );
        Self {
            drawer: MetricsDrawer::new(width, height),
            driver,
        }
    }

    pub fn init(&mut self) -> Result<(), DisplayError> {
        self.driver.init()
    }

    pub fn sleep(&mut self) -> Result<(), DisplayError> {
        self.driver.sleep()
    }
}

impl RedrawTarget for Panel {
    fn redraw(&mut self, readings: &ReadingsSnapshot) -> Result<(), DisplayError> {
        let frame = self.drawer.draw_image(readings)?;
        self.driver.update(frame)
    }
}
