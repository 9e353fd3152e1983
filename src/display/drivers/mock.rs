/*
 *  display/drivers/mock.rs
 *
 *  inkmon - weather metrics on e-paper
 *  (c) 2020-26 Stuart Hunter
 *
 *  Mock display driver for testing without hardware
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

use std::sync::{Arc, Mutex};

use crate::display::error::DisplayError;
use crate::display::framebuffer::FrameBuffer;
use crate::display::traits::{check_frame_size, ColorDepth, DisplayCapabilities, DisplayDriver};

/// Mock display driver for testing
///
/// Records every frame it is handed; the shared state stays inspectable
/// after the driver has been boxed and moved into a panel.
#[derive(Debug, Clone)]
pub struct MockDriver {
    capabilities: DisplayCapabilities,
    state: Arc<Mutex<MockDriverState>>,
}

/// Internal state for the mock driver (shared for inspection in tests)
#[derive(Debug, Default)]
pub struct MockDriverState {
    pub init_count: usize,
    pub update_count: usize,
    pub sleep_count: usize,
    pub is_initialized: bool,
    /// last frame passed to update()
    pub last_frame: Option<FrameBuffer>,

    /// Simulate failures (for error testing)
    pub simulate_update_failure: bool,
    pub simulate_init_failure: bool,
}

impl MockDriver {
    pub fn new_with_size(width: u32, height: u32) -> Self {
        Self {
            capabilities: DisplayCapabilities {
                name: "mock",
                width,
                height,
                color_depth: ColorDepth::Monochrome,
                is_physical: false,
            },
            state: Arc::new(Mutex::new(MockDriverState::default())),
        }
    }

    /// Get reference to state for inspection in tests
    pub fn state(&self) -> Arc<Mutex<MockDriverState>> {
        Arc::clone(&self.state)
    }
}

impl DisplayDriver for MockDriver {
    fn capabilities(&self) -> &DisplayCapabilities {
        &self.capabilities
    }

    fn init(&mut self) -> Result<(), DisplayError> {
        let mut state = self.state.lock().unwrap();
        if state.simulate_init_failure {
            return Err(DisplayError::InitializationFailed("Simulated init failure".to_string()));
        }
        state.init_count += 1;
        state.is_initialized = true;
        Ok(())
    }

    fn update(&mut self, frame: &FrameBuffer) -> Result<(), DisplayError> {
        check_frame_size(&self.capabilities, frame)?;
        let mut state = self.state.lock().unwrap();
        if !state.is_initialized {
            return Err(DisplayError::NotInitialized);
        }
        if state.simulate_update_failure {
            return Err(DisplayError::SpiError("Simulated update failure".to_string()));
        }
        state.update_count += 1;
        state.last_frame = Some(frame.clone());
        Ok(())
    }

    fn sleep(&mut self) -> Result<(), DisplayError> {
        let mut state = self.state.lock().unwrap();
        state.sleep_count += 1;
        state.is_initialized = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_driver_init() {
        let mut driver = MockDriver::new_with_size(250, 122);
        let state = driver.state();
        assert!(!state.lock().unwrap().is_initialized);

        driver.init().unwrap();

        assert_eq!(state.lock().unwrap().init_count, 1);
        assert!(state.lock().unwrap().is_initialized);
    }

    #[test]
    fn test_mock_driver_update_before_init() {
        let mut driver = MockDriver::new_with_size(250, 122);
        let frame = FrameBuffer::new(250, 122);
        assert!(matches!(driver.update(&frame), Err(DisplayError::NotInitialized)));
    }

    #[test]
    fn test_mock_driver_records_frames() {
        let mut driver = MockDriver::new_with_size(8, 8);
        driver.init().unwrap();
        driver.update(&FrameBuffer::new(8, 8)).unwrap();
        driver.update(&FrameBuffer::new(8, 8)).unwrap();

        let state = driver.state();
        let state = state.lock().unwrap();
        assert_eq!(state.update_count, 2);
        assert_eq!(state.last_frame.as_ref().map(|f| f.dimensions()), Some((8, 8)));
    }

    #[test]
    fn test_mock_driver_simulated_failure() {
        let mut driver = MockDriver::new_with_size(8, 8);
        driver.init().unwrap();
        driver.state().lock().unwrap().simulate_update_failure = true;
        assert!(driver.update(&FrameBuffer::new(8, 8)).is_err());

        driver.state().lock().unwrap().simulate_update_failure = false;
        assert!(driver.update(&FrameBuffer::new(8, 8)).is_ok());
    }

    #[test]
    fn test_mock_driver_sleep() {
        let mut driver = MockDriver::new_with_size(8, 8);
        driver.init().unwrap();
        driver.sleep().unwrap();
        let state = driver.state();
        assert_eq!(state.lock().unwrap().sleep_count, 1);
        assert!(!state.lock().unwrap().is_initialized);
    }
}
