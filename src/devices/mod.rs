//! Peripheral device support.
//!
//! Peripherals attach to the machine by 4-bit select code (0-15). Each device
//! exposes four logical I/O registers, which the CPU reaches through register
//! indices 4-7 while the PA register holds the device's select code. Devices
//! advance with the machine clock via `tick` and may assert their interrupt
//! request line while doing so.
//!
//! # Interrupt model
//!
//! The [`DeviceManager`] tracks one request bit per select code. Priority is
//! two-level and derived from the select code: codes 8-15 interrupt at High
//! level, codes 0-7 at Low. The CPU asks for the single highest pending level
//! and then confirms acceptance with
//! [`DeviceManager::select_code_for_interrupt_and_confirm`], which clears the
//! request bit. Real hardware leaves the line asserted until the device
//! itself drops it; clearing on acceptance is a known simplification kept
//! from the original machine model.

use thiserror::Error;

/// Number of peripheral select codes.
pub const SELECT_CODES: u8 = 16;

/// I/O registers exposed by every device.
pub const DEVICE_REGISTERS: usize = 4;

/// Interrupt priority level. `High` outranks `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InterruptLevel {
    Low,
    High,
}

/// Priority level a select code interrupts at.
pub fn level_of_select_code(select_code: u8) -> InterruptLevel {
    if select_code >= 8 {
        InterruptLevel::High
    } else {
        InterruptLevel::Low
    }
}

/// A device's handle on its interrupt request line, valid during `tick`.
pub struct InterruptLine<'a> {
    mask: &'a mut u16,
    select_code: u8,
}

impl InterruptLine<'_> {
    /// Asserts this device's interrupt request.
    pub fn request(&mut self) {
        *self.mask |= 1 << self.select_code;
    }

    /// The select code the device is registered under.
    pub fn select_code(&self) -> u8 {
        self.select_code
    }
}

/// A peripheral addressable through a select code.
///
/// Register indices passed to `read_register`/`write_register` are already
/// masked to 0-3; values are full 16-bit words.
pub trait Device {
    fn read_register(&self, index: usize) -> u16;

    fn write_register(&mut self, index: usize, value: u16);

    /// Advances the device by one machine tick. The device may assert its
    /// interrupt request through `irq`.
    fn tick(&mut self, irq: &mut InterruptLine<'_>);

    /// Returns the device to power-on state.
    fn reset(&mut self) {}
}

/// Errors from device registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("select code {0} is already bound")]
    SelectCodeInUse(u8),

    #[error("select code {0} out of range (0-15)")]
    SelectCodeOutOfRange(u8),
}

/// Registry of peripherals and their interrupt request lines.
pub struct DeviceManager {
    devices: [Option<Box<dyn Device>>; SELECT_CODES as usize],
    requests: u16,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self {
            devices: Default::default(),
            requests: 0,
        }
    }

    /// Binds a device to a select code. Each code binds at most once.
    pub fn register(
        &mut self,
        select_code: u8,
        device: Box<dyn Device>,
    ) -> Result<(), DeviceError> {
        if select_code >= SELECT_CODES {
            return Err(DeviceError::SelectCodeOutOfRange(select_code));
        }
        let slot = &mut self.devices[select_code as usize];
        if slot.is_some() {
            return Err(DeviceError::SelectCodeInUse(select_code));
        }
        *slot = Some(device);
        Ok(())
    }

    /// Advances every bound device by one tick, sampling interrupt requests.
    pub fn tick(&mut self) {
        for (code, slot) in self.devices.iter_mut().enumerate() {
            if let Some(device) = slot {
                let mut irq = InterruptLine {
                    mask: &mut self.requests,
                    select_code: code as u8,
                };
                device.tick(&mut irq);
            }
        }
    }

    /// Resets every device and clears all pending requests.
    pub fn reset(&mut self) {
        self.requests = 0;
        for slot in self.devices.iter_mut().flatten() {
            slot.reset();
        }
    }

    /// Reads an I/O register of the device selected by `peripheral_address`.
    /// Unbound select codes read as 0.
    pub fn read_register(&self, peripheral_address: u16, index: usize) -> u16 {
        let code = (peripheral_address & 0xF) as usize;
        match &self.devices[code] {
            Some(device) => device.read_register(index & (DEVICE_REGISTERS - 1)),
            None => 0,
        }
    }

    /// Writes an I/O register of the selected device. Unbound select codes
    /// drop the write.
    pub fn write_register(&mut self, peripheral_address: u16, index: usize, value: u16) {
        let code = (peripheral_address & 0xF) as usize;
        if let Some(device) = &mut self.devices[code] {
            device.write_register(index & (DEVICE_REGISTERS - 1), value);
        }
    }

    /// Asserts the request bit for a select code directly (for devices that
    /// interrupt outside their tick, and for tests).
    pub fn request_interrupt(&mut self, select_code: u8) {
        if select_code < SELECT_CODES {
            self.requests |= 1 << select_code;
        }
    }

    /// The single highest pending interrupt level, if any request is up.
    pub fn pending_level(&self) -> Option<InterruptLevel> {
        if self.requests & 0xFF00 != 0 {
            Some(InterruptLevel::High)
        } else if self.requests != 0 {
            Some(InterruptLevel::Low)
        } else {
            None
        }
    }

    /// Picks the highest requesting select code at `level`, clears its
    /// request bit, and returns it.
    pub fn select_code_for_interrupt_and_confirm(
        &mut self,
        level: InterruptLevel,
    ) -> Option<u8> {
        let (lo, hi) = match level {
            InterruptLevel::High => (8, SELECT_CODES),
            InterruptLevel::Low => (0, 8),
        };
        for code in (lo..hi).rev() {
            if self.requests & (1 << code) != 0 {
                self.requests &= !(1 << code);
                log::trace!("interrupt confirmed for select code {code}");
                return Some(code);
            }
        }
        None
    }

    /// Raw request bitmask, one bit per select code.
    pub fn request_mask(&self) -> u16 {
        self.requests
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Test device: four latches, requests an interrupt every `period` ticks.
    struct TestDevice {
        registers: [u16; DEVICE_REGISTERS],
        period: Option<u32>,
        ticks: u32,
        resets: Rc<Cell<u32>>,
    }

    impl TestDevice {
        fn new(period: Option<u32>) -> Self {
            Self {
                registers: [0; DEVICE_REGISTERS],
                period,
                ticks: 0,
                resets: Rc::new(Cell::new(0)),
            }
        }
    }

    impl Device for TestDevice {
        fn read_register(&self, index: usize) -> u16 {
            self.registers[index]
        }

        fn write_register(&mut self, index: usize, value: u16) {
            self.registers[index] = value;
        }

        fn tick(&mut self, irq: &mut InterruptLine<'_>) {
            self.ticks += 1;
            if let Some(period) = self.period {
                if self.ticks % period == 0 {
                    irq.request();
                }
            }
        }

        fn reset(&mut self) {
            self.ticks = 0;
            self.registers = [0; DEVICE_REGISTERS];
            self.resets.set(self.resets.get() + 1);
        }
    }

    #[test]
    fn test_register_routing() {
        let mut manager = DeviceManager::new();
        manager.register(3, Box::new(TestDevice::new(None))).unwrap();

        manager.write_register(3, 2, 0xABCD);
        assert_eq!(manager.read_register(3, 2), 0xABCD);
        // Index masked to 0-3: register 6 aliases register 2.
        assert_eq!(manager.read_register(3, 6), 0xABCD);
        // High bits of the peripheral address are ignored.
        assert_eq!(manager.read_register(0x0013, 2), 0xABCD);
        // Unbound select code: reads 0, writes dropped.
        manager.write_register(5, 0, 0x1111);
        assert_eq!(manager.read_register(5, 0), 0);
    }

    #[test]
    fn test_duplicate_select_code_rejected() {
        let mut manager = DeviceManager::new();
        manager.register(4, Box::new(TestDevice::new(None))).unwrap();
        assert_eq!(
            manager
                .register(4, Box::new(TestDevice::new(None)))
                .unwrap_err(),
            DeviceError::SelectCodeInUse(4)
        );
        assert_eq!(
            manager
                .register(16, Box::new(TestDevice::new(None)))
                .unwrap_err(),
            DeviceError::SelectCodeOutOfRange(16)
        );
    }

    #[test]
    fn test_high_level_wins_arbitration() {
        let mut manager = DeviceManager::new();
        manager.register(3, Box::new(TestDevice::new(Some(1)))).unwrap();
        manager.register(9, Box::new(TestDevice::new(Some(1)))).unwrap();

        manager.tick();
        assert_eq!(manager.pending_level(), Some(InterruptLevel::High));
        let code = manager
            .select_code_for_interrupt_and_confirm(InterruptLevel::High)
            .unwrap();
        assert_eq!(code, 9);
        // The high request is cleared; the low one remains.
        assert_eq!(manager.pending_level(), Some(InterruptLevel::Low));
        let code = manager
            .select_code_for_interrupt_and_confirm(InterruptLevel::Low)
            .unwrap();
        assert_eq!(code, 3);
        assert_eq!(manager.pending_level(), None);
        assert_eq!(manager.request_mask(), 0);
    }

    #[test]
    fn test_reset_propagates() {
        let device = TestDevice::new(Some(1));
        let resets = device.resets.clone();
        let mut manager = DeviceManager::new();
        manager.register(0, Box::new(device)).unwrap();

        manager.tick();
        assert_eq!(manager.pending_level(), Some(InterruptLevel::Low));
        manager.reset();
        assert_eq!(manager.pending_level(), None);
        assert_eq!(resets.get(), 1);
    }
}
