// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
use std::cell::RefCell;
use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal::blocking::i2c;

use crate::eeprom_data::{datasheet_eeprom, EEPROM_LENGTH};

/// The number of words of RAM the sensor uses, 0x0400 through 0x073F.
///
/// 768 pixels followed by 64 words of references, half of which are reserved.
pub const RAM_LENGTH: usize = 0x0740 - 0x0400;

const ROM_RANGE: RangeInclusive<u16> = 0x0000..=0x03FF;
const RAM_RANGE: RangeInclusive<u16> = 0x0400..=0x073F;
const EEPROM_RANGE: RangeInclusive<u16> = 0x2400..=0x273F;

const STATUS_REGISTER_ADDRESS: u16 = 0x8000;
const CONTROL_REGISTER_ADDRESS: u16 = 0x800D;
const I2C_CONFIG_REGISTER_ADDRESS: u16 = 0x800F;

// The lowest 6 bits are documented, but the 6th bit is only documented in earlier versions of the
// datasheet.
const STATUS_REGISTER_WRITE_MASK: u16 = 0x003F;

// Only the top three bits of the control register are reserved.
const CONTROL_REGISTER_WRITE_MASK: u16 = 0x1FFF;

// Only the last four bits of the I2C config register are documented.
const I2C_CONFIG_REGISTER_WRITE_MASK: u16 = 0x000F;

const NEW_DATA_FLAG: u16 = 0x0008;
const SUBPAGE_REPEAT_FLAG: u16 = 0x0008;

const RECENT_OPERATIONS_QUEUE_LENGTH: usize = 256;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MockError {
    /// The given address shouldn't be accessed.
    IllegalAccess(u16),

    /// The given address should not be written to.
    IllegalWriteAddress(u16),

    /// The given value would change reserved bits at the given address.
    IllegalWriteValue(u16, u16),

    /// The given address isn't part of the device's memory.
    UnknownMemoryAddress(u16),

    /// An unknown I2C address was given.
    UnknownI2cAddress(u8),

    /// The requested operation is not allowed.
    ///
    /// This covers a combined write-read with more than an address written, zero-length reads
    /// (which make the camera reject the next operation) and reads of partial words.
    IllegalOperation,

    /// A failure requested with [`MockSensorBus::fail_next`].
    Injected,
}

/// A transaction seen by the mock. Lengths are in bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum I2cOperation {
    Write { address: u16, length: usize },
    Read { address: u16, length: usize },
}

#[derive(Clone, Debug)]
struct SensorState {
    eeprom: [u16; EEPROM_LENGTH],
    ram: [u16; RAM_LENGTH],
    status: u16,
    control: u16,
    i2c_config: u16,
    recent_operations: VecDeque<I2cOperation>,
    injected_failures: usize,
    ready_latency: Option<u16>,
    countdown: Option<u16>,
}

impl SensorState {
    fn read_word(&mut self, address: u16) -> Result<u16, MockError> {
        if RAM_RANGE.contains(&address) {
            Ok(self.ram[usize::from(address - RAM_RANGE.start())])
        } else if EEPROM_RANGE.contains(&address) {
            Ok(self.eeprom[usize::from(address - EEPROM_RANGE.start())])
        } else {
            match address {
                STATUS_REGISTER_ADDRESS => Ok(self.read_status()),
                CONTROL_REGISTER_ADDRESS => Ok(self.control),
                I2C_CONFIG_REGISTER_ADDRESS => Ok(self.i2c_config),
                _ if ROM_RANGE.contains(&address) => Err(MockError::IllegalAccess(address)),
                _ => Err(MockError::UnknownMemoryAddress(address)),
            }
        }
    }

    /// Reading the status register is what advances the simulated measurement cycle.
    fn read_status(&mut self) -> u16 {
        match self.countdown {
            Some(0) => {
                self.countdown = None;
                let last = self.status & 0x0001;
                let next = if self.control & SUBPAGE_REPEAT_FLAG != 0 {
                    last
                } else {
                    last ^ 0x0001
                };
                self.status = (self.status & !0x0001) | next | NEW_DATA_FLAG;
            }
            Some(remaining) => self.countdown = Some(remaining - 1),
            None => {}
        }
        self.status
    }

    fn write_word(&mut self, address: u16, word: u16) -> Result<(), MockError> {
        let (mask, existing) = match address {
            STATUS_REGISTER_ADDRESS => (STATUS_REGISTER_WRITE_MASK, self.status),
            CONTROL_REGISTER_ADDRESS => (CONTROL_REGISTER_WRITE_MASK, self.control),
            I2C_CONFIG_REGISTER_ADDRESS => (I2C_CONFIG_REGISTER_WRITE_MASK, self.i2c_config),
            // ROM, RAM and EEPROM are all off limits; the EEPROM can't be recovered if clobbered.
            _ if ROM_RANGE.contains(&address)
                || RAM_RANGE.contains(&address)
                || EEPROM_RANGE.contains(&address) =>
            {
                return Err(MockError::IllegalWriteAddress(address))
            }
            _ => return Err(MockError::UnknownMemoryAddress(address)),
        };
        if (word & !mask) != (existing & !mask) {
            return Err(MockError::IllegalWriteValue(address, word));
        }
        match address {
            STATUS_REGISTER_ADDRESS => {
                let acknowledged = existing & NEW_DATA_FLAG != 0 && word & NEW_DATA_FLAG == 0;
                self.status = word;
                if acknowledged {
                    self.countdown = self.ready_latency;
                }
            }
            CONTROL_REGISTER_ADDRESS => self.control = word,
            _ => self.i2c_config = word,
        }
        Ok(())
    }

    fn record(&mut self, operation: I2cOperation) {
        if self.recent_operations.len() == RECENT_OPERATIONS_QUEUE_LENGTH {
            self.recent_operations.pop_front();
        }
        self.recent_operations.push_back(operation);
    }

    fn take_injected_failure(&mut self) -> bool {
        if self.injected_failures > 0 {
            self.injected_failures -= 1;
            true
        } else {
            false
        }
    }
}

/// A simulated sensor on an I²C bus.
///
/// Clones share the same sensor, so a test can keep a handle while the code under test owns
/// another. Acknowledging new data (clearing the flag in the status register) starts the next
/// sub-page; it is published once the status register has been read
/// [`ready_latency`][Self::set_ready_latency] more times.
#[derive(Clone, Debug)]
pub struct MockSensorBus {
    i2c_address: u8,
    state: Rc<RefCell<SensorState>>,
}

impl MockSensorBus {
    pub fn new(i2c_address: u8, eeprom: &[u16], ram: &[u16], control: u16, status: u16) -> Self {
        let mut eeprom_data = [0u16; EEPROM_LENGTH];
        eeprom_data.copy_from_slice(eeprom);
        let mut ram_data = [0u16; RAM_LENGTH];
        ram_data.copy_from_slice(ram);
        Self {
            i2c_address,
            state: Rc::new(RefCell::new(SensorState {
                eeprom: eeprom_data,
                ram: ram_data,
                status,
                control,
                i2c_config: 0x0000,
                recent_operations: VecDeque::new(),
                injected_failures: 0,
                ready_latency: Some(0),
                countdown: None,
            })),
        }
    }

    pub fn i2c_address(&self) -> u8 {
        self.i2c_address
    }

    /// Operations since the last clear, oldest first.
    pub fn recent_operations(&self) -> Vec<I2cOperation> {
        self.state.borrow().recent_operations.iter().copied().collect()
    }

    pub fn clear_recent_operations(&self) {
        self.state.borrow_mut().recent_operations.clear()
    }

    /// Fail the next `count` transactions with [`MockError::Injected`].
    pub fn fail_next(&self, count: usize) {
        self.state.borrow_mut().injected_failures = count;
    }

    /// How many status reads after an acknowledge report no new data. `None` stalls the sensor.
    pub fn set_ready_latency(&self, latency: Option<u16>) {
        self.state.borrow_mut().ready_latency = latency;
    }

    pub fn status(&self) -> u16 {
        self.state.borrow().status
    }

    /// Overwrite the status register, as if the sensor had just finished a sub-page.
    pub fn set_status(&self, status: u16) {
        let mut state = self.state.borrow_mut();
        state.status = status;
        state.countdown = None;
    }

    pub fn control(&self) -> u16 {
        self.state.borrow().control
    }

    pub fn set_ram_word(&self, address: u16, word: u16) {
        self.state.borrow_mut().ram[usize::from(address - RAM_RANGE.start())] = word;
    }

    /// Set the raw reading of one pixel, for both sub-pages.
    pub fn set_pixel(&self, row: usize, column: usize, raw: u16) {
        self.state.borrow_mut().ram[row * 32 + column] = raw;
    }

    pub fn set_eeprom_word(&self, address: u16, word: u16) {
        self.state.borrow_mut().eeprom[usize::from(address - EEPROM_RANGE.start())] = word;
    }
}

impl i2c::Write for MockSensorBus {
    type Error = MockError;

    fn write(&mut self, i2c_address: u8, bytes: &[u8]) -> Result<(), Self::Error> {
        if i2c_address != self.i2c_address {
            return Err(MockError::UnknownI2cAddress(i2c_address));
        }
        let mut state = self.state.borrow_mut();
        if state.take_injected_failure() {
            return Err(MockError::Injected);
        }
        // Plain writes are an address and exactly one word.
        if bytes.len() != 4 {
            return Err(MockError::IllegalOperation);
        }
        let address = u16::from_be_bytes([bytes[0], bytes[1]]);
        let word = u16::from_be_bytes([bytes[2], bytes[3]]);
        state.record(I2cOperation::Write { address, length: 2 });
        state.write_word(address, word)
    }
}

impl i2c::WriteRead for MockSensorBus {
    type Error = MockError;

    fn write_read(
        &mut self,
        i2c_address: u8,
        write_buffer: &[u8],
        out_buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        if i2c_address != self.i2c_address {
            return Err(MockError::UnknownI2cAddress(i2c_address));
        }
        let mut state = self.state.borrow_mut();
        if state.take_injected_failure() {
            return Err(MockError::Injected);
        }
        // Write-reads should only be writing the address
        if write_buffer.len() != 2 || out_buffer.is_empty() || out_buffer.len() % 2 != 0 {
            return Err(MockError::IllegalOperation);
        }
        let start = u16::from_be_bytes([write_buffer[0], write_buffer[1]]);
        state.record(I2cOperation::Read {
            address: start,
            length: out_buffer.len(),
        });
        let word_count = (out_buffer.len() / 2) as u16;
        let last = start.wrapping_add(word_count - 1);
        let same_region = [RAM_RANGE, EEPROM_RANGE]
            .iter()
            .any(|range| range.contains(&start) && range.contains(&last));
        // The registers aren't contiguous, so they can only be read one at a time.
        if word_count > 1 && !same_region {
            return Err(MockError::IllegalAccess(last));
        }
        for (offset, pair) in out_buffer.chunks_exact_mut(2).enumerate() {
            let word = state.read_word(start + offset as u16)?;
            pair.copy_from_slice(&word.to_be_bytes());
        }
        Ok(())
    }
}

/// The RAM contents from the datasheet's worked example.
///
/// Every pixel reads 0x0261 (609).
pub fn datasheet_ram() -> [u16; RAM_LENGTH] {
    let mut ram = [0u16; RAM_LENGTH];
    ram[..768].iter_mut().for_each(|pixel| *pixel = 0x0261);
    // Only the references the calculations use are filled in, the rest are reserved.
    let mut set = |address: u16, word: u16| ram[usize::from(address - 0x0400)] = word;
    set(0x0700, 0x4bf2);
    set(0x0708, 0xffca);
    set(0x070A, 0x1881);
    set(0x0720, 0x06af);
    set(0x0728, 0xffc8);
    set(0x072A, 0xccc5);
    ram
}

/// A sensor with the datasheet's worked example loaded at `i2c_address`.
///
/// Sub-page 0 has new data waiting and the control register holds its power-on value.
pub fn datasheet_sensor_at_address(i2c_address: u8) -> MockSensorBus {
    MockSensorBus::new(
        i2c_address,
        &datasheet_eeprom(),
        &datasheet_ram(),
        0x1901,
        NEW_DATA_FLAG,
    )
}

/// [`datasheet_sensor_at_address`] at the factory default address.
pub fn datasheet_sensor() -> MockSensorBus {
    datasheet_sensor_at_address(0x33)
}
