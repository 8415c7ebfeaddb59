// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Word-addressed register access over I²C, with the memory map's access rules enforced.
use embedded_hal::blocking::i2c;
use tracing::trace;

use crate::clock::Clock;
use crate::error::{Error, Violation};
use crate::mlx90640::{Access, Address};
use crate::register::Register;

/// The error type produced by a [`RegisterBus`] over `I2C`.
pub type BusError<I2C> = Error<<I2C as i2c::WriteRead>::Error>;

/// The most words moved in a single block transaction.
const BLOCK_CHUNK_WORDS: usize = 64;

/// Register-level access to the sensor.
///
/// Every access is checked against the memory map before anything is put on the bus: reading an
/// unmapped address or writing a read-only register fails with
/// [`AccessViolation`][Error::AccessViolation] and no transaction takes place. Transport errors
/// are passed up as [`CommunicationFault`][Error::CommunicationFault] and never retried here.
#[derive(Clone, Debug)]
pub struct RegisterBus<I2C, C> {
    /// The I²C bus the sensor is accessible on.
    i2c: I2C,

    /// The I²C address the sensor is accessible at.
    address: u8,

    clock: C,

    /// When the last transaction succeeded.
    last_activity: Option<u64>,
}

impl<I2C, C> RegisterBus<I2C, C>
where
    I2C: i2c::WriteRead + i2c::Write<Error = <I2C as i2c::WriteRead>::Error>,
    C: Clock,
{
    pub fn new(i2c: I2C, address: u8, clock: C) -> Self {
        Self {
            i2c,
            address,
            clock,
            last_activity: None,
        }
    }

    /// The bus address of the sensor.
    pub fn i2c_address(&self) -> u8 {
        self.address
    }

    /// When the last successful transaction finished, in clock milliseconds.
    ///
    /// `None` until the first transaction succeeds.
    pub fn last_activity(&self) -> Option<u64> {
        self.last_activity
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Tear down, handing back the bus.
    pub fn release(self) -> I2C {
        self.i2c
    }

    /// Read a single word.
    pub fn read(&mut self, address: Address) -> Result<u16, BusError<I2C>> {
        let mut word = [0u16; 1];
        self.read_block(address, &mut word)?;
        Ok(word[0])
    }

    /// Fill `destination` with consecutive words starting at `address`.
    ///
    /// The whole block must lie within one region of the memory map.
    pub fn read_block(
        &mut self,
        address: Address,
        destination: &mut [u16],
    ) -> Result<(), BusError<I2C>> {
        if destination.is_empty() {
            // A zero-length read makes the sensor reject the next transaction.
            return Ok(());
        }
        let access = address.access();
        let last = address.offset(destination.len() - 1);
        if access.is_none() {
            return Err(Error::AccessViolation {
                address,
                violation: Violation::Unmapped,
            });
        }
        if last.and_then(|last| last.access()) != access {
            return Err(Error::AccessViolation {
                address,
                violation: Violation::CrossesRegion,
            });
        }
        let mut scratch = [0u8; BLOCK_CHUNK_WORDS * 2];
        for (chunk_index, chunk) in destination.chunks_mut(BLOCK_CHUNK_WORDS).enumerate() {
            // Checked above: the whole block is inside one region.
            let chunk_address = address
                .offset(chunk_index * BLOCK_CHUNK_WORDS)
                .unwrap_or(address);
            let bytes = &mut scratch[..chunk.len() * 2];
            self.i2c
                .write_read(self.address, &chunk_address.as_bytes(), bytes)
                .map_err(Error::CommunicationFault)?;
            chunk
                .iter_mut()
                .zip(bytes.chunks_exact(2))
                .for_each(|(word, pair)| *word = u16::from_be_bytes([pair[0], pair[1]]));
        }
        trace!(address = %address, words = destination.len(), "read");
        self.touch();
        Ok(())
    }

    /// Write a single word.
    ///
    /// Writes to read-only or unmapped addresses never reach the bus.
    pub fn write(&mut self, address: Address, word: u16) -> Result<(), BusError<I2C>> {
        match address.access() {
            Some(Access::ReadWrite) => {}
            Some(Access::ReadOnly) => {
                return Err(Error::AccessViolation {
                    address,
                    violation: Violation::ReadOnly,
                })
            }
            None => {
                return Err(Error::AccessViolation {
                    address,
                    violation: Violation::Unmapped,
                })
            }
        }
        let [address_high, address_low] = address.as_bytes();
        let [word_high, word_low] = word.to_be_bytes();
        self.i2c
            .write(self.address, &[address_high, address_low, word_high, word_low])
            .map_err(Error::CommunicationFault)?;
        trace!(address = %address, word, "write");
        self.touch();
        Ok(())
    }

    /// Read and decode a typed register.
    pub fn read_register<R: Register>(&mut self) -> Result<R, BusError<I2C>> {
        self.read(R::ADDRESS.into()).map(R::from)
    }

    /// Write the writable bits of `register`, preserving the sensor's reserved bits.
    pub fn update_register<R: Register>(&mut self, register: R) -> Result<(), BusError<I2C>> {
        let address: Address = R::ADDRESS.into();
        let current = self.read(address)?;
        let merged = register.merge_into(current);
        if merged != current {
            self.write(address, merged)?;
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.last_activity = Some(self.clock.now_ms());
    }
}

#[cfg(test)]
mod test {
    use heatseeker_test_data::{datasheet_sensor, I2cOperation, ManualClock, MockSensorBus};
    use proptest::prelude::*;

    use super::*;
    use crate::register::{ControlRegister, FrameRate, StatusRegister};

    fn bus_with_clock(
        mock: &MockSensorBus,
    ) -> (RegisterBus<MockSensorBus, impl Clock>, ManualClock) {
        let time = ManualClock::new();
        let handle = time.clone();
        let bus = RegisterBus::new(mock.clone(), mock.i2c_address(), move || handle.now());
        (bus, time)
    }

    #[test]
    fn read_word() {
        let mock = datasheet_sensor();
        let (mut bus, _) = bus_with_clock(&mock);
        let gain = bus.read(Address::new(0x2430)).unwrap();
        assert_eq!(gain, 0x18ef);
        assert_eq!(
            mock.recent_operations(),
            [I2cOperation::Read {
                address: 0x2430,
                length: 2
            }]
        );
    }

    #[test]
    fn read_block_chunks() {
        let mock = datasheet_sensor();
        let (mut bus, _) = bus_with_clock(&mock);
        let mut eeprom = [0u16; 832];
        bus.read_block(Address::new(0x2400), &mut eeprom).unwrap();
        assert_eq!(eeprom[0x30], 0x18ef);
        assert_eq!(eeprom[0x40], 0x08a0);
        assert_eq!(mock.recent_operations().len(), 13);
    }

    #[test]
    fn read_block_crossing_regions() {
        let mock = datasheet_sensor();
        let (mut bus, _) = bus_with_clock(&mock);
        let mut words = [0u16; 4];
        let result = bus.read_block(Address::new(0x073E), &mut words);
        assert_eq!(
            result,
            Err(Error::AccessViolation {
                address: Address::new(0x073E),
                violation: Violation::CrossesRegion
            })
        );
        assert!(mock.recent_operations().is_empty());
    }

    #[test]
    fn read_unmapped() {
        let mock = datasheet_sensor();
        let (mut bus, _) = bus_with_clock(&mock);
        let result = bus.read(Address::new(0x0100));
        assert!(matches!(
            result,
            Err(Error::AccessViolation {
                violation: Violation::Unmapped,
                ..
            })
        ));
        assert!(mock.recent_operations().is_empty());
    }

    #[test]
    fn write_register() {
        let mock = datasheet_sensor();
        let (mut bus, _) = bus_with_clock(&mock);
        let mut control: ControlRegister = bus.read_register().unwrap();
        control.set_frame_rate(FrameRate::Sixteen);
        bus.update_register(control).unwrap();
        let control: ControlRegister = bus.read_register().unwrap();
        assert_eq!(control.frame_rate(), FrameRate::Sixteen);
    }

    #[test]
    fn update_register_skips_noop_write() {
        let mock = datasheet_sensor();
        let (mut bus, _) = bus_with_clock(&mock);
        let status: StatusRegister = bus.read_register().unwrap();
        mock.clear_recent_operations();
        bus.update_register(status).unwrap();
        // Only the read-back, no write
        assert_eq!(mock.recent_operations().len(), 1);
    }

    #[test]
    fn communication_fault_passes_up() {
        let mock = datasheet_sensor();
        let (mut bus, _) = bus_with_clock(&mock);
        mock.fail_next(1);
        let result = bus.read(Address::new(0x8000));
        assert!(matches!(result, Err(Error::CommunicationFault(_))));
        assert_eq!(bus.last_activity(), None);
        // Not retried internally; the next call goes through.
        assert!(bus.read(Address::new(0x8000)).is_ok());
    }

    #[test]
    fn last_activity_tracks_success() {
        let mock = datasheet_sensor();
        let (mut bus, time) = bus_with_clock(&mock);
        assert_eq!(bus.last_activity(), None);
        time.advance(40);
        bus.read(Address::new(0x800D)).unwrap();
        assert_eq!(bus.last_activity(), Some(40));
        time.advance(5);
        mock.fail_next(1);
        assert!(bus.write(Address::new(0x800D), 0x1901).is_err());
        assert_eq!(bus.last_activity(), Some(40));
    }

    proptest! {
        #[test]
        fn read_only_writes_never_reach_the_bus(offset in 0u16..0x0340, word: u16, eeprom: bool) {
            let mock = datasheet_sensor();
            let (mut bus, _) = bus_with_clock(&mock);
            let base = if eeprom { 0x2400 } else { 0x0400 };
            let address = Address::new(base + offset);
            let result = bus.write(address, word);
            prop_assert_eq!(
                result,
                Err(Error::AccessViolation { address, violation: Violation::ReadOnly })
            );
            prop_assert!(mock.recent_operations().is_empty());
        }
    }
}
