// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Non-blocking frame acquisition.
//!
//! The sensor refreshes one sub-page at a time and flags each one in the status register. The
//! [`FrameAcquirer`] checks that flag at most once per [`poll`][FrameAcquirer::poll], so a caller
//! can interleave acquisition with other work and never waits on the sensor.
use arrayvec::ArrayVec;
use embedded_hal::blocking::i2c;
use tracing::debug;

use crate::bus::{BusError, RegisterBus};
use crate::clock::Clock;
use crate::error::Error;
use crate::frame::{RawFrame, SubFrame};
use crate::mlx90640::{Address, RamAddress, References, HEIGHT, PIXELS_PER_SUBPAGE, WIDTH};
use crate::register::{ReorderPattern, StatusRegister, Subpage};

/// Where the acquirer is in the capture cycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AcquisitionState {
    /// Nothing requested, or the last attempt was abandoned.
    Idle,

    /// Waiting for the sensor to flag a sub-page as ready.
    AwaitingSubFrame(Subpage),

    /// Both halves are in and being merged.
    Assembling,

    /// A complete frame is waiting to be taken.
    Ready,
}

/// The outcome of one [`poll`][FrameAcquirer::poll].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AcquireStatus {
    /// Not done yet, poll again later.
    Pending,

    /// A frame is ready to [take][FrameAcquirer::take_frame].
    Ready,
}

/// Sequences the two sub-page captures of a frame and assembles the result.
#[derive(Clone, Debug)]
pub struct FrameAcquirer {
    pattern: ReorderPattern,

    /// How many status checks one sub-page may take.
    max_polls: u16,

    state: AcquisitionState,

    /// Status checks spent on the sub-page currently awaited.
    polls: u16,

    /// Sub-page 0, while waiting for sub-page 1.
    first: Option<SubFrame>,

    frame: Option<RawFrame>,
}

impl FrameAcquirer {
    pub fn new(pattern: ReorderPattern, max_polls: u16) -> Self {
        Self {
            pattern,
            max_polls,
            state: AcquisitionState::Idle,
            polls: 0,
            first: None,
            frame: None,
        }
    }

    pub fn pattern(&self) -> ReorderPattern {
        self.pattern
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn max_polls(&self) -> u16 {
        self.max_polls
    }

    /// Start acquiring a frame. Does nothing unless idle.
    pub fn request(&mut self) {
        if self.state == AcquisitionState::Idle {
            self.transition(AcquisitionState::AwaitingSubFrame(Subpage::Zero));
        }
    }

    /// Drop any partial capture and go back to idle.
    pub fn reset(&mut self) {
        self.first = None;
        self.frame = None;
        self.transition(AcquisitionState::Idle);
    }

    /// Hand over the finished frame and start waiting for the next one.
    ///
    /// `None` when no frame is ready.
    pub fn take_frame(&mut self) -> Option<RawFrame> {
        if self.state != AcquisitionState::Ready {
            return None;
        }
        let frame = self.frame.take();
        self.transition(AcquisitionState::AwaitingSubFrame(Subpage::Zero));
        frame
    }

    /// Advance acquisition by at most one status check.
    ///
    /// An idle acquirer is started first. When the awaited sub-page is ready its pixels and
    /// references are read and the sensor is told it may publish the next one. Any error, or
    /// running out of polls, abandons the frame and leaves the acquirer idle.
    pub fn poll<I2C, C>(
        &mut self,
        bus: &mut RegisterBus<I2C, C>,
    ) -> Result<AcquireStatus, BusError<I2C>>
    where
        I2C: i2c::WriteRead + i2c::Write<Error = <I2C as i2c::WriteRead>::Error>,
        C: Clock,
    {
        self.request();
        let result = self.advance(bus);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn advance<I2C, C>(
        &mut self,
        bus: &mut RegisterBus<I2C, C>,
    ) -> Result<AcquireStatus, BusError<I2C>>
    where
        I2C: i2c::WriteRead + i2c::Write<Error = <I2C as i2c::WriteRead>::Error>,
        C: Clock,
    {
        let awaited = match self.state {
            AcquisitionState::AwaitingSubFrame(subpage) => subpage,
            AcquisitionState::Ready => return Ok(AcquireStatus::Ready),
            // Neither survives past request() and a completed assembly
            AcquisitionState::Idle | AcquisitionState::Assembling => {
                return Ok(AcquireStatus::Pending)
            }
        };
        self.polls = self.polls.saturating_add(1);
        let mut status: StatusRegister = bus.read_register()?;
        match status.ready_subpage() {
            Some(ready) if ready == awaited => {
                let subframe = read_subframe(bus, self.pattern, awaited)?;
                acknowledge(bus, status)?;
                debug!(subpage = %awaited, polls = self.polls, "sub-frame captured");
                match self.first.take() {
                    None => {
                        self.first = Some(subframe);
                        self.transition(AcquisitionState::AwaitingSubFrame(awaited.next()));
                        Ok(AcquireStatus::Pending)
                    }
                    Some(first) => {
                        self.transition(AcquisitionState::Assembling);
                        self.frame = Some(RawFrame::assemble(self.pattern, first, subframe));
                        self.transition(AcquisitionState::Ready);
                        Ok(AcquireStatus::Ready)
                    }
                }
            }
            ready => {
                if let Some(other) = ready {
                    // Out of step with the sensor, skip ahead to the sub-page we want.
                    debug!(awaited = %awaited, ready = %other, "discarding sub-frame");
                    status.reset_new_data();
                    bus.update_register(status)?;
                }
                if self.polls >= self.max_polls {
                    debug!(subpage = %awaited, polls = self.polls, "acquisition timed out");
                    return Err(Error::AcquisitionTimeout {
                        subframe: awaited,
                        polls: self.polls,
                    });
                }
                Ok(AcquireStatus::Pending)
            }
        }
    }

    /// Every change of state starts a fresh poll budget.
    fn transition(&mut self, next: AcquisitionState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "acquisition state");
            self.state = next;
            self.polls = 0;
        }
    }
}

/// Read the pixels of `subpage` in row-major order, then the references captured with them.
fn read_subframe<I2C, C>(
    bus: &mut RegisterBus<I2C, C>,
    pattern: ReorderPattern,
    subpage: Subpage,
) -> Result<SubFrame, BusError<I2C>>
where
    I2C: i2c::WriteRead + i2c::Write<Error = <I2C as i2c::WriteRead>::Error>,
    C: Clock,
{
    // Whole rows are read in both patterns, the chess pattern just reads all of them.
    let rows: ArrayVec<usize, HEIGHT> = (0..HEIGHT)
        .filter(|row| pattern.row_has_subpage(*row, subpage))
        .collect();
    let mut pixels = [0i16; PIXELS_PER_SUBPAGE];
    let mut slots = pixels.iter_mut();
    let mut row_words = [0u16; WIDTH];
    for row in rows {
        let address = Address::new(RamAddress::Base as u16 + (row * WIDTH) as u16);
        bus.read_block(address, &mut row_words)?;
        let captured = row_words
            .iter()
            .enumerate()
            .filter(|(column, _)| pattern.subpage_of(row, *column) == subpage);
        for ((_, word), slot) in captured.zip(&mut slots) {
            *slot = *word as i16;
        }
    }
    let references = References::read(bus, subpage)?;
    Ok(SubFrame::new(subpage, pixels, references))
}

/// Clear the new data flag so the sensor moves on to the next sub-page.
fn acknowledge<I2C, C>(
    bus: &mut RegisterBus<I2C, C>,
    mut status: StatusRegister,
) -> Result<(), BusError<I2C>>
where
    I2C: i2c::WriteRead + i2c::Write<Error = <I2C as i2c::WriteRead>::Error>,
    C: Clock,
{
    status.reset_new_data();
    bus.update_register(status)
}
