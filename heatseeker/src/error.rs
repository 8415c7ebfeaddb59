// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
use core::fmt;

use crate::mlx90640::Address;
use crate::register::{ReorderPattern, Subpage};

/// Why a register access was refused before reaching the bus.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Violation {
    /// The register exists but is read-only.
    #[error("register is read-only")]
    ReadOnly,

    /// Nothing is mapped at the address.
    #[error("address is not mapped")]
    Unmapped,

    /// A block access would run past the end of the region it started in.
    #[error("block crosses a region boundary")]
    CrossesRegion,
}

/// The calibration block failed a sanity check.
///
/// A sensor that produces any of these must not be used for acquisition.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum CalibrationError {
    #[error("calibration block holds {found} words, expected {expected}")]
    Truncated { expected: usize, found: usize },

    #[error("calibration coefficient `{0}` is zero")]
    ZeroCoefficient(&'static str),

    #[error("calibration coefficient `{0}` is out of range")]
    OutOfRange(&'static str),

    #[error("{count} pixels are flagged as broken or outliers, at most {limit} are tolerated")]
    TooManyBadPixels { count: usize, limit: usize },

    #[error("bad pixels {first} and {second} are adjacent")]
    AdjacentBadPixels { first: usize, second: usize },
}

/// A configuration value was rejected during validation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("the lower bound of `{0}` exceeds its upper bound")]
    InvertedBounds(&'static str),

    #[error("`{0}` must be non-zero")]
    Zero(&'static str),

    #[error("`{0}` is out of range")]
    OutOfRange(&'static str),

    #[error("sensor is in {sensor:?} mode but {configured:?} was configured")]
    PatternMismatch {
        sensor: ReorderPattern,
        configured: ReorderPattern,
    },
}

/// A non-positive timestep was given to a controller.
#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
#[error("controller timestep must be positive, got {dt}")]
pub struct InvalidTimestep {
    pub dt: f32,
}

/// Errors from talking to the sensor, generic over the transport's error type.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Error<E> {
    /// The access was rejected before any bus transaction took place.
    #[error("access to {address} rejected: {violation}")]
    AccessViolation {
        address: Address,
        violation: Violation,
    },

    /// The transport reported a failure (NACK, timeout, arbitration loss...).
    #[error("communication fault: {0:?}")]
    CommunicationFault(E),

    /// The sensor never flagged the awaited sub-frame as ready.
    #[error("sub-frame {subframe} not ready after {polls} polls")]
    AcquisitionTimeout { subframe: Subpage, polls: u16 },

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error(transparent)]
    Configuration(#[from] ConfigError),
}

impl<E> Error<E> {
    /// Whether retrying the operation later might succeed.
    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }

    pub fn kind(&self) -> FaultKind {
        match self {
            Error::AccessViolation { .. } => FaultKind::AccessViolation,
            Error::CommunicationFault(_) => FaultKind::CommunicationFault,
            Error::AcquisitionTimeout { .. } => FaultKind::AcquisitionTimeout,
            Error::Calibration(_) => FaultKind::CalibrationFormat,
            Error::Configuration(_) => FaultKind::Configuration,
        }
    }
}

/// The category of a fault, stripped of any transport-specific detail.
///
/// This is what the scheduler records against a task.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FaultKind {
    AccessViolation,
    CommunicationFault,
    AcquisitionTimeout,
    CalibrationFormat,
    InvalidTimestep,
    Configuration,

    /// A motor, encoder or trigger collaborator reported an error.
    Actuator,
}

impl FaultKind {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FaultKind::CommunicationFault | FaultKind::AcquisitionTimeout
        )
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultKind::AccessViolation => "access violation",
            FaultKind::CommunicationFault => "communication fault",
            FaultKind::AcquisitionTimeout => "acquisition timeout",
            FaultKind::CalibrationFormat => "calibration format error",
            FaultKind::InvalidTimestep => "invalid timestep",
            FaultKind::Configuration => "invalid configuration",
            FaultKind::Actuator => "actuator fault",
        };
        f.write_str(name)
    }
}

impl From<InvalidTimestep> for FaultKind {
    fn from(_: InvalidTimestep) -> Self {
        FaultKind::InvalidTimestep
    }
}

#[cfg(test)]
mod test {
    #[cfg(feature = "std")]
    extern crate std;

    use super::*;

    #[test]
    fn transient_kinds() {
        let comm: Error<()> = Error::CommunicationFault(());
        assert!(comm.is_transient());
        let timeout: Error<()> = Error::AcquisitionTimeout {
            subframe: Subpage::One,
            polls: 3,
        };
        assert!(timeout.is_transient());
        let violation: Error<()> = Error::AccessViolation {
            address: Address::new(0x0400),
            violation: Violation::ReadOnly,
        };
        assert!(!violation.is_transient());
        let calibration: Error<()> = CalibrationError::ZeroCoefficient("gain").into();
        assert_eq!(calibration.kind(), FaultKind::CalibrationFormat);
        assert!(!calibration.is_transient());
    }

    #[cfg(feature = "std")]
    #[test]
    fn display() {
        use std::string::ToString;

        let violation: Error<()> = Error::AccessViolation {
            address: Address::new(0x0400),
            violation: Violation::ReadOnly,
        };
        assert_eq!(
            violation.to_string(),
            "access to 0x0400 rejected: register is read-only"
        );
        let timeout: Error<()> = Error::AcquisitionTimeout {
            subframe: Subpage::One,
            polls: 3,
        };
        assert_eq!(timeout.to_string(), "sub-frame 1 not ready after 3 polls");
        assert_eq!(Violation::Unmapped.to_string(), "address is not mapped");
        assert_eq!(
            Violation::CrossesRegion.to_string(),
            "block crosses a region boundary"
        );
    }
}
