use thiserror::Error;

/// Failure of a single instantaneous scale read.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScaleError {
    /// No complete response inside the response window. Recoverable; the next
    /// poll may succeed.
    #[error("scale response timed out")]
    Timeout,
    /// Response carried characters outside `.`..`9`; the balance is set up
    /// for a different output format.
    #[error("scale response includes out of range characters")]
    Format,
    /// The serial port itself failed.
    #[error("scale link error: {0}")]
    Link(String),
}

/// Why a motion sequence (and the throw it belongs to) stopped early.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MotionError {
    #[error("enable released during motion")]
    Cancelled,
    #[error("pan weight dropped below zero during trickle")]
    PanRemoved,
    #[error("bulk request of {0:.2} gr exceeds the throw limit")]
    OverLimit(f32),
    #[error(transparent)]
    Scale(#[from] ScaleError),
    #[error("motor driver error: {0}")]
    Driver(String),
}

/// Latched error code presented by the error states.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FaultCode {
    #[error("scale response timed out")]
    ScaleTimeout = 1,
    #[error("scale response format mismatch")]
    ScaleFormat = 2,
    #[error("scale serial link failure")]
    ScaleLink = 3,
    #[error("motor driver failure")]
    MotorDriver = 4,
}

impl FaultCode {
    /// Numeric code shown to the operator.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Recoverable faults clear on an enable toggle cycle; the rest need a
    /// power cycle.
    pub fn is_recoverable(self) -> bool {
        matches!(self, FaultCode::ScaleTimeout | FaultCode::ScaleLink)
    }
}

impl From<&ScaleError> for FaultCode {
    fn from(e: &ScaleError) -> Self {
        match e {
            ScaleError::Timeout => FaultCode::ScaleTimeout,
            ScaleError::Format => FaultCode::ScaleFormat,
            ScaleError::Link(_) => FaultCode::ScaleLink,
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing scale serial port")]
    MissingSerial,
    #[error("missing motor driver")]
    MissingMotors,
    #[error("missing operator inputs")]
    MissingInputs,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_codes_classify_recoverability() {
        assert!(FaultCode::from(&ScaleError::Timeout).is_recoverable());
        assert!(FaultCode::from(&ScaleError::Link("eio".into())).is_recoverable());
        assert!(!FaultCode::from(&ScaleError::Format).is_recoverable());
        assert!(!FaultCode::MotorDriver.is_recoverable());
        assert_eq!(FaultCode::ScaleFormat.code(), 2);
    }
}
