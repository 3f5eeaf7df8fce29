//! Human-readable error descriptions and structured JSON error formatting.

use trickler_core::{BuildError, FaultCode, ScaleError};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingSerial => {
                "What happened: No serial port was provided for the balance.\nLikely causes: The UART failed to open or was not wired into the builder.\nHow to fix: Check serial.path in the config and that the port is not held by another process.".to_string()
            }
            BuildError::MissingMotors => {
                "What happened: No motor driver was provided.\nLikely causes: Stepper GPIO failed to initialize.\nHow to fix: Check the bulk_* and trickle_* pins in [pins].".to_string()
            }
            BuildError::MissingInputs => {
                "What happened: No operator inputs were provided.\nLikely causes: Enable switch or button GPIO failed to initialize.\nHow to fix: Check pins.enable, pins.up and pins.down.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(fault) = err.downcast_ref::<FaultCode>() {
        let (causes, fix) = match fault {
            FaultCode::ScaleTimeout => (
                "Balance switched off, cable unplugged, or baud rate mismatch",
                "Check the balance and cable, then cycle the enable switch",
            ),
            FaultCode::ScaleFormat => (
                "Balance is set up for a different output format",
                "Set the balance data format to the standard A&D format and power cycle",
            ),
            FaultCode::ScaleLink => (
                "Serial port error",
                "Check serial.path and the cable, then cycle the enable switch",
            ),
            FaultCode::MotorDriver => (
                "Stepper driver or GPIO failure",
                "Check motor wiring and power, then power cycle",
            ),
        };
        return format!(
            "What happened: Fault {} ({fault}).\nLikely causes: {causes}.\nHow to fix: {fix}.",
            fault.code()
        );
    }

    if let Some(se) = err.downcast_ref::<ScaleError>() {
        return match se {
            ScaleError::Timeout => "What happened: The balance did not answer in time.\nLikely causes: Balance off, wrong serial.path or baud.\nHow to fix: Check the balance and cable; consider raising serial.response_timeout_ms.".to_string(),
            ScaleError::Format => "What happened: The balance answered in an unexpected format.\nLikely causes: Output format or unit set differently on the balance.\nHow to fix: Select the standard output format on the balance.".to_string(),
            ScaleError::Link(msg) => format!(
                "What happened: Serial link error ({msg}).\nLikely causes: Port missing or in use.\nHow to fix: Check serial.path and permissions."
            ),
        };
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("open uart") || lower.contains("gpio") {
        return "What happened: Failed to initialize hardware.\nLikely causes: Incorrect pin numbers, serial path, or insufficient permissions.\nHow to fix: Fix [pins] and [serial] in the config; ensure the process may access GPIO and the UART.".to_string();
    }

    if lower.contains("read config") || lower.contains("parse config") {
        let cause = err
            .chain()
            .nth(1)
            .map(|c| format!("\nCause: {c}"))
            .unwrap_or_default();
        return format!("What happened: {msg}.{cause}\nHow to fix: Check the path and TOML syntax.");
    }

    if lower.contains("must be") {
        return format!(
            "What happened: Configuration is invalid ({msg}).\nHow to fix: Edit the TOML config and try again."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: faults map to 10 + code, build errors to 2, anything else to 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(fault) = err.downcast_ref::<FaultCode>() {
        return 10 + i32::from(fault.code());
    }
    if err.downcast_ref::<BuildError>().is_some() {
        return 2;
    }
    1
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    if let Some(fault) = err.downcast_ref::<FaultCode>() {
        return json!({
            "reason": "Fault",
            "code": fault.code(),
            "recoverable": fault.is_recoverable(),
            "message": humanize(err),
        })
        .to_string();
    }

    json!({ "reason": "Error", "message": humanize(err) }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_exit_codes_are_offset() {
        let e = eyre::Report::new(FaultCode::ScaleFormat);
        assert_eq!(exit_code_for_error(&e), 12);
        assert!(humanize(&e).contains("Fault 2"));
    }

    #[test]
    fn fault_json_carries_code() {
        let e = eyre::Report::new(FaultCode::ScaleTimeout);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&e)).unwrap();
        assert_eq!(v["reason"], "Fault");
        assert_eq!(v["code"], 1);
        assert_eq!(v["recoverable"], true);
    }

    #[test]
    fn build_errors_exit_two() {
        let e = eyre::Report::new(BuildError::MissingSerial);
        assert_eq!(exit_code_for_error(&e), 2);
        assert!(humanize(&e).contains("serial"));
    }
}
