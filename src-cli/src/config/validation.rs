//! Setting value validation.

/// Validate a setting value. Returns `Ok(())` if valid, or an error message.
pub fn validate_setting(key: &str, value: &str) -> Result<(), String> {
    match key {
        "NIIMBOT_MODEL" => {
            if value.is_empty() || value.len() > 16 {
                return Err("model must be 1-16 characters".into());
            }
            if !value.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err("model must be alphanumeric (e.g. d110, b1)".into());
            }
        }
        "NIIMBOT_DENSITY" => validate_int_range(value, 1, 5)?,
        "NIIMBOT_QUANTITY" => validate_int_range(value, 1, u16::MAX as i64)?,
        "NIIMBOT_SCAN_TIMEOUT" => validate_int_range(value, 1, 60)?,
        "NIIMBOT_COMMAND_TIMEOUT" => validate_int_range(value, 1, 120)?,
        "NIIMBOT_CLOUD_LOOKUP" | "DRY_RUN_MODE" => {
            if value != "true" && value != "false" {
                return Err("must be 'true' or 'false'".into());
            }
        }
        _ => {}
    }
    Ok(())
}

fn validate_int_range(value: &str, min: i64, max: i64) -> Result<(), String> {
    let v: i64 = value.parse().map_err(|_| "must be an integer")?;
    if !(min..=max).contains(&v) {
        return Err(format!("must be between {min} and {max}"));
    }
    Ok(())
}
