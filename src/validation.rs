//! Input validation and sanitization
//!
//! Everything that ends up as a process argument or as a line of an
//! interface config passes through here first.

use crate::error::ValidationError;
use std::net::IpAddr;

/// Maximum length for interface names (Linux kernel limit is 15)
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Maximum length for configuration values
const MAX_CONFIG_VALUE_LEN: usize = 1024;

/// Maximum length for error messages shown to users
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Validate interface name to prevent command injection
///
/// Interface names must be alphanumeric with optional dashes and underscores,
/// and no longer than 15 characters (Linux kernel limit). The name is also
/// used to build file names in the install directory, so path separators
/// and dots are rejected as well.
pub fn validate_interface_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::new("Interface name cannot be empty"));
    }

    if name.len() > MAX_INTERFACE_NAME_LEN {
        return Err(ValidationError::new(format!(
            "Interface name too long (max {} characters)",
            MAX_INTERFACE_NAME_LEN
        )));
    }

    // Only allow alphanumeric, dash, underscore
    for c in name.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' {
            return Err(ValidationError::new(format!(
                "Invalid interface name '{}': contains invalid character '{}'",
                name.escape_debug(),
                c.escape_debug()
            )));
        }
    }

    // Don't allow names starting with dash (could be interpreted as option)
    if name.starts_with('-') {
        return Err(ValidationError::new("Interface name cannot start with dash"));
    }

    Ok(())
}

/// Parse a listen port from its textual form
pub fn parse_listen_port(port: &str) -> Result<u16, ValidationError> {
    port.trim()
        .parse::<u16>()
        .map_err(|e| ValidationError::new(format!("Invalid listen port '{}': {}", port, e)))
}

/// Validate CIDR notation (e.g. "10.0.0.1/24") for IPv4 or IPv6
pub fn validate_cidr(cidr: &str) -> Result<(), ValidationError> {
    let (ip, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| ValidationError::new(format!("Address '{}' is missing a prefix length", cidr)))?;

    let addr = ip
        .parse::<IpAddr>()
        .map_err(|_| ValidationError::new(format!("Invalid IP address: {}", ip)))?;

    let prefix = prefix
        .parse::<u8>()
        .map_err(|_| ValidationError::new(format!("Invalid prefix length: {}", prefix)))?;

    let max = if addr.is_ipv6() { 128 } else { 32 };
    if prefix > max {
        return Err(ValidationError::new(format!(
            "Prefix length {} exceeds maximum {}",
            prefix, max
        )));
    }

    Ok(())
}

/// Check a single-line configuration value
///
/// Rejects values that would break the line-oriented config format.
pub fn validate_config_value(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("value cannot be empty"));
    }

    if value.chars().any(|c| c.is_control() && c != '\t') {
        return Err(ValidationError::new("value contains control characters"));
    }

    if value.len() > MAX_CONFIG_VALUE_LEN {
        return Err(ValidationError::new(format!(
            "value too long (max {} characters)",
            MAX_CONFIG_VALUE_LEN
        )));
    }

    Ok(())
}

/// Sanitize tool output before it is placed in an error message
pub fn sanitize_error_message(stderr: &str) -> String {
    let mut sanitized = stderr.trim().to_string();

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let mut cut = MAX_ERROR_MESSAGE_LEN;
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str("... (truncated)");
    }

    sanitized
}
