use std::num::ParseIntError;
use uuid::Uuid;

use crate::device::constants::make_short_uuid;

/// Canonical form of a characteristic or service identifier.
///
/// Full UUIDs become lowercase hyphenated strings, 16/32 bit assigned numbers are expanded against
/// the Bluetooth base UUID and anything else is only lowercased, so that simulated or vendor
/// specific identifiers still compare case-insensitively.
pub fn normalize_id(id: &str) -> String {
    let id = id.trim();

    if let Ok(uuid) = Uuid::parse_str(id) {
        return uuid.to_string();
    }

    let hex = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")).unwrap_or(id);
    if (hex.len() == 4 || hex.len() == 8) && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        if let Ok(short) = u32::from_str_radix(hex, 16) {
            return make_short_uuid(short).to_string();
        }
    }

    id.to_lowercase()
}

pub fn same_id(a: &str, b: &str) -> bool {
    normalize_id(a) == normalize_id(b)
}

/// Converts a MAC address such as `54:81:2D:7E:CD:D2` into its numeric value.
pub fn address_to_u64(address: &str) -> Result<u64, ParseIntError> {
    let parts: Vec<&str> = address.split(':').collect();
    let mut result: u64 = 0;

    for (i, part) in parts.iter().enumerate() {
        let octet = u8::from_str_radix(part, 16)?;
        let shift = 8 * (parts.len() - 1 - i) as u32;
        result = result.wrapping_add((octet as u64).checked_shl(shift).unwrap_or(0));
    }

    Ok(result)
}

/// Converts a MAC address into the little-endian byte order used by the HCI layer.
pub fn address_to_bytes(address: &str) -> Result<[u8; 6], ParseIntError> {
    let mut bytes = [0u8; 6];

    for (i, part) in address.split(':').take(6).enumerate() {
        bytes[bytes.len() - 1 - i] = u8::from_str_radix(part, 16)?;
    }

    Ok(bytes)
}

fn looks_like_address(value: &str) -> bool {
    value.split(':').count() == 6
}

/// Decides whether an advertised peripheral is the one the caller asked for.
///
/// `target` may be a MAC address (compared numerically), a platform identifier or a local name.
pub fn peripheral_matches(target: &str, id: &str, address: Option<&str>, local_name: Option<&str>) -> bool {
    let target = target.trim();
    if target.is_empty() {
        return false;
    }

    if looks_like_address(target) {
        if let (Ok(wanted), Some(Ok(actual))) = (address_to_u64(target), address.map(address_to_u64)) {
            if wanted == actual {
                return true;
            }
        }
    }

    let target_lower = target.to_lowercase();
    let candidates = [Some(id), address, local_name];

    candidates
        .iter()
        .flatten()
        .any(|candidate| candidate.to_lowercase() == target_lower)
}
