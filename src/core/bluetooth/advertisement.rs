//! Advertisement decoding
//! Resolves the manufacturer identity of a peripheral from its raw
//! manufacturer-specific advertisement data.

use log::debug;

use crate::core::bluetooth::registry::ManufacturerRegistry;

/// Result of decoding a single advertisement
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedAdvertisement {
    /// Company identifier from the first two payload bytes (little endian)
    pub manufacturer_id: Option<u16>,
    /// Local name or registry company name; empty when unknown
    pub display_name: String,
    /// Vendor-defined bytes following the company identifier
    pub vendor_data: Vec<u8>,
}

/// Decodes manufacturer data. An advertised local name takes precedence over the
/// registry because many products reuse the company identifier of their silicon vendor.
pub fn decode(
    payload: &[u8],
    local_name: Option<&str>,
    registry: &ManufacturerRegistry,
) -> DecodedAdvertisement {
    let (id_bytes, vendor_data) = match payload {
        [lo, hi, rest @ ..] => ([*lo, *hi], rest),
        _ => return DecodedAdvertisement::default(),
    };

    let manufacturer_id = u16::from_le_bytes(id_bytes);
    debug!("Manufacturer ID: 0x{:04X}", manufacturer_id);

    let display_name = match local_name.filter(|name| !name.is_empty()) {
        Some(name) => name.to_string(),
        None => registry
            .lookup(manufacturer_id)
            .filter(|name| !name.is_empty())
            .unwrap_or_default()
            .to_string(),
    };

    if !vendor_data.is_empty() {
        debug!("Vendor data: {}", hex::encode_upper(vendor_data));
    }

    DecodedAdvertisement {
        manufacturer_id: Some(manufacturer_id),
        display_name,
        vendor_data: vendor_data.to_vec(),
    }
}

/// Rebuilds the raw manufacturer payload from a split company identifier and vendor data,
/// as some radio stacks hand them over separately.
pub fn raw_manufacturer_payload(company_id: u16, vendor_data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + vendor_data.len());
    payload.extend_from_slice(&company_id.to_le_bytes());
    payload.extend_from_slice(vendor_data);
    payload
}
