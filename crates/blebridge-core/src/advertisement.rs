//! Advertisement data and the raw scan record codec.
//!
//! Native stacks hand over advertisements already decoded (name, tx power,
//! service UUIDs, service data, manufacturer data). Script callers expect the
//! raw AD structure bytes (`len, type, data...`) in `scanRecord`, so the
//! decoded fields are encoded back into that form here.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, BytesMut};
use uuid::Uuid;

use blebridge_types::uuid::{short_uuid, uuid_from_u16, uuid_from_u32};
use blebridge_types::{ParseError, ParseResult, ScanRecord};

use crate::native::PeripheralId;

/// RSSI reported when the stack did not provide one.
pub const RSSI_UNAVAILABLE: i16 = 127;

/// Largest payload that fits one AD structure.
const MAX_AD_PAYLOAD: usize = 254;

/// AD type codes used by the codec.
pub mod ad_type {
    /// Incomplete list of 16-bit service UUIDs.
    pub const INCOMPLETE_UUID16_LIST: u8 = 0x02;
    /// Complete list of 16-bit service UUIDs.
    pub const COMPLETE_UUID16_LIST: u8 = 0x03;
    /// Incomplete list of 128-bit service UUIDs.
    pub const INCOMPLETE_UUID128_LIST: u8 = 0x06;
    /// Complete list of 128-bit service UUIDs.
    pub const COMPLETE_UUID128_LIST: u8 = 0x07;
    /// Shortened local name.
    pub const SHORTENED_LOCAL_NAME: u8 = 0x08;
    /// Complete local name.
    pub const COMPLETE_LOCAL_NAME: u8 = 0x09;
    /// Tx power level.
    pub const TX_POWER_LEVEL: u8 = 0x0A;
    /// Service data with a 16-bit UUID.
    pub const SERVICE_DATA_UUID16: u8 = 0x16;
    /// Service data with a 32-bit UUID.
    pub const SERVICE_DATA_UUID32: u8 = 0x20;
    /// Service data with a 128-bit UUID.
    pub const SERVICE_DATA_UUID128: u8 = 0x21;
    /// Manufacturer specific data.
    pub const MANUFACTURER_DATA: u8 = 0xFF;
}

/// One decoded advertisement from a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advertisement {
    /// Peripheral that advertised.
    pub peripheral: PeripheralId,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// Advertised or cached local name.
    pub local_name: Option<String>,
    /// Advertised transmit power in dBm.
    pub tx_power_level: Option<i16>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
    /// Service data keyed by service UUID.
    pub service_data: BTreeMap<Uuid, Vec<u8>>,
    /// Manufacturer data keyed by company identifier.
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
}

/// A raw AD structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdStructure {
    /// AD type code.
    pub ad_type: u8,
    /// Payload following the type byte.
    pub data: Vec<u8>,
}

impl Advertisement {
    /// Create an empty advertisement for a peripheral.
    pub fn new(peripheral: PeripheralId) -> Self {
        Self {
            peripheral,
            ..Self::default()
        }
    }

    /// Encode the advertisement as raw AD structures.
    pub fn scan_record(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();

        if let Some(name) = &self.local_name {
            put_structure(&mut buf, ad_type::COMPLETE_LOCAL_NAME, name.as_bytes());
        }

        if let Some(tx_power) = self.tx_power_level {
            let level = tx_power.clamp(i8::MIN.into(), i8::MAX.into()) as i8;
            put_structure(&mut buf, ad_type::TX_POWER_LEVEL, &level.to_le_bytes());
        }

        let mut uuid16 = BytesMut::new();
        let mut uuid128 = BytesMut::new();
        for uuid in &self.services {
            match short_uuid(uuid) {
                Some(short) => uuid16.put_u16_le(short),
                None => uuid128.put_slice(&uuid_le_bytes(uuid)),
            }
        }
        if !uuid16.is_empty() {
            put_structure(&mut buf, ad_type::COMPLETE_UUID16_LIST, &uuid16);
        }
        if !uuid128.is_empty() {
            put_structure(&mut buf, ad_type::COMPLETE_UUID128_LIST, &uuid128);
        }

        for (uuid, data) in &self.service_data {
            let mut payload = BytesMut::with_capacity(16 + data.len());
            let kind = match short_uuid(uuid) {
                Some(short) => {
                    payload.put_u16_le(short);
                    ad_type::SERVICE_DATA_UUID16
                }
                None => {
                    payload.put_slice(&uuid_le_bytes(uuid));
                    ad_type::SERVICE_DATA_UUID128
                }
            };
            payload.put_slice(data);
            put_structure(&mut buf, kind, &payload);
        }

        for (company, data) in &self.manufacturer_data {
            let mut payload = BytesMut::with_capacity(2 + data.len());
            payload.put_u16_le(*company);
            payload.put_slice(data);
            put_structure(&mut buf, ad_type::MANUFACTURER_DATA, &payload);
        }

        buf.to_vec()
    }

    /// Build the scan record delivered to script callers.
    pub fn to_record(&self) -> ScanRecord {
        ScanRecord {
            address: self.peripheral.to_string(),
            rssi: self.rssi.unwrap_or(RSSI_UNAVAILABLE),
            name: self.local_name.clone(),
            scan_record: self.scan_record(),
        }
    }

    /// Decode raw AD structures into an advertisement.
    ///
    /// Unknown AD types are ignored. A shortened name is used only when no
    /// complete name is present.
    pub fn from_scan_record(
        peripheral: PeripheralId,
        rssi: Option<i16>,
        bytes: &[u8],
    ) -> ParseResult<Self> {
        let mut adv = Self {
            rssi,
            ..Self::new(peripheral)
        };
        let mut shortened_name = None;

        for structure in parse_ad_structures(bytes)? {
            let mut data = structure.data.as_slice();
            match structure.ad_type {
                ad_type::COMPLETE_LOCAL_NAME => {
                    adv.local_name = Some(String::from_utf8_lossy(data).into_owned());
                }
                ad_type::SHORTENED_LOCAL_NAME => {
                    shortened_name = Some(String::from_utf8_lossy(data).into_owned());
                }
                ad_type::TX_POWER_LEVEL => {
                    if data.len() != 1 {
                        return Err(invalid_length("tx power level", data.len()));
                    }
                    adv.tx_power_level = Some(data.get_i8().into());
                }
                ad_type::INCOMPLETE_UUID16_LIST | ad_type::COMPLETE_UUID16_LIST => {
                    if data.len() % 2 != 0 {
                        return Err(invalid_length("16-bit UUID list", data.len()));
                    }
                    while data.has_remaining() {
                        adv.services.push(uuid_from_u16(data.get_u16_le()));
                    }
                }
                ad_type::INCOMPLETE_UUID128_LIST | ad_type::COMPLETE_UUID128_LIST => {
                    if data.len() % 16 != 0 {
                        return Err(invalid_length("128-bit UUID list", data.len()));
                    }
                    while data.has_remaining() {
                        adv.services.push(uuid_from_le(&mut data));
                    }
                }
                ad_type::SERVICE_DATA_UUID16 => {
                    if data.len() < 2 {
                        return Err(invalid_length("16-bit service data", data.len()));
                    }
                    let uuid = uuid_from_u16(data.get_u16_le());
                    adv.service_data.insert(uuid, data.to_vec());
                }
                ad_type::SERVICE_DATA_UUID32 => {
                    if data.len() < 4 {
                        return Err(invalid_length("32-bit service data", data.len()));
                    }
                    let uuid = uuid_from_u32(data.get_u32_le());
                    adv.service_data.insert(uuid, data.to_vec());
                }
                ad_type::SERVICE_DATA_UUID128 => {
                    if data.len() < 16 {
                        return Err(invalid_length("128-bit service data", data.len()));
                    }
                    let uuid = uuid_from_le(&mut data);
                    adv.service_data.insert(uuid, data.to_vec());
                }
                ad_type::MANUFACTURER_DATA => {
                    if data.len() < 2 {
                        return Err(invalid_length("manufacturer data", data.len()));
                    }
                    let company = data.get_u16_le();
                    adv.manufacturer_data.insert(company, data.to_vec());
                }
                _ => {}
            }
        }

        if adv.local_name.is_none() {
            adv.local_name = shortened_name;
        }
        Ok(adv)
    }
}

/// Split a payload into AD structures.
///
/// Parsing stops at the first zero length byte (the rest is padding).
pub fn parse_ad_structures(bytes: &[u8]) -> ParseResult<Vec<AdStructure>> {
    let mut structures = Vec::new();
    let mut buf = bytes;

    while buf.has_remaining() {
        let offset = bytes.len() - buf.remaining();
        let len = usize::from(buf.get_u8());
        if len == 0 {
            break;
        }
        if buf.remaining() < len {
            return Err(ParseError::Truncated {
                offset,
                needed: len,
                available: buf.remaining(),
            });
        }
        let ad_type = buf.get_u8();
        let data = buf.copy_to_bytes(len - 1).to_vec();
        structures.push(AdStructure { ad_type, data });
    }

    Ok(structures)
}

fn put_structure(buf: &mut BytesMut, kind: u8, payload: &[u8]) {
    if payload.len() > MAX_AD_PAYLOAD {
        tracing::debug!(
            "Skipping AD type {:#04x}: {} byte payload does not fit",
            kind,
            payload.len()
        );
        return;
    }
    buf.put_u8((payload.len() + 1) as u8);
    buf.put_u8(kind);
    buf.put_slice(payload);
}

fn uuid_le_bytes(uuid: &Uuid) -> [u8; 16] {
    let mut bytes = *uuid.as_bytes();
    bytes.reverse();
    bytes
}

fn uuid_from_le(data: &mut &[u8]) -> Uuid {
    let mut bytes = [0u8; 16];
    data.copy_to_slice(&mut bytes);
    bytes.reverse();
    Uuid::from_bytes(bytes)
}

fn invalid_length(what: &str, len: usize) -> ParseError {
    ParseError::InvalidValue(format!("{what} has invalid length {len}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn peripheral() -> PeripheralId {
        PeripheralId::new("AA:BB:CC:DD:EE:FF")
    }

    #[test]
    fn test_encode_name_and_tx_power() {
        let adv = Advertisement {
            local_name: Some("HRM".into()),
            tx_power_level: Some(-8),
            ..Advertisement::new(peripheral())
        };
        assert_eq!(
            adv.scan_record(),
            vec![0x04, 0x09, b'H', b'R', b'M', 0x02, 0x0A, 0xF8]
        );
    }

    #[test]
    fn test_encode_uuid_lists_little_endian() {
        let custom = Uuid::parse_str("f0cd1400-95da-4f4b-9ac8-aa55d312af0c").unwrap();
        let adv = Advertisement {
            services: vec![uuid_from_u16(0x180D), custom],
            ..Advertisement::new(peripheral())
        };
        let record = adv.scan_record();
        assert_eq!(&record[..4], &[0x03, 0x03, 0x0D, 0x18]);
        assert_eq!(record[4], 17);
        assert_eq!(record[5], ad_type::COMPLETE_UUID128_LIST);
        assert_eq!(record[6], 0x0C);
        assert_eq!(record[21], 0xF0);
    }

    #[test]
    fn test_encode_manufacturer_data() {
        let mut adv = Advertisement::new(peripheral());
        adv.manufacturer_data.insert(0x0702, vec![0x21, 0x01]);
        assert_eq!(adv.scan_record(), vec![0x05, 0xFF, 0x02, 0x07, 0x21, 0x01]);
    }

    #[test]
    fn test_oversized_payload_is_skipped() {
        let mut adv = Advertisement::new(peripheral());
        adv.manufacturer_data.insert(1, vec![0; 253]);
        adv.service_data.insert(uuid_from_u16(0xFEAA), vec![1]);
        let record = adv.scan_record();
        assert_eq!(record, vec![0x04, 0x16, 0xAA, 0xFE, 0x01]);
    }

    #[test]
    fn test_to_record_defaults_rssi() {
        let adv = Advertisement::new(peripheral());
        let record = adv.to_record();
        assert_eq!(record.rssi, RSSI_UNAVAILABLE);
        assert_eq!(record.address, "AA:BB:CC:DD:EE:FF");
        assert!(record.scan_record.is_empty());
    }

    #[test]
    fn test_parse_stops_at_zero_length() {
        let structures = parse_ad_structures(&[0x02, 0x01, 0x06, 0x00, 0xFF, 0xFF]).unwrap();
        assert_eq!(
            structures,
            vec![AdStructure {
                ad_type: 0x01,
                data: vec![0x06]
            }]
        );
    }

    #[test]
    fn test_parse_rejects_truncation() {
        let err = parse_ad_structures(&[0x02, 0x01, 0x06, 0x05, 0x09, b'a']).unwrap_err();
        assert_eq!(
            err,
            ParseError::Truncated {
                offset: 3,
                needed: 5,
                available: 2
            }
        );
    }

    #[test]
    fn test_decode_prefers_complete_name() {
        let bytes = [0x03, 0x08, b'H', b'R', 0x04, 0x09, b'H', b'R', b'M'];
        let adv = Advertisement::from_scan_record(peripheral(), Some(-70), &bytes).unwrap();
        assert_eq!(adv.local_name.as_deref(), Some("HRM"));

        let adv = Advertisement::from_scan_record(peripheral(), None, &bytes[..4]).unwrap();
        assert_eq!(adv.local_name.as_deref(), Some("HR"));
    }

    #[test]
    fn test_decode_rejects_odd_uuid16_list() {
        let err = Advertisement::from_scan_record(peripheral(), None, &[0x04, 0x03, 1, 2, 3])
            .unwrap_err();
        assert!(matches!(err, ParseError::InvalidValue(_)));
    }

    fn uuid_strategy() -> impl Strategy<Value = Uuid> {
        prop_oneof![
            any::<u16>().prop_map(uuid_from_u16),
            any::<u128>()
                .prop_map(Uuid::from_u128)
                .prop_filter("not a base UUID", |u| short_uuid(u).is_none()),
        ]
    }

    proptest! {
        #[test]
        fn decoding_an_encoded_advertisement_restores_it(
            name in proptest::option::of("[a-zA-Z0-9 ]{0,20}"),
            tx_power in proptest::option::of(-100i16..20),
            services in proptest::collection::btree_set(uuid_strategy(), 0..4),
            service_data in proptest::collection::btree_map(
                uuid_strategy(),
                proptest::collection::vec(any::<u8>(), 0..20),
                0..3,
            ),
            manufacturer_data in proptest::collection::btree_map(
                any::<u16>(),
                proptest::collection::vec(any::<u8>(), 0..20),
                0..3,
            ),
        ) {
            let mut services: Vec<Uuid> = services.into_iter().collect();
            // The encoder emits 16-bit UUIDs before 128-bit ones.
            services.sort_by_key(|u| short_uuid(u).is_none());

            let adv = Advertisement {
                peripheral: peripheral(),
                rssi: Some(-60),
                local_name: name,
                tx_power_level: tx_power,
                services,
                service_data,
                manufacturer_data,
            };
            let decoded =
                Advertisement::from_scan_record(peripheral(), Some(-60), &adv.scan_record()).unwrap();
            prop_assert_eq!(decoded, adv);
        }

        #[test]
        fn parser_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = Advertisement::from_scan_record(peripheral(), None, &bytes);
        }
    }
}
