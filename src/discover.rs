//! Records of discovered commissionable devices.
//!
//! Discovery transports (BLE scanner, mDNS client) are not part of this crate. They hand over
//! raw TXT record data or BLE service data which is parsed here into [DiscoveredDevice] and
//! filtered against decoded [OnboardingPayload].

use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;
use std::{
    collections::HashMap,
    io::{Cursor, Read},
};

use crate::{
    error::{CodecError, Result},
    onboarding::{Discriminator, OnboardingPayload},
    util::binary,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiscoveryMethod {
    Ble,
    Mdns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommissioningMode {
    No,
    Yes,
    WithPasscode,
}

impl CommissioningMode {
    fn from_txt(value: &str) -> Option<Self> {
        match value {
            "0" => Some(CommissioningMode::No),
            "1" => Some(CommissioningMode::Yes),
            "2" => Some(CommissioningMode::WithPasscode),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    pub name: String,
    pub source: DiscoveryMethod,
    /// `ip:port` for mDNS, peripheral address for BLE.
    pub address: String,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub discriminator: Option<u16>,
    pub commissioning_mode: Option<CommissioningMode>,
    pub pairing_hint: Option<u16>,
}

impl DiscoveredDevice {
    /// Build device record from decoded TXT record of `_matterc._udp` service instance.
    pub fn from_txt(instance: &str, address: &str, txt: &HashMap<String, String>) -> Self {
        let mut vendor_id = None;
        let mut product_id = None;
        if let Some(vp) = txt.get("VP") {
            let mut split = vp.split('+');
            vendor_id = split.next().and_then(|v| v.parse().ok());
            product_id = split.next().and_then(|v| v.parse().ok());
        }
        Self {
            name: txt.get("DN").cloned().unwrap_or_else(|| instance.to_owned()),
            source: DiscoveryMethod::Mdns,
            address: address.to_owned(),
            vendor_id,
            product_id,
            discriminator: txt.get("D").and_then(|v| v.parse().ok()),
            commissioning_mode: txt.get("CM").and_then(|v| CommissioningMode::from_txt(v)),
            pairing_hint: txt.get("PH").and_then(|v| v.parse().ok()),
        }
    }

    pub fn is_commissionable(&self) -> bool {
        !matches!(self.commissioning_mode, Some(CommissioningMode::No))
    }

    /// Check whether device may be the one described by `payload`.
    ///
    /// Discriminator is compared using [Discriminator::matches] so short discriminator from manual
    /// pairing code matches. Vendor and product constrain only when both sides know them.
    pub fn matches(&self, payload: &OnboardingPayload) -> bool {
        if let Some(d) = self.discriminator {
            match Discriminator::long(d) {
                Ok(d) if d.matches(&payload.discriminator) => {}
                _ => return false,
            }
        }
        let known = |v: Option<u16>| v.filter(|v| *v != 0);
        if let (Some(v), p) = (known(self.vendor_id), payload.vendor_id) {
            if p != 0 && v != p {
                return false;
            }
        }
        if let (Some(v), p) = (known(self.product_id), payload.product_id) {
            if p != 0 && v != p {
                return false;
            }
        }
        true
    }
}

/// Parse TXT record data - sequence of length prefixed `key=value` strings.
/// Strings without `=` are ignored.
pub fn parse_txt_records(data: &[u8]) -> Result<HashMap<String, String>> {
    let mut cursor = Cursor::new(data);
    let mut out = HashMap::new();
    while (cursor.position() as usize) < data.len() {
        let len = cursor.read_u8()?;
        let mut buf = vec![0; len as usize];
        cursor.read_exact(buf.as_mut_slice())?;
        let s = std::str::from_utf8(&buf)
            .map_err(|e| CodecError::InvalidEncoding(format!("txt record: {}", e)))?;
        if let Some((k, v)) = s.split_once('=') {
            out.insert(k.to_owned(), v.to_owned());
        }
    }
    Ok(out)
}

/// Matter BLE service data (service UUID 0xFFF6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BleAdvertisement {
    pub opcode: u8,
    pub version: u8,
    pub discriminator: u16,
    pub vendor_id: u16,
    pub product_id: u16,
    pub flags: Option<u8>,
}

impl BleAdvertisement {
    pub const MIN_LEN: usize = 7;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_LEN {
            return Err(CodecError::FrameTooShort(data.len()));
        }
        let mut cursor = Cursor::new(data);
        let opcode = cursor.read_u8()?;
        let disc_version = cursor.read_u16::<LittleEndian>()?;
        let vendor_id = cursor.read_u16::<LittleEndian>()?;
        let product_id = binary::read_u16_at::<LittleEndian>(data, 5)
            .ok_or(CodecError::FrameTruncated { field: "product id" })?;
        Ok(Self {
            opcode,
            version: (disc_version >> 12) as u8,
            discriminator: disc_version & 0x0fff,
            vendor_id,
            product_id,
            flags: data.get(Self::MIN_LEN).copied(),
        })
    }

    pub fn to_device(&self, address: &str) -> DiscoveredDevice {
        DiscoveredDevice {
            name: format!("BLE-{:04}", self.discriminator),
            source: DiscoveryMethod::Ble,
            address: address.to_owned(),
            vendor_id: Some(self.vendor_id),
            product_id: Some(self.product_id),
            discriminator: Some(self.discriminator),
            // opcode 0 is commissionable advertisement
            commissioning_mode: Some(if self.opcode == 0 {
                CommissioningMode::Yes
            } else {
                CommissioningMode::No
            }),
            pairing_hint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding;

    fn txt(entries: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        for e in entries {
            out.push(e.len() as u8);
            out.extend_from_slice(e.as_bytes());
        }
        out
    }

    #[test]
    fn txt_records() {
        let data = txt(&["D=3840", "VP=65521+32769", "CM=1", "DN=Kitchen", "PH=33", "flag"]);
        let rec = parse_txt_records(&data).unwrap();
        assert_eq!(rec.len(), 5);
        assert_eq!(rec.get("VP").unwrap(), "65521+32769");

        let dev = DiscoveredDevice::from_txt("ABCD1234", "192.168.1.5:5540", &rec);
        assert_eq!(dev.name, "Kitchen");
        assert_eq!(dev.source, DiscoveryMethod::Mdns);
        assert_eq!(dev.vendor_id, Some(65521));
        assert_eq!(dev.product_id, Some(32769));
        assert_eq!(dev.discriminator, Some(3840));
        assert_eq!(dev.commissioning_mode, Some(CommissioningMode::Yes));
        assert_eq!(dev.pairing_hint, Some(33));
        assert!(dev.is_commissionable());
    }

    #[test]
    fn txt_records_truncated() {
        assert!(parse_txt_records(&[5, b'D', b'=']).is_err());
        assert!(parse_txt_records(&[2, 0xff, 0xfe]).is_err());
        assert!(parse_txt_records(&[]).unwrap().is_empty());
    }

    #[test]
    fn minimal_txt() {
        let rec = parse_txt_records(&txt(&["CM=0"])).unwrap();
        let dev = DiscoveredDevice::from_txt("inst", "[fe80::1]:5540", &rec);
        assert_eq!(dev.name, "inst");
        assert_eq!(dev.vendor_id, None);
        assert!(!dev.is_commissionable());
    }

    #[test]
    fn ble_advertisement() {
        // opcode 0, discriminator 3840 version 0, vid 0xfff1, pid 0x8000, flags
        let data = hex::decode("00000ff1ff008001").unwrap();
        let adv = BleAdvertisement::parse(&data).unwrap();
        assert_eq!(adv.opcode, 0);
        assert_eq!(adv.discriminator, 3840);
        assert_eq!(adv.version, 0);
        assert_eq!(adv.vendor_id, 0xfff1);
        assert_eq!(adv.product_id, 0x8000);
        assert_eq!(adv.flags, Some(1));

        let dev = adv.to_device("AA:BB:CC:DD:EE:FF");
        assert_eq!(dev.source, DiscoveryMethod::Ble);
        assert!(dev.is_commissionable());

        let adv = BleAdvertisement::parse(&data[..7]).unwrap();
        assert_eq!(adv.flags, None);
        assert!(matches!(
            BleAdvertisement::parse(&data[..6]),
            Err(CodecError::FrameTooShort(6))
        ));
    }

    #[test]
    fn matching() {
        let manual = onboarding::decode_manual_pairing_code("34970112332").unwrap();
        let mut dev = DiscoveredDevice {
            name: "x".to_owned(),
            source: DiscoveryMethod::Mdns,
            address: "127.0.0.1:5540".to_owned(),
            vendor_id: Some(0xfff1),
            product_id: Some(0x8000),
            discriminator: Some(3840),
            commissioning_mode: Some(CommissioningMode::Yes),
            pairing_hint: None,
        };
        // short discriminator 15 matches 0xf00..=0xfff, manual code without vendor info
        assert!(dev.matches(&manual));
        dev.discriminator = Some(0xfab);
        assert!(dev.matches(&manual));
        dev.discriminator = Some(0x0ab);
        assert!(!dev.matches(&manual));
        dev.discriminator = None;
        assert!(dev.matches(&manual));

        let mut qr = manual.clone();
        qr.discriminator = Discriminator::long(3840).unwrap();
        qr.vendor_id = 0xfff1;
        qr.product_id = 0x8001;
        dev.discriminator = Some(3840);
        assert!(!dev.matches(&qr));
        qr.product_id = 0x8000;
        assert!(dev.matches(&qr));
        dev.discriminator = Some(3841);
        assert!(!dev.matches(&qr));
    }
}
