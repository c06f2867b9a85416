//! Onboarding payloads - QR code (`MT:` + base38) and manual pairing code.
//!
//! Both representations carry the same logical fields, but manual pairing code transfers only the
//! upper 4 bits of discriminator. Such discriminator is represented by [Discriminator::short]
//! and must be compared using [Discriminator::matches].
//!
//! ```
//! # use matcom::onboarding;
//! let payload = onboarding::decode_manual_pairing_code("3497-011-2332").unwrap();
//! assert_eq!(payload.passcode, 20202021);
//! assert_eq!(payload.discriminator.short_value(), 15);
//! ```

use serde::Serialize;

use crate::{
    base38,
    error::{CodecError, Result},
    verhoeff,
};

pub const QR_CODE_PREFIX: &str = "MT:";
pub const MAX_PASSCODE: u32 = (1 << 27) - 1;
pub const MAX_DISCRIMINATOR: u16 = 0x0fff;

const QR_PAYLOAD_LEN: usize = 11;

pub const DISCOVERY_CAP_SOFT_AP: u8 = 1;
pub const DISCOVERY_CAP_BLE: u8 = 2;
pub const DISCOVERY_CAP_ON_NETWORK: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommissioningFlow {
    Standard = 0,
    UserAction = 1,
    Custom = 2,
}

impl TryFrom<u8> for CommissioningFlow {
    type Error = CodecError;
    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CommissioningFlow::Standard),
            1 => Ok(CommissioningFlow::UserAction),
            2 => Ok(CommissioningFlow::Custom),
            v => Err(CodecError::InvalidPayload(format!("commissioning flow {}", v))),
        }
    }
}

/// 12 bit discriminator. Short form knows only upper 4 bits, lower 8 bits are unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Discriminator {
    value: u16,
    short: bool,
}

impl Discriminator {
    pub fn long(value: u16) -> Result<Self> {
        if value > MAX_DISCRIMINATOR {
            return Err(CodecError::InvalidPayload(format!("discriminator {} > 4095", value)));
        }
        Ok(Self { value, short: false })
    }

    /// Construct from 4 bit short discriminator.
    pub fn short(value: u8) -> Result<Self> {
        if value > 0xf {
            return Err(CodecError::InvalidPayload(format!("short discriminator {} > 15", value)));
        }
        Ok(Self {
            value: (value as u16) << 8,
            short: true,
        })
    }

    /// Full 12 bit value. For short discriminator lower 8 bits are zero.
    pub fn value(&self) -> u16 {
        self.value
    }

    pub fn short_value(&self) -> u8 {
        (self.value >> 8) as u8
    }

    pub fn is_upper_4_bits_only(&self) -> bool {
        self.short
    }

    /// Domain equality - when either side is short, only upper 4 bits are compared.
    pub fn matches(&self, other: &Discriminator) -> bool {
        if self.short || other.short {
            self.short_value() == other.short_value()
        } else {
            self.value == other.value
        }
    }
}

impl std::fmt::Display for Discriminator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.short {
            write!(f, "{} (short {})", self.value, self.short_value())
        } else {
            write!(f, "{}", self.value)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnboardingPayload {
    pub version: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub commissioning_flow: CommissioningFlow,
    /// only carried by QR code
    pub discovery_capabilities: u8,
    pub discriminator: Discriminator,
    pub passcode: u32,
}

impl OnboardingPayload {
    /// Compare fields carried by both representations. Discriminator uses [Discriminator::matches].
    pub fn matches(&self, other: &OnboardingPayload) -> bool {
        self.version == other.version
            && self.vendor_id == other.vendor_id
            && self.product_id == other.product_id
            && self.passcode == other.passcode
            && self.discriminator.matches(&other.discriminator)
    }

    pub fn has_vendor_info(&self) -> bool {
        self.vendor_id != 0 || self.product_id != 0
    }

    /// Encode as QR code string including `MT:` prefix.
    pub fn to_qr_code(&self) -> Result<String> {
        if self.version > 1 {
            return Err(CodecError::InvalidPayload(format!("version {}", self.version)));
        }
        if self.discriminator.is_upper_4_bits_only() {
            return Err(CodecError::InvalidPayload(
                "qr code requires full 12 bit discriminator".to_owned(),
            ));
        }
        check_passcode(self.passcode)?;
        let mut w = BitWriter::default();
        w.put(self.version as u128, 3);
        w.put(self.vendor_id as u128, 16);
        w.put(self.product_id as u128, 16);
        w.put(self.commissioning_flow as u128, 2);
        w.put(self.discovery_capabilities as u128, 8);
        w.put(self.discriminator.value() as u128, 12);
        w.put(self.passcode as u128, 27);
        w.put(0, 4);
        let bytes = w.value.to_le_bytes();
        Ok(format!("{}{}", QR_CODE_PREFIX, base38::encode(&bytes[..QR_PAYLOAD_LEN])))
    }

    /// Encode as 11 or 21 digit manual pairing code (without hyphens).
    /// Long form is used when vendor or product id is non zero.
    pub fn to_manual_pairing_code(&self) -> Result<String> {
        match self.version {
            0 => {}
            1 => return Err(CodecError::UnsupportedVersion(1)),
            v => return Err(CodecError::InvalidPayload(format!("version {}", v))),
        }
        if self.passcode > MAX_PASSCODE {
            return Err(CodecError::InvalidPayload(format!("passcode {} out of range", self.passcode)));
        }
        let long = self.has_vendor_info();
        // decoder derives flow from code length
        let carried_flow = if long {
            CommissioningFlow::Custom
        } else {
            CommissioningFlow::Standard
        };
        if self.commissioning_flow != carried_flow {
            return Err(CodecError::InvalidPayload(format!(
                "{:?} flow can not be carried by {} manual pairing code",
                self.commissioning_flow,
                if long { "long" } else { "short" }
            )));
        }
        let short_disc = self.discriminator.short_value() as u32;
        let chunk1 = ((long as u32) << 2) | (short_disc >> 2);
        let chunk2 = ((short_disc & 3) << 14) | (self.passcode & 0x3fff);
        let chunk3 = self.passcode >> 14;
        let mut digits = format!("{:01}{:05}{:04}", chunk1, chunk2, chunk3);
        if long {
            digits.push_str(&format!("{:05}{:05}", self.vendor_id, self.product_id));
        }
        let check = verhoeff::generate(&digits)
            .ok_or_else(|| CodecError::InvalidPayload("non digit in pairing code".to_owned()))?;
        digits.push(check);
        Ok(digits)
    }
}

impl std::fmt::Display for OnboardingPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "version:{} vendor:{} product:{} flow:{:?} capabilities:0x{:x} discriminator:{} passcode:{}",
            self.version,
            self.vendor_id,
            self.product_id,
            self.commissioning_flow,
            self.discovery_capabilities,
            self.discriminator,
            self.passcode
        )
    }
}

fn check_passcode(passcode: u32) -> Result<()> {
    if passcode == 0 || passcode > MAX_PASSCODE {
        return Err(CodecError::InvalidPayload(format!("passcode {} out of range", passcode)));
    }
    Ok(())
}

/// LSB first bit packer over 88 bit QR payload
#[derive(Default)]
struct BitWriter {
    value: u128,
    offset: u32,
}

impl BitWriter {
    fn put(&mut self, v: u128, bits: u32) {
        self.value |= (v & ((1 << bits) - 1)) << self.offset;
        self.offset += bits;
    }
}

struct BitReader {
    value: u128,
}

impl BitReader {
    fn take(&mut self, bits: u32) -> u128 {
        let out = self.value & ((1 << bits) - 1);
        self.value >>= bits;
        out
    }
}

/// Decode QR code string (`MT:...`).
pub fn decode_qr_code(code: &str) -> Result<OnboardingPayload> {
    let encoded = code
        .strip_prefix(QR_CODE_PREFIX)
        .ok_or_else(|| CodecError::InvalidEncoding(format!("missing {} prefix", QR_CODE_PREFIX)))?;
    let bytes = base38::decode(encoded)?;
    if bytes.len() != QR_PAYLOAD_LEN {
        return Err(CodecError::InvalidPayload(format!(
            "qr payload has {} bytes, expected {}",
            bytes.len(),
            QR_PAYLOAD_LEN
        )));
    }
    let mut buf = [0u8; 16];
    buf[..QR_PAYLOAD_LEN].copy_from_slice(&bytes);
    let mut r = BitReader {
        value: u128::from_le_bytes(buf),
    };
    let version = r.take(3) as u8;
    if version > 1 {
        return Err(CodecError::InvalidPayload(format!("version {}", version)));
    }
    let vendor_id = r.take(16) as u16;
    let product_id = r.take(16) as u16;
    let commissioning_flow = CommissioningFlow::try_from(r.take(2) as u8)?;
    let discovery_capabilities = r.take(8) as u8;
    let discriminator = Discriminator::long(r.take(12) as u16)?;
    let passcode = r.take(27) as u32;
    check_passcode(passcode)?;
    Ok(OnboardingPayload {
        version,
        vendor_id,
        product_id,
        commissioning_flow,
        discovery_capabilities,
        discriminator,
        passcode,
    })
}

/// Decode manual pairing code. All non digit characters (hyphens, spaces) are ignored.
pub fn decode_manual_pairing_code(code: &str) -> Result<OnboardingPayload> {
    let norm: String = code.chars().filter(|c| c.is_ascii_digit()).collect();
    if norm.len() != 11 && norm.len() != 21 {
        return Err(CodecError::InvalidPayload(format!(
            "manual pairing code has {} digits, expected 11 or 21",
            norm.len()
        )));
    }
    if !verhoeff::validate(&norm) {
        return Err(CodecError::ChecksumMismatch);
    }
    let long = norm.len() == 21;
    let mut value: u128 = norm[..norm.len() - 1]
        .parse()
        .map_err(|e| CodecError::InvalidPayload(format!("{}", e)))?;

    let (vendor_id, product_id) = if long {
        let product = value % 100000;
        value /= 100000;
        let vendor = value % 100000;
        value /= 100000;
        (check_u16(vendor, "vendor id")?, check_u16(product, "product id")?)
    } else {
        (0, 0)
    };
    let chunk3 = (value % 10000) as u32;
    value /= 10000;
    let chunk2 = (value % 100000) as u32;
    let chunk1 = (value / 100000) as u32;

    if chunk1 > 7 {
        return Err(CodecError::UnsupportedVersion((chunk1 >> 3) as u8));
    }
    if ((chunk1 >> 2) & 1 == 1) != long {
        return Err(CodecError::InvalidPayload(
            "vendor id presence flag does not match code length".to_owned(),
        ));
    }
    if chunk2 > 0xffff {
        return Err(CodecError::InvalidPayload(format!("digits 2-6 out of range: {}", chunk2)));
    }
    if chunk3 > (MAX_PASSCODE >> 14) {
        return Err(CodecError::InvalidPayload(format!("digits 7-10 out of range: {}", chunk3)));
    }
    let passcode = (chunk2 & 0x3fff) | (chunk3 << 14);
    let short_disc = (((chunk1 & 3) << 2) | (chunk2 >> 14)) as u8;

    Ok(OnboardingPayload {
        version: 0,
        vendor_id,
        product_id,
        commissioning_flow: if long {
            CommissioningFlow::Custom
        } else {
            CommissioningFlow::Standard
        },
        discovery_capabilities: 0,
        discriminator: Discriminator::short(short_disc)?,
        passcode,
    })
}

fn check_u16(v: u128, what: &str) -> Result<u16> {
    u16::try_from(v).map_err(|_| CodecError::InvalidPayload(format!("{} {} out of range", what, v)))
}

/// Decode either representation - QR code when string starts with `MT:`.
pub fn decode(code: &str) -> Result<OnboardingPayload> {
    let code = code.trim();
    if code.starts_with(QR_CODE_PREFIX) {
        decode_qr_code(code)
    } else {
        decode_manual_pairing_code(code)
    }
}

/// Insert hyphens for display: `XXXX-XXX-XXXX` or `XXXX-XXX-XXXX-XXXX-XXX-XX-X`.
/// Strings of other lengths are returned unchanged.
pub fn format_manual_pairing_code(digits: &str) -> String {
    let groups: &[usize] = match digits.len() {
        11 => &[4, 3, 4],
        21 => &[4, 3, 4, 4, 3, 2, 1],
        _ => return digits.to_owned(),
    };
    if !digits.is_ascii() {
        return digits.to_owned();
    }
    let mut out = String::with_capacity(digits.len() + groups.len());
    let mut pos = 0;
    for g in groups {
        if pos > 0 {
            out.push('-');
        }
        out.push_str(&digits[pos..pos + g]);
        pos += g;
    }
    out
}
