//! Payload decoding for the characteristics the client subscribes to or reads.
//!
//! Only the 8-bit heart-rate format is understood: the flags byte, the
//! energy-expended field and RR intervals are ignored.

use std::fmt;

use crate::error::{DecodeError, TransportError, UpdateError};
use crate::gatt::CharacteristicKind;
use crate::observer::Notification;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLocation {
    Chest,
    Undefined,
}

impl BodyLocation {
    pub fn as_str(self) -> &'static str {
        match self {
            BodyLocation::Chest => "Chest",
            BodyLocation::Undefined => "Undefined",
        }
    }
}

impl fmt::Display for BodyLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn decode_heart_rate(value: &[u8]) -> Result<u8, DecodeError> {
    value.get(1).copied().ok_or(DecodeError::TooShort {
        expected: 2,
        actual: value.len(),
    })
}

/// Only code 0 (chest) is mapped, every other code reads as undefined.
pub fn decode_body_location(value: &[u8]) -> Result<BodyLocation, DecodeError> {
    match value.first() {
        Some(0) => Ok(BodyLocation::Chest),
        Some(_) => Ok(BodyLocation::Undefined),
        None => Err(DecodeError::TooShort {
            expected: 1,
            actual: 0,
        }),
    }
}

pub fn decode_manufacturer_name(value: &[u8]) -> Result<String, DecodeError> {
    Ok(std::str::from_utf8(value)?.to_owned())
}

/// Turns a value update into the notification for its characteristic. A
/// transport error wins over whatever bytes came with it.
pub(crate) fn decode_update(
    kind: CharacteristicKind,
    value: &[u8],
    error: Option<TransportError>,
) -> Notification {
    match kind {
        CharacteristicKind::HeartRateMeasurement => {
            match checked(error, || decode_heart_rate(value)) {
                Ok(heart_rate) => Notification::HeartRate {
                    heart_rate,
                    error: None,
                },
                Err(error) => Notification::HeartRate {
                    heart_rate: 0,
                    error: Some(error),
                },
            }
        }
        CharacteristicKind::BodySensorLocation => {
            match checked(error, || decode_body_location(value)) {
                Ok(location) => Notification::BodyLocation {
                    location: location.to_string(),
                    error: None,
                },
                Err(error) => Notification::BodyLocation {
                    location: String::new(),
                    error: Some(error),
                },
            }
        }
        CharacteristicKind::ManufacturerName => {
            match checked(error, || decode_manufacturer_name(value)) {
                Ok(manufacturer) => Notification::DeviceInfo {
                    manufacturer,
                    error: None,
                },
                Err(error) => Notification::DeviceInfo {
                    manufacturer: String::new(),
                    error: Some(error),
                },
            }
        }
    }
}

fn checked<T>(
    error: Option<TransportError>,
    decode: impl FnOnce() -> Result<T, DecodeError>,
) -> Result<T, UpdateError> {
    match error {
        Some(error) => Err(error.into()),
        None => Ok(decode()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heart_rate_needs_two_bytes() {
        assert_eq!(
            decode_heart_rate(&[]),
            Err(DecodeError::TooShort {
                expected: 2,
                actual: 0
            })
        );
        assert!(decode_heart_rate(&[0x16]).is_err());
    }

    #[test]
    fn heart_rate_reads_second_byte_only() {
        assert_eq!(decode_heart_rate(&[0x00, 72]), Ok(72));
        assert_eq!(decode_heart_rate(&[0xFF, 72]), Ok(72));
        // energy expended and RR interval trailing fields
        assert_eq!(decode_heart_rate(&[0x18, 72, 0x10, 0x00, 0x40, 0x03]), Ok(72));
    }

    #[test]
    fn body_location_maps_chest_only() {
        assert_eq!(decode_body_location(&[0]), Ok(BodyLocation::Chest));
        assert_eq!(decode_body_location(&[1]), Ok(BodyLocation::Undefined));
        assert_eq!(decode_body_location(&[6, 0]), Ok(BodyLocation::Undefined));
        assert!(decode_body_location(&[]).is_err());
        assert_eq!(BodyLocation::Chest.to_string(), "Chest");
    }

    #[test]
    fn manufacturer_name_is_utf8() {
        assert_eq!(
            decode_manufacturer_name("Polar Electro Oy".as_bytes()),
            Ok("Polar Electro Oy".to_string())
        );
        assert_eq!(
            decode_manufacturer_name("Suunto Ö".as_bytes()),
            Ok("Suunto Ö".to_string())
        );
        assert_eq!(decode_manufacturer_name(&[]), Ok(String::new()));
        assert!(matches!(
            decode_manufacturer_name(&[0x50, 0xC3, 0x28]),
            Err(DecodeError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn failed_updates_carry_sentinels() {
        let short = decode_update(CharacteristicKind::HeartRateMeasurement, &[0x00], None);
        assert!(matches!(
            short,
            Notification::HeartRate {
                heart_rate: 0,
                error: Some(UpdateError::Decode(_))
            }
        ));

        let err = TransportError::new("insufficient authentication");
        let location = decode_update(
            CharacteristicKind::BodySensorLocation,
            &[0],
            Some(err.clone()),
        );
        assert_eq!(
            location,
            Notification::BodyLocation {
                location: String::new(),
                error: Some(UpdateError::Transport(err)),
            }
        );

        let name = decode_update(CharacteristicKind::ManufacturerName, &[0xFF], None);
        assert!(matches!(
            name,
            Notification::DeviceInfo { ref manufacturer, error: Some(_) } if manufacturer.is_empty()
        ));
    }

    #[test]
    fn successful_updates() {
        assert_eq!(
            decode_update(CharacteristicKind::HeartRateMeasurement, &[0x00, 0x48], None),
            Notification::HeartRate {
                heart_rate: 72,
                error: None
            }
        );
        assert_eq!(
            decode_update(CharacteristicKind::BodySensorLocation, &[0], None),
            Notification::BodyLocation {
                location: "Chest".to_string(),
                error: None
            }
        );
    }
}
