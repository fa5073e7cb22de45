//! GATT identifiers the client knows how to talk to.
//!
//! Everything else a peripheral exposes is ignored. Lookups go through the
//! two static tables below so the recognized vocabulary lives in one place.

use uuid::Uuid;

// https://www.bluetooth.com/specifications/assigned-numbers/
const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Expands a 16-bit SIG assigned number onto the Bluetooth base UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

pub const DEVICE_INFORMATION_SERVICE_UUID: Uuid = uuid_from_u16(0x180A);
pub const HEART_RATE_SERVICE_UUID: Uuid = uuid_from_u16(0x180D);
pub const HEART_RATE_MEASUREMENT_UUID: Uuid = uuid_from_u16(0x2A37);
pub const BODY_SENSOR_LOCATION_UUID: Uuid = uuid_from_u16(0x2A38);
pub const MANUFACTURER_NAME_UUID: Uuid = uuid_from_u16(0x2A29);

/// Scans only ever look for heart-rate straps.
pub const SCAN_FILTER: [Uuid; 1] = [HEART_RATE_SERVICE_UUID];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    HeartRate,
    DeviceInformation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicKind {
    HeartRateMeasurement,
    BodySensorLocation,
    ManufacturerName,
}

static SERVICES: [(Uuid, ServiceKind); 2] = [
    (HEART_RATE_SERVICE_UUID, ServiceKind::HeartRate),
    (DEVICE_INFORMATION_SERVICE_UUID, ServiceKind::DeviceInformation),
];

static CHARACTERISTICS: [(Uuid, CharacteristicKind); 3] = [
    (HEART_RATE_MEASUREMENT_UUID, CharacteristicKind::HeartRateMeasurement),
    (BODY_SENSOR_LOCATION_UUID, CharacteristicKind::BodySensorLocation),
    (MANUFACTURER_NAME_UUID, CharacteristicKind::ManufacturerName),
];

impl ServiceKind {
    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        SERVICES
            .iter()
            .find(|(known, _)| known == uuid)
            .map(|(_, kind)| *kind)
    }

    pub fn uuid(self) -> Uuid {
        match self {
            ServiceKind::HeartRate => HEART_RATE_SERVICE_UUID,
            ServiceKind::DeviceInformation => DEVICE_INFORMATION_SERVICE_UUID,
        }
    }
}

impl CharacteristicKind {
    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        CHARACTERISTICS
            .iter()
            .find(|(known, _)| known == uuid)
            .map(|(_, kind)| *kind)
    }

    pub fn uuid(self) -> Uuid {
        match self {
            CharacteristicKind::HeartRateMeasurement => HEART_RATE_MEASUREMENT_UUID,
            CharacteristicKind::BodySensorLocation => BODY_SENSOR_LOCATION_UUID,
            CharacteristicKind::ManufacturerName => MANUFACTURER_NAME_UUID,
        }
    }

    /// The service this characteristic is expected under.
    pub fn service(self) -> ServiceKind {
        match self {
            CharacteristicKind::HeartRateMeasurement | CharacteristicKind::BodySensorLocation => {
                ServiceKind::HeartRate
            }
            CharacteristicKind::ManufacturerName => ServiceKind::DeviceInformation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_uuids_expand_onto_base_uuid() {
        assert_eq!(
            HEART_RATE_MEASUREMENT_UUID,
            Uuid::from_u128(0x00002a3700001000800000805f9b34fb)
        );
        assert_eq!(
            HEART_RATE_SERVICE_UUID.to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn lookup_tables_resolve_known_uuids_only() {
        assert_eq!(
            ServiceKind::from_uuid(&uuid_from_u16(0x180A)),
            Some(ServiceKind::DeviceInformation)
        );
        assert_eq!(ServiceKind::from_uuid(&uuid_from_u16(0x180F)), None);
        assert_eq!(
            CharacteristicKind::from_uuid(&uuid_from_u16(0x2A29)),
            Some(CharacteristicKind::ManufacturerName)
        );
        assert_eq!(CharacteristicKind::from_uuid(&uuid_from_u16(0x2A19)), None);
    }

    #[test]
    fn characteristics_belong_to_their_service() {
        assert_eq!(
            CharacteristicKind::BodySensorLocation.service(),
            ServiceKind::HeartRate
        );
        assert_eq!(
            CharacteristicKind::ManufacturerName.service(),
            ServiceKind::DeviceInformation
        );
        for (uuid, kind) in CHARACTERISTICS.iter() {
            assert_eq!(kind.uuid(), *uuid);
        }
    }
}
