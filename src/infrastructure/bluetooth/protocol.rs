//! Bluetooth LE protocol constants
//!
//! Assigned numbers used to give services and characteristics readable names,
//! plus the discovery filter used by the platform watcher.

use anyhow::Result;

/// Bluetooth Base UUID (0000xxxx-0000-1000-8000-00805F9B34FB)
pub const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

/// AQS filter selecting Bluetooth LE association endpoints
pub const AQS_ALL_BLE_DEVICES: &str =
    "(System.Devices.Aep.ProtocolId:=\"{bb7bb05e-5972-42b5-94fc-76eaa7084d49}\")";

pub const PROPERTY_DEVICE_ADDRESS: &str = "System.Devices.Aep.DeviceAddress";
pub const PROPERTY_IS_CONNECTABLE: &str = "System.Devices.Aep.Bluetooth.Le.IsConnectable";

/// Properties requested from the discovery watcher for every device
pub const REQUESTED_PROPERTIES: &[&str] = &[PROPERTY_DEVICE_ADDRESS, PROPERTY_IS_CONNECTABLE];

/// Well-known 16-bit service assigned numbers
const SERVICE_NAMES: &[(u16, &str)] = &[
    (0x1800, "GenericAccess"),
    (0x1801, "GenericAttribute"),
    (0x1802, "ImmediateAlert"),
    (0x1803, "LinkLoss"),
    (0x1804, "TxPower"),
    (0x1805, "CurrentTime"),
    (0x180A, "DeviceInformation"),
    (0x180D, "HeartRate"),
    (0x180F, "Battery"),
    (0x1810, "BloodPressure"),
    (0x1812, "HumanInterfaceDevice"),
    (0x1814, "RunningSpeedAndCadence"),
    (0x1816, "CyclingSpeedAndCadence"),
    (0x1818, "CyclingPower"),
    (0x181C, "UserData"),
    (0x181D, "WeightScale"),
    (0xFEEE, "PolarElectro"),
];

/// Well-known 16-bit characteristic assigned numbers
const CHARACTERISTIC_NAMES: &[(u16, &str)] = &[
    (0x2A00, "DeviceName"),
    (0x2A01, "Appearance"),
    (0x2A04, "PeripheralPreferredConnectionParameters"),
    (0x2A05, "ServiceChanged"),
    (0x2A19, "BatteryLevel"),
    (0x2A23, "SystemId"),
    (0x2A24, "ModelNumberString"),
    (0x2A25, "SerialNumberString"),
    (0x2A26, "FirmwareRevisionString"),
    (0x2A27, "HardwareRevisionString"),
    (0x2A28, "SoftwareRevisionString"),
    (0x2A29, "ManufacturerNameString"),
    (0x2A35, "BloodPressureMeasurement"),
    (0x2A37, "HeartRateMeasurement"),
    (0x2A38, "BodySensorLocation"),
    (0x2A39, "HeartRateControlPoint"),
    (0x2A53, "RscMeasurement"),
    (0x2A5B, "CscMeasurement"),
    (0x2A63, "CyclingPowerMeasurement"),
];

/// Expand a 16-bit assigned number onto the Bluetooth Base UUID
pub const fn from_short(short: u16) -> u128 {
    BASE_UUID | ((short as u128) << 96)
}

/// The 16-bit assigned number, if `uuid` lives on the Base UUID
pub fn to_short(uuid: u128) -> Option<u16> {
    let mask: u128 = !(0xFFFF_u128 << 96);
    if uuid & mask == BASE_UUID {
        Some((uuid >> 96) as u16)
    } else {
        None
    }
}

/// Parse either a 16-bit short form ("180d") or a full UUID string
pub fn parse_uuid(uuid_str: &str) -> Result<u128> {
    let hex = uuid_str.trim().trim_start_matches("0x").replace('-', "");

    match hex.len() {
        4 => Ok(from_short(u16::from_str_radix(&hex, 16)?)),
        32 => Ok(u128::from_str_radix(&hex, 16)?),
        _ => Err(anyhow::anyhow!("Invalid UUID format: {}", uuid_str)),
    }
}

/// Canonical hyphenated form
pub fn format_uuid(uuid: u128) -> String {
    let hex = format!("{:032x}", uuid);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

pub fn service_name(uuid: u128) -> String {
    display_name(uuid, SERVICE_NAMES)
}

pub fn characteristic_name(uuid: u128) -> String {
    display_name(uuid, CHARACTERISTIC_NAMES)
}

fn display_name(uuid: u128, table: &[(u16, &str)]) -> String {
    to_short(uuid)
        .and_then(|short| table.iter().find(|(n, _)| *n == short))
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| format_uuid(uuid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uuid() {
        let uuid = parse_uuid("0000180d-0000-1000-8000-00805f9b34fb").unwrap();
        assert_eq!(uuid, from_short(0x180D));
        assert_eq!(parse_uuid("2A37").unwrap(), from_short(0x2A37));
        assert!(parse_uuid("12345").is_err());
        assert!(parse_uuid("zzzz").is_err());
    }

    #[test]
    fn test_short_round_trip() {
        assert_eq!(to_short(from_short(0x180F)), Some(0x180F));
        assert_eq!(to_short(0x4f63756c_7573_2054_6872_65656d6f7465), None);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(service_name(from_short(0x180D)), "HeartRate");
        assert_eq!(characteristic_name(from_short(0x2A37)), "HeartRateMeasurement");
        assert_eq!(
            service_name(0x6217ff4b_fb31_1140_ad5a_a45545d7ecf3),
            "6217ff4b-fb31-1140-ad5a-a45545d7ecf3"
        );
    }
}
