//! Notification frame decoding.
//!
//! Every notification from the relay carries one frame. Byte 0 is the
//! frame type; the remaining layout depends on it:
//!
//! | Type | Name        | Length | Layout                                               |
//! |------|-------------|--------|------------------------------------------------------|
//! | 0x00 | Temperature | 3      | i16 temperature (0.1 °C)                             |
//! | 0x01 | Battery     | 3      | u8 probe %, u8 relay %                               |
//! | 0x02 | Voltage     | 5      | u16 relay mV, u16 probe mV                           |
//! | 0x03 | Signal      | 2      | i8 probe RSSI (dBm)                                  |
//! | 0x04 | Status      | 10     | temperature, probe %, relay %, RSSI, relay mV, probe mV |
//!
//! Multi-byte values are big-endian. Bytes past the layout length are ignored.

use tracing::trace;

use crate::data::{MeasurementRecord, SensorKind};
use crate::error::DecodeError;

/// Divisor turning a raw temperature into °C.
pub const TEMPERATURE_DIVISOR: f64 = 10.0;

/// Divisor turning raw millivolts into volts.
pub const VOLTAGE_DIVISOR: f64 = 1000.0;

/// Raw temperature reported when the probe has no reading.
pub const NO_TEMPERATURE: i16 = i16::MAX;

/// Frame discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum FrameType {
    /// Probe temperature only.
    Temperature = 0x00,
    /// Probe and relay battery levels.
    Battery = 0x01,
    /// Relay and probe voltages.
    Voltage = 0x02,
    /// Probe signal strength.
    Signal = 0x03,
    /// Every field in one frame.
    Status = 0x04,
}

impl FrameType {
    /// Create from the discriminator byte.
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Temperature),
            0x01 => Some(Self::Battery),
            0x02 => Some(Self::Voltage),
            0x03 => Some(Self::Signal),
            0x04 => Some(Self::Status),
            _ => None,
        }
    }

    /// Convert to the discriminator byte.
    pub fn to_raw(&self) -> u8 {
        *self as u8
    }

    /// Frame length including the discriminator.
    pub fn frame_len(&self) -> usize {
        match self {
            Self::Temperature => 3,
            Self::Battery => 3,
            Self::Voltage => 5,
            Self::Signal => 2,
            Self::Status => 10,
        }
    }
}

/// Decode a notification frame into a measurement record.
///
/// # Errors
///
/// - [`DecodeError::Truncated`] if the buffer is empty or shorter than the
///   frame type requires.
/// - [`DecodeError::UnknownFrameType`] if the discriminator is not known.
/// - [`DecodeError::OutOfRange`] if a value is not physically plausible.
pub fn decode(data: &[u8]) -> Result<MeasurementRecord, DecodeError> {
    trace!("Decoding frame: {:02X?}", data);

    let Some(&discriminator) = data.first() else {
        return Err(DecodeError::Truncated {
            frame_type: None,
            expected: 1,
            actual: 0,
        });
    };

    let frame_type =
        FrameType::from_raw(discriminator).ok_or(DecodeError::UnknownFrameType(discriminator))?;

    if data.len() < frame_type.frame_len() {
        return Err(DecodeError::Truncated {
            frame_type: Some(frame_type),
            expected: frame_type.frame_len(),
            actual: data.len(),
        });
    }

    let body = &data[1..frame_type.frame_len()];
    let mut record = MeasurementRecord::new();

    match frame_type {
        FrameType::Temperature => {
            record.probe_temperature = read_temperature(body[0], body[1])?;
        }
        FrameType::Battery => {
            record.probe_battery = Some(read_percent(SensorKind::ProbeBattery, body[0])?);
            record.relay_battery = Some(read_percent(SensorKind::RelayBattery, body[1])?);
        }
        FrameType::Voltage => {
            record.relay_voltage = Some(read_voltage(SensorKind::RelayVoltage, body[0], body[1])?);
            record.probe_voltage = Some(read_voltage(SensorKind::ProbeVoltage, body[2], body[3])?);
        }
        FrameType::Signal => {
            record.probe_rssi = Some(read_rssi(body[0])?);
        }
        FrameType::Status => {
            record.probe_temperature = read_temperature(body[0], body[1])?;
            record.probe_battery = Some(read_percent(SensorKind::ProbeBattery, body[2])?);
            record.relay_battery = Some(read_percent(SensorKind::RelayBattery, body[3])?);
            record.probe_rssi = Some(read_rssi(body[4])?);
            record.relay_voltage = Some(read_voltage(SensorKind::RelayVoltage, body[5], body[6])?);
            record.probe_voltage = Some(read_voltage(SensorKind::ProbeVoltage, body[7], body[8])?);
        }
    }

    Ok(record)
}

fn check_range(sensor: SensorKind, value: f64) -> Result<f64, DecodeError> {
    if sensor.valid_range().contains(&value) {
        Ok(value)
    } else {
        Err(DecodeError::OutOfRange { sensor, value })
    }
}

fn read_temperature(hi: u8, lo: u8) -> Result<Option<f64>, DecodeError> {
    let raw = i16::from_be_bytes([hi, lo]);
    if raw == NO_TEMPERATURE {
        return Ok(None);
    }

    let celsius = raw as f64 / TEMPERATURE_DIVISOR;
    check_range(SensorKind::ProbeTemperature, celsius).map(Some)
}

fn read_percent(sensor: SensorKind, raw: u8) -> Result<u8, DecodeError> {
    check_range(sensor, raw as f64)?;
    Ok(raw)
}

fn read_voltage(sensor: SensorKind, hi: u8, lo: u8) -> Result<f64, DecodeError> {
    let millivolts = u16::from_be_bytes([hi, lo]);
    check_range(sensor, millivolts as f64 / VOLTAGE_DIVISOR)
}

fn read_rssi(raw: u8) -> Result<i16, DecodeError> {
    let dbm = raw as i8 as i16;
    check_range(SensorKind::ProbeRssi, dbm as f64)?;
    Ok(dbm)
}

/// Build a frame from a record. Missing fields are written as zero
/// (or "no reading" for the temperature).
#[cfg(test)]
pub(crate) fn encode(frame_type: FrameType, record: &MeasurementRecord) -> Vec<u8> {
    let temperature = record
        .probe_temperature
        .map(|t| (t * TEMPERATURE_DIVISOR).round() as i16)
        .unwrap_or(NO_TEMPERATURE)
        .to_be_bytes();
    let millivolts =
        |v: Option<f64>| ((v.unwrap_or(0.0) * VOLTAGE_DIVISOR).round() as u16).to_be_bytes();
    let relay_mv = millivolts(record.relay_voltage);
    let probe_mv = millivolts(record.probe_voltage);
    let probe_battery = record.probe_battery.unwrap_or(0);
    let relay_battery = record.relay_battery.unwrap_or(0);
    let rssi = record.probe_rssi.unwrap_or(0) as i8 as u8;

    let mut frame = vec![frame_type.to_raw()];
    match frame_type {
        FrameType::Temperature => frame.extend_from_slice(&temperature),
        FrameType::Battery => frame.extend_from_slice(&[probe_battery, relay_battery]),
        FrameType::Voltage => {
            frame.extend_from_slice(&relay_mv);
            frame.extend_from_slice(&probe_mv);
        }
        FrameType::Signal => frame.push(rssi),
        FrameType::Status => {
            frame.extend_from_slice(&temperature);
            frame.extend_from_slice(&[probe_battery, relay_battery, rssi]);
            frame.extend_from_slice(&relay_mv);
            frame.extend_from_slice(&probe_mv);
        }
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_temperature_frame() {
        let record = decode(&[0x00, 0x00, 0x96]).unwrap();
        assert_eq!(
            record,
            MeasurementRecord {
                probe_temperature: Some(15.0),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_negative_temperature() {
        // -12.5 °C = -125 = 0xFF83
        let record = decode(&[0x00, 0xFF, 0x83]).unwrap();
        assert_eq!(record.probe_temperature, Some(-12.5));
    }

    #[test]
    fn test_no_temperature_reading() {
        let record = decode(&[0x00, 0x7F, 0xFF]).unwrap();
        assert_eq!(record.probe_temperature, None);
        assert!(record.is_empty());
    }

    #[test]
    fn test_temperature_out_of_range() {
        // 500.0 °C
        let err = decode(&[0x00, 0x13, 0x88]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::OutOfRange {
                sensor: SensorKind::ProbeTemperature,
                value: 500.0
            }
        );
    }

    #[test]
    fn test_battery_frame() {
        let record = decode(&[0x01, 0x4B, 0x64]).unwrap();
        assert_eq!(
            record,
            MeasurementRecord {
                probe_battery: Some(75),
                relay_battery: Some(100),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_battery_out_of_range() {
        let err = decode(&[0x01, 0x00, 0xC8]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::OutOfRange {
                sensor: SensorKind::RelayBattery,
                value: 200.0
            }
        );
    }

    #[test]
    fn test_voltage_frame() {
        // relay 4200 mV, probe 3050 mV
        let record = decode(&[0x02, 0x10, 0x68, 0x0B, 0xEA]).unwrap();
        assert_eq!(record.relay_voltage, Some(4.2));
        assert_eq!(record.probe_voltage, Some(3.05));
        assert_eq!(record.probe_temperature, None);
    }

    #[test]
    fn test_signal_frame() {
        let record = decode(&[0x03, 0xBA]).unwrap();
        assert_eq!(record.probe_rssi, Some(-70));

        let err = decode(&[0x03, 0x80]).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::OutOfRange {
                sensor: SensorKind::ProbeRssi,
                ..
            }
        ));
    }

    #[test]
    fn test_status_frame() {
        let data = [
            0x04, 0x02, 0x7B, // 63.5 °C
            0x50, 0x5A, // 80%, 90%
            0xC4, // -60 dBm
            0x10, 0x04, // 4.1 V
            0x0B, 0xB8, // 3.0 V
        ];
        let record = decode(&data).unwrap();
        assert_eq!(
            record,
            MeasurementRecord {
                probe_temperature: Some(63.5),
                probe_battery: Some(80),
                relay_battery: Some(90),
                probe_rssi: Some(-60),
                relay_voltage: Some(4.1),
                probe_voltage: Some(3.0),
            }
        );
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let record = decode(&[0x00, 0x00, 0x96, 0xDE, 0xAD]).unwrap();
        assert_eq!(record.probe_temperature, Some(15.0));
    }

    #[test]
    fn test_empty_frame() {
        assert_eq!(
            decode(&[]).unwrap_err(),
            DecodeError::Truncated {
                frame_type: None,
                expected: 1,
                actual: 0
            }
        );
    }

    #[test]
    fn test_truncated_frame() {
        assert_eq!(
            decode(&[0x02, 0x10, 0x68]).unwrap_err(),
            DecodeError::Truncated {
                frame_type: Some(FrameType::Voltage),
                expected: 5,
                actual: 3
            }
        );
    }

    #[test]
    fn test_unknown_frame_type() {
        assert_eq!(
            decode(&[0x42, 0x00, 0x00]).unwrap_err(),
            DecodeError::UnknownFrameType(0x42)
        );
    }

    #[test]
    fn test_encode_matches_status_layout() {
        let record = MeasurementRecord {
            probe_temperature: Some(63.5),
            probe_battery: Some(80),
            relay_battery: Some(90),
            probe_rssi: Some(-60),
            relay_voltage: Some(4.1),
            probe_voltage: Some(3.0),
        };
        let frame = encode(FrameType::Status, &record);
        assert_eq!(frame.len(), FrameType::Status.frame_len());
        assert_eq!(decode(&frame).unwrap(), record);
    }

    #[test]
    fn test_voltage_out_of_range() {
        // relay 6000 mV
        let err = decode(&[0x02, 0x17, 0x70, 0x0B, 0xB8]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::OutOfRange {
                sensor: SensorKind::RelayVoltage,
                value: 6.0
            }
        );
    }

    #[test]
    fn test_status_frame_too_short() {
        assert_eq!(
            decode(&[0x04, 0x02, 0x7B, 0x50, 0x5A, 0xC4, 0x10, 0x04, 0x0B]).unwrap_err(),
            DecodeError::Truncated {
                frame_type: Some(FrameType::Status),
                expected: 10,
                actual: 9
            }
        );
    }

    fn known_frame_type() -> impl Strategy<Value = FrameType> {
        prop_oneof![
            Just(FrameType::Temperature),
            Just(FrameType::Battery),
            Just(FrameType::Voltage),
            Just(FrameType::Signal),
            Just(FrameType::Status),
        ]
    }

    fn temperature() -> impl Strategy<Value = Option<f64>> {
        prop_oneof![
            Just(None),
            (-500i16..=4000).prop_map(|raw| Some(raw as f64 / TEMPERATURE_DIVISOR)),
        ]
    }

    fn voltage() -> impl Strategy<Value = f64> {
        (0u16..=5000).prop_map(|mv| mv as f64 / VOLTAGE_DIVISOR)
    }

    /// Records holding exactly the fields `frame_type` carries, all in range.
    fn valid_record(frame_type: FrameType) -> BoxedStrategy<MeasurementRecord> {
        match frame_type {
            FrameType::Temperature => temperature()
                .prop_map(|t| MeasurementRecord {
                    probe_temperature: t,
                    ..Default::default()
                })
                .boxed(),
            FrameType::Battery => (0u8..=100, 0u8..=100)
                .prop_map(|(probe, relay)| MeasurementRecord {
                    probe_battery: Some(probe),
                    relay_battery: Some(relay),
                    ..Default::default()
                })
                .boxed(),
            FrameType::Voltage => (voltage(), voltage())
                .prop_map(|(relay, probe)| MeasurementRecord {
                    relay_voltage: Some(relay),
                    probe_voltage: Some(probe),
                    ..Default::default()
                })
                .boxed(),
            FrameType::Signal => (-127i16..=20)
                .prop_map(|rssi| MeasurementRecord {
                    probe_rssi: Some(rssi),
                    ..Default::default()
                })
                .boxed(),
            FrameType::Status => (
                temperature(),
                0u8..=100,
                0u8..=100,
                -127i16..=20,
                voltage(),
                voltage(),
            )
                .prop_map(|(t, probe, relay, rssi, relay_v, probe_v)| MeasurementRecord {
                    probe_temperature: t,
                    probe_battery: Some(probe),
                    relay_battery: Some(relay),
                    probe_rssi: Some(rssi),
                    relay_voltage: Some(relay_v),
                    probe_voltage: Some(probe_v),
                })
                .boxed(),
        }
    }

    proptest! {
        #[test]
        fn prop_encode_decode_symmetric(
            (frame_type, record) in known_frame_type()
                .prop_flat_map(|t| (Just(t), valid_record(t)))
        ) {
            let frame = encode(frame_type, &record);
            prop_assert_eq!(frame.len(), frame_type.frame_len());
            prop_assert_eq!(decode(&frame), Ok(record));
        }

        #[test]
        fn prop_temperature_frame_exact(raw in -500i16..=4000) {
            let [hi, lo] = raw.to_be_bytes();
            let record = decode(&[0x00, hi, lo]).unwrap();
            prop_assert_eq!(record.probe_temperature, Some(raw as f64 / TEMPERATURE_DIVISOR));
            prop_assert_eq!(record.probe_battery, None);
            prop_assert_eq!(record.relay_voltage, None);
        }

        #[test]
        fn prop_battery_frame_exact(probe in 0u8..=100, relay in 0u8..=100) {
            let record = decode(&[0x01, probe, relay]).unwrap();
            prop_assert_eq!(record.probe_battery, Some(probe));
            prop_assert_eq!(record.relay_battery, Some(relay));
        }

        #[test]
        fn prop_short_frames_are_truncated(
            frame_type in known_frame_type(),
            tail in proptest::collection::vec(any::<u8>(), 0..10),
        ) {
            let mut data = vec![frame_type.to_raw()];
            data.extend(tail);
            data.truncate(frame_type.frame_len() - 1);
            let result = decode(&data);
            let is_truncated = matches!(result, Err(DecodeError::Truncated { .. }));
            prop_assert!(is_truncated);
        }

        #[test]
        fn prop_unknown_discriminator(
            discriminator in 0x05u8..=0xFF,
            tail in proptest::collection::vec(any::<u8>(), 0..16),
        ) {
            let mut data = vec![discriminator];
            data.extend(tail);
            prop_assert_eq!(decode(&data), Err(DecodeError::UnknownFrameType(discriminator)));
        }

        #[test]
        fn prop_decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..32)) {
            let _ = decode(&data);
        }
    }
}
