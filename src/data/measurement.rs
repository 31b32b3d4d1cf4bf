//! Decoded measurement records.

use crate::data::SensorKind;

/// Snapshot of the values carried by one notification frame.
///
/// Each frame type populates a subset of the fields. Fields the frame
/// does not carry are `None`, so listeners only update what is present.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MeasurementRecord {
    /// Probe temperature in °C.
    pub probe_temperature: Option<f64>,
    /// Probe battery charge, 0-100%.
    pub probe_battery: Option<u8>,
    /// Relay battery charge, 0-100%.
    pub relay_battery: Option<u8>,
    /// Probe signal strength in dBm.
    pub probe_rssi: Option<i16>,
    /// Relay voltage in volts.
    pub relay_voltage: Option<f64>,
    /// Probe voltage in volts.
    pub probe_voltage: Option<f64>,
}

impl MeasurementRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value of a sensor, if this record carries it.
    pub fn value(&self, sensor: SensorKind) -> Option<f64> {
        match sensor {
            SensorKind::ProbeTemperature => self.probe_temperature,
            SensorKind::ProbeBattery => self.probe_battery.map(f64::from),
            SensorKind::RelayBattery => self.relay_battery.map(f64::from),
            SensorKind::ProbeRssi => self.probe_rssi.map(f64::from),
            SensorKind::RelayVoltage => self.relay_voltage,
            SensorKind::ProbeVoltage => self.probe_voltage,
        }
    }

    /// Check whether the record carries a sensor.
    pub fn has(&self, sensor: SensorKind) -> bool {
        self.value(sensor).is_some()
    }

    /// Iterate over the sensors present in this record.
    pub fn present(&self) -> impl Iterator<Item = (SensorKind, f64)> + '_ {
        SensorKind::ALL
            .into_iter()
            .filter_map(move |sensor| self.value(sensor).map(|v| (sensor, v)))
    }

    /// Check if no sensor is present.
    pub fn is_empty(&self) -> bool {
        self.present().next().is_none()
    }

    /// Overlay the fields present in `other` onto a copy of this record.
    ///
    /// Useful for consumers that keep a last-known view across frames.
    pub fn merge(&self, other: &MeasurementRecord) -> MeasurementRecord {
        MeasurementRecord {
            probe_temperature: other.probe_temperature.or(self.probe_temperature),
            probe_battery: other.probe_battery.or(self.probe_battery),
            relay_battery: other.relay_battery.or(self.relay_battery),
            probe_rssi: other.probe_rssi.or(self.probe_rssi),
            relay_voltage: other.relay_voltage.or(self.relay_voltage),
            probe_voltage: other.probe_voltage.or(self.probe_voltage),
        }
    }
}
