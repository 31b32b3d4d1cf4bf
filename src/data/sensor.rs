//! Sensor catalogue.
//!
//! Maps each sensor a probe/relay pair reports to its key, unit and
//! category.

/// One of the values a measurement record can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SensorKind {
    /// Probe tip temperature.
    ProbeTemperature,
    /// Probe battery charge.
    ProbeBattery,
    /// Relay hub battery charge.
    RelayBattery,
    /// Probe signal strength as seen by the relay.
    ProbeRssi,
    /// Relay hub supply voltage.
    RelayVoltage,
    /// Probe cell voltage.
    ProbeVoltage,
}

impl SensorKind {
    /// All sensors, in display order.
    pub const ALL: [SensorKind; 6] = [
        Self::ProbeTemperature,
        Self::ProbeBattery,
        Self::RelayBattery,
        Self::ProbeRssi,
        Self::RelayVoltage,
        Self::ProbeVoltage,
    ];

    /// Stable snake_case key, suitable for entity IDs.
    pub fn key(&self) -> &'static str {
        match self {
            Self::ProbeTemperature => "probe_temperature",
            Self::ProbeBattery => "probe_battery",
            Self::RelayBattery => "relay_battery",
            Self::ProbeRssi => "probe_rssi",
            Self::RelayVoltage => "relay_voltage",
            Self::ProbeVoltage => "probe_voltage",
        }
    }

    /// Unit of measurement.
    pub fn unit(&self) -> &'static str {
        match self {
            Self::ProbeTemperature => "°C",
            Self::ProbeBattery | Self::RelayBattery => "%",
            Self::ProbeRssi => "dBm",
            Self::RelayVoltage | Self::ProbeVoltage => "V",
        }
    }

    /// Diagnostic sensors are usually hidden from primary dashboards.
    pub fn is_diagnostic(&self) -> bool {
        matches!(
            self,
            Self::ProbeRssi | Self::RelayVoltage | Self::ProbeVoltage
        )
    }

    /// Inclusive range of physically valid values.
    pub fn valid_range(&self) -> std::ops::RangeInclusive<f64> {
        match self {
            Self::ProbeTemperature => -50.0..=400.0,
            Self::ProbeBattery | Self::RelayBattery => 0.0..=100.0,
            Self::ProbeRssi => -127.0..=20.0,
            Self::RelayVoltage | Self::ProbeVoltage => 0.0..=5.0,
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}
