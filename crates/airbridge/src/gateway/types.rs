//! BACnet object-model types shared by the registry and the gateway

use chrono::{DateTime, Datelike, Timelike};
use serde::{Deserialize, Serialize};

/// Object types the bridge creates or encounters during discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectType {
    AnalogInput,
    AnalogOutput,
    AnalogValue,
    BinaryInput,
    BinaryValue,
    Device,
    DatetimeValue,
}

impl ObjectType {
    /// Enumerated value of the object type on the wire
    pub fn code(&self) -> u16 {
        match self {
            ObjectType::AnalogInput => 0,
            ObjectType::AnalogOutput => 1,
            ObjectType::AnalogValue => 2,
            ObjectType::BinaryInput => 3,
            ObjectType::BinaryValue => 5,
            ObjectType::Device => 8,
            ObjectType::DatetimeValue => 44,
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ObjectType::AnalogInput => "analog-input",
            ObjectType::AnalogOutput => "analog-output",
            ObjectType::AnalogValue => "analog-value",
            ObjectType::BinaryInput => "binary-input",
            ObjectType::BinaryValue => "binary-value",
            ObjectType::Device => "device",
            ObjectType::DatetimeValue => "datetime-value",
        };
        f.write_str(name)
    }
}

/// Object identifier: type plus instance number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectIdentifier {
    pub object_type: ObjectType,
    pub instance: u32,
}

impl ObjectIdentifier {
    pub fn new(object_type: ObjectType, instance: u32) -> Self {
        Self {
            object_type,
            instance,
        }
    }
}

impl std::fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.object_type, self.instance)
    }
}

/// Segmentation support advertised in I-Am
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Segmentation {
    #[default]
    SegmentedBoth,
    SegmentedTransmit,
    SegmentedReceive,
    NoSegmentation,
}

/// BACnet Date: years since 1900, month, day, day of week (Monday = 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacnetDate {
    pub year: u8,
    pub month: u8,
    pub day: u8,
    pub day_of_week: u8,
}

/// BACnet Time: hour, minute, second, hundredths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacnetTime {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub hundredths: u8,
}

/// Calendar value held by datetime-value objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacnetDateTime {
    pub date: BacnetDate,
    pub time: BacnetTime,
}

impl BacnetDateTime {
    /// Convert a UTC epoch timestamp to local calendar fields.
    ///
    /// Fractional seconds are truncated. Returns `None` when the shifted time
    /// is outside the range a BACnet date can encode (1900..=2154).
    pub fn from_epoch(timestamp: f64, offset_secs: i64) -> Option<Self> {
        if !timestamp.is_finite() {
            return None;
        }
        let local = (timestamp.floor() as i64).checked_add(offset_secs)?;
        let dt = DateTime::from_timestamp(local, 0)?;

        let year = u8::try_from(dt.year().checked_sub(1900)?).ok()?;
        if year == u8::MAX {
            return None;
        }

        Some(Self {
            date: BacnetDate {
                year,
                month: dt.month() as u8,
                day: dt.day() as u8,
                day_of_week: dt.weekday().number_from_monday() as u8,
            },
            time: BacnetTime {
                hour: dt.hour() as u8,
                minute: dt.minute() as u8,
                second: dt.second() as u8,
                hundredths: 0,
            },
        })
    }
}

/// Identity of the local BACnet device that owns the points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalDevice {
    pub object_name: String,
    pub instance: u32,
    pub address: String,
    pub vendor_identifier: u16,
    pub max_apdu_length_accepted: u16,
    pub segmentation_supported: Segmentation,
}

impl LocalDevice {
    pub fn identifier(&self) -> ObjectIdentifier {
        ObjectIdentifier::new(ObjectType::Device, self.instance)
    }
}

/// Who-Is request with optional inclusive instance range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhoIs {
    pub low_limit: Option<u32>,
    pub high_limit: Option<u32>,
}

impl WhoIs {
    pub fn new(low_limit: Option<u32>, high_limit: Option<u32>) -> Self {
        Self {
            low_limit,
            high_limit,
        }
    }

    /// Whether `instance` is inside the requested range; an unset bound
    /// leaves that side open.
    pub fn contains(&self, instance: u32) -> bool {
        self.low_limit.is_none_or(|low| instance >= low)
            && self.high_limit.is_none_or(|high| instance <= high)
    }
}

/// I-Am announcement, sent by us or received from a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IAm {
    /// Source address of the announcement
    pub source: String,
    pub device_identifier: ObjectIdentifier,
    pub max_apdu_length_accepted: u16,
    pub segmentation_supported: Segmentation,
    pub vendor_id: u16,
}

impl From<&LocalDevice> for IAm {
    fn from(device: &LocalDevice) -> Self {
        Self {
            source: device.address.clone(),
            device_identifier: device.identifier(),
            max_apdu_length_accepted: device.max_apdu_length_accepted,
            segmentation_supported: device.segmentation_supported,
            vendor_id: device.vendor_identifier,
        }
    }
}

/// Peer device accepted from an I-Am reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub device_id: u32,
    pub address: String,
    pub max_apdu: u16,
    pub vendor_id: u16,
    pub segmentation: Segmentation,
}
