//! Data types written to the segments document.

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

pub const HOURS_PER_DAY: usize = 24;

/// Mean counts for one hour of the day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HourlyAverage {
    pub avg_car: f64,
    pub avg_bike: f64,
    pub avg_pedestrian: f64,
}

/// Averages for all 24 hours of the day.
///
/// Always holds exactly one entry per hour; an hour without reports is
/// all zeros. Serialized as an object keyed `"0"` through `"23"`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HourlyTable {
    hours: [HourlyAverage; HOURS_PER_DAY],
}

impl HourlyTable {
    pub fn new(hours: [HourlyAverage; HOURS_PER_DAY]) -> Self {
        Self { hours }
    }

    /// Returns the averages for `hour`, or `None` if `hour > 23`.
    pub fn get(&self, hour: usize) -> Option<&HourlyAverage> {
        self.hours.get(hour)
    }

    /// Iterates `(hour, averages)` in ascending hour order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &HourlyAverage)> {
        self.hours.iter().enumerate()
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.hours.len()
    }
}

impl Serialize for HourlyTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(HOURS_PER_DAY))?;
        for (hour, avg) in self.iter() {
            map.serialize_entry(&hour.to_string(), avg)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for HourlyTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = BTreeMap::<String, HourlyAverage>::deserialize(deserializer)?;
        let mut hours = [HourlyAverage::default(); HOURS_PER_DAY];
        let mut seen = [false; HOURS_PER_DAY];

        for (key, avg) in entries {
            let hour: usize = key
                .parse()
                .map_err(|_| D::Error::custom(format!("invalid hour key '{key}'")))?;
            let slot = hours
                .get_mut(hour)
                .ok_or_else(|| D::Error::custom(format!("hour {hour} out of range")))?;
            *slot = avg;
            seen[hour] = true;
        }

        if let Some(missing) = seen.iter().position(|s| !s) {
            return Err(D::Error::custom(format!("missing hour {missing}")));
        }

        Ok(Self { hours })
    }
}

/// One segment's entry in the segments document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSummary {
    pub averages: HourlyTable,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<[f64; 2]>,
}

/// Segment id → summary, the file read by the dashboard.
pub type SegmentsDocument = BTreeMap<String, SegmentSummary>;

/// A flat row of the optional CSV export.
#[derive(Debug, Serialize)]
pub struct HourlyRow<'a> {
    pub segment_id: &'a str,
    pub hour: usize,
    pub avg_car: f64,
    pub avg_bike: f64,
    pub avg_pedestrian: f64,
}
