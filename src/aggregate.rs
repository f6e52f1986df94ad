use chrono::{DateTime, SubsecRound as _, Utc};
use indexmap::IndexMap;

use crate::reading::{DeviceId, RawBatch};

const MEAN_SCALE: f64 = 10_000.0;

/// Signal strengths collected for one device within one window.
#[derive(Debug, Clone)]
pub struct DeviceAccumulator {
    device_id: DeviceId,
    signal_strengths: Vec<i8>,
    window_timestamp: DateTime<Utc>,
}

impl DeviceAccumulator {
    /// `first_seen` is truncated to whole seconds and becomes the record's timestamp.
    pub fn new(device_id: DeviceId, first_seen: DateTime<Utc>) -> Self {
        Self {
            device_id,
            signal_strengths: Vec::new(),
            window_timestamp: first_seen.trunc_subsecs(0),
        }
    }

    pub fn push(&mut self, signal_strength: i8) {
        self.signal_strengths.push(signal_strength);
    }

    /// `None` when nothing was pushed.
    pub fn finalize(self) -> Option<AggregatedRecord> {
        if self.signal_strengths.is_empty() {
            return None;
        }

        let sum: i64 = self.signal_strengths.iter().map(|&s| i64::from(s)).sum();
        let mean = sum as f64 / self.signal_strengths.len() as f64;

        Some(AggregatedRecord {
            device_id: self.device_id,
            mean_signal_strength: (mean * MEAN_SCALE).round_ties_even() / MEAN_SCALE,
            window_timestamp: self.window_timestamp,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRecord {
    pub device_id: DeviceId,

    /// Mean dBm, rounded to four decimal places.
    pub mean_signal_strength: f64,

    pub window_timestamp: DateTime<Utc>,
}

/// One record per device seen in a window.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedBatch {
    pub window_start: DateTime<Utc>,

    records: IndexMap<DeviceId, AggregatedRecord>,
}

impl AggregatedBatch {
    pub fn empty(window_start: DateTime<Utc>) -> Self {
        Self {
            window_start,
            records: IndexMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, device_id: &DeviceId) -> Option<&AggregatedRecord> {
        self.records.get(device_id)
    }

    /// Records in first-seen order.
    pub fn records(&self) -> impl ExactSizeIterator<Item = &AggregatedRecord> {
        self.records.values()
    }
}

/// Averages each device's readings in `batch`.
pub fn aggregate(batch: &RawBatch) -> AggregatedBatch {
    let mut accumulators: IndexMap<DeviceId, DeviceAccumulator> = IndexMap::new();

    for reading in &batch.readings {
        accumulators
            .entry(reading.device_id)
            .or_insert_with(|| DeviceAccumulator::new(reading.device_id, reading.captured_at))
            .push(reading.signal_strength);
    }

    let records = accumulators
        .into_iter()
        .filter_map(|(id, acc)| acc.finalize().map(|record| (id, record)))
        .collect();

    AggregatedBatch {
        window_start: batch.window_start,
        records,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone as _};

    use super::*;
    use crate::reading::Reading;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn batch(readings: &[(&str, i8, i64)]) -> RawBatch {
        let mut batch = RawBatch::new(start());
        for &(id, signal_strength, offset_ms) in readings {
            batch.push(Reading {
                device_id: id.parse().unwrap(),
                signal_strength,
                captured_at: start() + TimeDelta::milliseconds(offset_ms),
            });
        }
        batch
    }

    fn id(s: &str) -> DeviceId {
        s.parse().unwrap()
    }

    #[test]
    fn averages_one_device() {
        let result = aggregate(&batch(&[
            ("aa:bb:cc:dd:ee:ff", -40, 10),
            ("aa:bb:cc:dd:ee:ff", -44, 20),
            ("aa:bb:cc:dd:ee:ff", -42, 30),
        ]));

        assert_eq!(result.len(), 1);
        let record = result.get(&id("aa:bb:cc:dd:ee:ff")).unwrap();
        assert_eq!(record.mean_signal_strength, -42.0);
    }

    #[test]
    fn single_readings_keep_their_value() {
        let result = aggregate(&batch(&[
            ("11:11:11:11:11:11", -60, 0),
            ("22:22:22:22:22:22", -70, 5),
        ]));

        assert_eq!(result.len(), 2);
        assert_eq!(
            result.get(&id("11:11:11:11:11:11")).unwrap().mean_signal_strength,
            -60.0
        );
        assert_eq!(
            result.get(&id("22:22:22:22:22:22")).unwrap().mean_signal_strength,
            -70.0
        );
    }

    #[test]
    fn one_record_per_distinct_device_only() {
        let input = batch(&[
            ("11:11:11:11:11:11", -60, 0),
            ("22:22:22:22:22:22", -70, 1),
            ("11:11:11:11:11:11", -62, 2),
            ("33:33:33:33:33:33", -80, 3),
            ("22:22:22:22:22:22", -72, 4),
        ]);

        let result = aggregate(&input);

        let ids: Vec<String> = result.records().map(|r| r.device_id.to_string()).collect();
        assert_eq!(
            ids,
            vec!["11:11:11:11:11:11", "22:22:22:22:22:22", "33:33:33:33:33:33"]
        );
        assert!(result.get(&id("44:44:44:44:44:44")).is_none());
    }

    #[test]
    fn rounds_mean_to_four_places() {
        let result = aggregate(&batch(&[
            ("aa:bb:cc:dd:ee:ff", -40, 0),
            ("aa:bb:cc:dd:ee:ff", -41, 0),
            ("aa:bb:cc:dd:ee:ff", -41, 0),
        ]));

        assert_eq!(
            result.get(&id("aa:bb:cc:dd:ee:ff")).unwrap().mean_signal_strength,
            -40.6667
        );
    }

    #[test]
    fn exact_halves_round_to_even() {
        let mut readings = vec![("aa:bb:cc:dd:ee:ff", -40, 0); 31];
        readings.push(("aa:bb:cc:dd:ee:ff", -41, 0));

        // -1281 / 32 = -40.03125
        assert_eq!(
            aggregate(&batch(&readings))
                .get(&id("aa:bb:cc:dd:ee:ff"))
                .unwrap()
                .mean_signal_strength,
            -40.0312
        );
    }

    #[test]
    fn empty_batch_aggregates_to_empty_batch() {
        let result = aggregate(&RawBatch::new(start()));

        assert!(result.is_empty());
        assert_eq!(result.window_start, start());
    }

    #[test]
    fn window_timestamp_is_first_sighting_truncated_to_seconds() {
        let result = aggregate(&batch(&[
            ("aa:bb:cc:dd:ee:ff", -40, 1_750),
            ("aa:bb:cc:dd:ee:ff", -40, 2_900),
        ]));

        assert_eq!(
            result.get(&id("aa:bb:cc:dd:ee:ff")).unwrap().window_timestamp,
            start() + TimeDelta::seconds(1)
        );
    }

    #[test]
    fn aggregation_is_repeatable() {
        let input = batch(&[
            ("11:11:11:11:11:11", -60, 0),
            ("22:22:22:22:22:22", -70, 1),
            ("11:11:11:11:11:11", -65, 2),
        ]);

        assert_eq!(aggregate(&input), aggregate(&input));
    }

    #[test]
    fn empty_accumulator_never_finalizes() {
        let acc = DeviceAccumulator::new(id("aa:bb:cc:dd:ee:ff"), start());

        assert_eq!(acc.finalize(), None);
    }
}
