use chrono::Timelike;

use crate::analyzers::types::{HOURS_PER_DAY, HourlyAverage, HourlyTable};
use crate::analyzers::utility::mean;
use crate::parser::Report;

#[derive(Default)]
struct HourSeries {
    car: Vec<f64>,
    bike: Vec<f64>,
    pedestrian: Vec<f64>,
}

/// Buckets `reports` by UTC hour-of-day and averages each count.
///
/// Every hour 0..23 is present in the result. Hours without reports
/// average to zero. No rounding is applied.
pub fn hourly_averages(reports: &[Report]) -> HourlyTable {
    let mut series: [HourSeries; HOURS_PER_DAY] = Default::default();

    for report in reports {
        let bucket = &mut series[report.date.hour() as usize];
        bucket.car.push(report.car);
        bucket.bike.push(report.bike);
        bucket.pedestrian.push(report.pedestrian);
    }

    HourlyTable::new(series.map(|s| HourlyAverage {
        avg_car: mean(&s.car),
        avg_bike: mean(&s.bike),
        avg_pedestrian: mean(&s.pedestrian),
    }))
}
