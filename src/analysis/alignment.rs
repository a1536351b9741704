/// Multi-site comparison of one field on a shared time axis.
///
/// Sites rarely report at the same instants, so the axis is the sorted union
/// of every site's timestamps and each site gets a column with `None` where
/// it has no record. A site's moving average is computed on its own series
/// before being placed on the union axis, so gaps introduced by the other
/// sites never enter its window.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::model::{Field, Record};
use crate::timestamp::Timestamp;

use super::series::{MovingAverageWindow, clean_values, moving_average};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteColumn {
    pub collection: String,
    pub values: Vec<Option<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moving_average: Option<Vec<Option<f64>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignedSeries {
    pub field: Field,
    pub timestamps: Vec<Timestamp>,
    pub columns: Vec<SiteColumn>,
}

impl AlignedSeries {
    pub fn column(&self, collection: &str) -> Option<&SiteColumn> {
        self.columns.iter().find(|c| c.collection == collection)
    }
}

/// Aligns `field` across `sites`, keeping the given site order for the
/// columns. When a site has two records at the same instant the later one in
/// its list wins.
pub fn align_sites(
    field: Field,
    sites: &[(&str, &[Record])],
    window: Option<MovingAverageWindow>,
) -> AlignedSeries {
    let axis: BTreeSet<Timestamp> = sites
        .iter()
        .flat_map(|(_, records)| records.iter().map(|r| r.timestamp))
        .collect();
    let timestamps: Vec<Timestamp> = axis.into_iter().collect();

    let columns = sites
        .iter()
        .map(|(collection, records)| {
            let mut ordered: Vec<&Record> = records.iter().collect();
            ordered.sort_by_key(|r| r.timestamp);
            let own: Vec<Record> = ordered.into_iter().cloned().collect();

            let values = clean_values(&own, field);
            let averaged = window.map(|w| moving_average(&values, w));

            let mut at: HashMap<Timestamp, usize> = HashMap::with_capacity(own.len());
            for (i, record) in own.iter().enumerate() {
                at.insert(record.timestamp, i);
            }

            let place = |series: &[Option<f64>]| -> Vec<Option<f64>> {
                timestamps
                    .iter()
                    .map(|ts| at.get(ts).and_then(|&i| series[i]))
                    .collect()
            };

            SiteColumn {
                collection: collection.to_string(),
                values: place(&values),
                moving_average: averaged.as_deref().map(place),
            }
        })
        .collect();

    AlignedSeries {
        field,
        timestamps,
        columns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse_canonical(s).unwrap()
    }

    fn rec(t: &str, v: f64) -> Record {
        Record::empty(ts(t)).with(Field::TemperatureK, v)
    }

    #[test]
    fn test_union_axis_and_gaps() {
        let a = vec![rec("2020-01-01 00:00:00", 270.0), rec("2020-01-01 00:02:00", 272.0)];
        let b = vec![rec("2020-01-01 00:01:00", 0.0), rec("2020-01-01 00:02:00", 265.0)];
        let aligned = align_sites(
            Field::TemperatureK,
            &[("sma_data", &a[..]), ("jcmt_data", &b[..])],
            None,
        );

        assert_eq!(aligned.timestamps.len(), 3);
        let sma = aligned.column("sma_data").unwrap();
        assert_eq!(sma.values, vec![Some(270.0), None, Some(272.0)]);
        let jcmt = aligned.column("jcmt_data").unwrap();
        assert_eq!(jcmt.values, vec![None, Some(0.0), Some(265.0)], "zero is kept");
        assert!(jcmt.moving_average.is_none());
        assert_eq!(aligned.columns[0].collection, "sma_data");
    }

    #[test]
    fn test_moving_average_uses_site_own_series() {
        let a = vec![
            rec("2020-01-01 00:00:00", 2.0),
            rec("2020-01-01 00:04:00", 4.0),
        ];
        let b = vec![rec("2020-01-01 00:02:00", 100.0)];
        let window = MovingAverageWindow::new(2);
        let aligned = align_sites(Field::TemperatureK, &[("glt_2017_2022", &a[..]), ("smt_data", &b[..])], window);

        let glt = aligned.column("glt_2017_2022").unwrap();
        // Trailing pair (2, 4) on the site's own axis, not (None, 4).
        assert_eq!(glt.moving_average, Some(vec![Some(2.0), None, Some(3.0)]));
    }

    #[test]
    fn test_unsorted_input_and_duplicate_instants() {
        let a = vec![
            rec("2020-01-01 00:01:00", 5.0),
            rec("2020-01-01 00:00:00", 1.0),
            rec("2020-01-01 00:01:00", 6.0),
        ];
        let aligned = align_sites(Field::TemperatureK, &[("lmt_data", &a[..])], None);
        assert_eq!(aligned.timestamps, vec![ts("2020-01-01 00:00:00"), ts("2020-01-01 00:01:00")]);
        assert_eq!(aligned.columns[0].values, vec![Some(1.0), Some(6.0)]);
    }

    #[test]
    fn test_no_sites() {
        let aligned = align_sites(Field::PwvMm, &[], None);
        assert!(aligned.timestamps.is_empty());
        assert!(aligned.columns.is_empty());
    }
}
