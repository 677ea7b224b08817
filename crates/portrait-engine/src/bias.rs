//! Bias tables derived from a training corpus.

use crate::corpus::Corpus;
use portrait_core::Gender;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A bucket must hold more than this many samples to be kept.
pub const MIN_BUCKET_SAMPLES: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BiasTables {
    /// Country → mean labelled age.
    #[serde(default)]
    pub location_age: BTreeMap<String, f64>,
    /// Hour of day → fraction of `female` among male/female labels.
    #[serde(default)]
    pub hour_female_ratio: BTreeMap<u32, f64>,
}

impl BiasTables {
    pub fn compute(corpus: &Corpus) -> Self {
        let mut ages: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
        let mut hours: BTreeMap<u32, (usize, usize)> = BTreeMap::new();

        for (metadata, person) in corpus.persons() {
            if let (Some(country), Some(age)) = (metadata.country.as_deref(), person.age) {
                if age > 0.0 {
                    let slot = ages.entry(country).or_default();
                    slot.0 += age;
                    slot.1 += 1;
                }
            }
            if let (Some(hour), Some(gender)) = (metadata.hour(), person.gender) {
                let slot = hours.entry(hour).or_default();
                match gender {
                    Gender::Male => slot.0 += 1,
                    Gender::Female => slot.1 += 1,
                }
            }
        }

        let location_age = ages
            .into_iter()
            .filter(|(_, (_, n))| *n > MIN_BUCKET_SAMPLES)
            .map(|(country, (sum, n))| (country.to_string(), sum / n as f64))
            .collect();
        let hour_female_ratio = hours
            .into_iter()
            .filter(|(_, (male, female))| male + female > MIN_BUCKET_SAMPLES)
            .map(|(hour, (male, female))| (hour, female as f64 / (male + female) as f64))
            .collect();

        Self { location_age, hour_female_ratio }
    }

    pub fn location_age(&self, country: Option<&str>) -> Option<f64> {
        self.location_age.get(country?).copied()
    }

    pub fn hour_female_ratio(&self, hour: Option<u32>) -> Option<f64> {
        self.hour_female_ratio.get(&hour?).copied()
    }
}
