//! Training corpus: loading, validation and descriptive statistics.
//!
//! A corpus is a list of records `{ metadata: {..}, persons: [{age?, gender?,
//! quality_score?}, ..] }`. Structural problems (a record that is not an
//! object, `persons` that is not an array of objects) are errors; individual
//! label values that cannot be read are dropped, like malformed metadata
//! fields are.

use portrait_core::Gender;
use portrait_meta::CaptureMetadata;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("record {index}: {reason}")]
    Invalid { index: usize, reason: String },
}

/// Labels for one person in a training record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersonLabel {
    pub age: Option<f64>,
    pub gender: Option<Gender>,
    pub quality: Option<f64>,
}

impl PersonLabel {
    fn from_json(obj: &serde_json::Map<String, Value>) -> Self {
        let number = |key: &str| {
            obj.get(key).and_then(|v| match v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            })
        };
        Self {
            age: number("age").filter(|a| a.is_finite()),
            gender: obj.get("gender").and_then(Value::as_str).and_then(Gender::from_label),
            quality: number("quality_score").filter(|q| q.is_finite()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRecord {
    pub metadata: CaptureMetadata,
    pub persons: Vec<PersonLabel>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Corpus {
    pub records: Vec<TrainingRecord>,
}

impl Corpus {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Parse a single record or an array of records.
    pub fn from_json(value: &Value) -> Result<Self, CorpusError> {
        let items: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        let records = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| parse_record(index, item))
            .collect::<Result<_, _>>()?;
        Ok(Self { records })
    }

    /// Load from a JSON file, or recursively from every `*.json` under a directory.
    pub fn load(path: &Path) -> Result<Self, CorpusError> {
        let files = if path.is_dir() {
            let mut files = Vec::new();
            collect_json_files(path, &mut files)?;
            files.sort();
            files
        } else {
            vec![path.to_path_buf()]
        };

        let mut corpus = Corpus::default();
        for file in &files {
            let bytes = std::fs::read(file).map_err(|source| CorpusError::Io {
                path: file.clone(),
                source,
            })?;
            let value: Value = serde_json::from_slice(&bytes).map_err(|source| CorpusError::Json {
                path: file.clone(),
                source,
            })?;
            let part = Corpus::from_json(&value)?;
            tracing::debug!(path = %file.display(), records = part.len(), "loaded corpus file");
            corpus.records.extend(part.records);
        }

        tracing::info!(
            path = %path.display(),
            files = files.len(),
            records = corpus.len(),
            "loaded training corpus"
        );
        Ok(corpus)
    }

    /// Split into `(train, validation)` keeping record order: the first
    /// `floor(len * (1 - validation_split))` records train.
    pub fn split(&self, validation_split: f64) -> (Corpus, Corpus) {
        let fraction = validation_split.clamp(0.0, 1.0);
        let cut = (self.records.len() as f64 * (1.0 - fraction)) as usize;
        let (train, validation) = self.records.split_at(cut.min(self.records.len()));
        (
            Corpus { records: train.to_vec() },
            Corpus { records: validation.to_vec() },
        )
    }

    pub fn persons(&self) -> impl Iterator<Item = (&CaptureMetadata, &PersonLabel)> {
        self.records
            .iter()
            .flat_map(|r| r.persons.iter().map(move |p| (&r.metadata, p)))
    }

    pub fn stats(&self) -> CorpusStats {
        CorpusStats::collect(self)
    }
}

fn parse_record(index: usize, item: &Value) -> Result<TrainingRecord, CorpusError> {
    let invalid = |reason: &str| CorpusError::Invalid { index, reason: reason.to_string() };

    let obj = item.as_object().ok_or_else(|| invalid("record is not an object"))?;
    let metadata = match obj.get("metadata") {
        None | Some(Value::Null) => CaptureMetadata::default(),
        Some(m @ Value::Object(_)) => CaptureMetadata::from_json(m),
        Some(_) => return Err(invalid("metadata is not an object")),
    };
    let persons = match obj.get("persons") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(persons)) => persons
            .iter()
            .map(|p| {
                p.as_object()
                    .map(PersonLabel::from_json)
                    .ok_or_else(|| invalid("person entry is not an object"))
            })
            .collect::<Result<_, _>>()?,
        Some(_) => return Err(invalid("persons is not an array")),
    };
    Ok(TrainingRecord { metadata, persons })
}

fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), CorpusError> {
    let io_err = |source| CorpusError::Io { path: dir.to_path_buf(), source };
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let path = entry.path();
        // `DirEntry::file_type` does not follow symlinks.
        let file_type = entry.file_type().map_err(io_err)?;
        if file_type.is_dir() {
            collect_json_files(&path, out)?;
        } else if file_type.is_symlink() && path.is_dir() {
            tracing::debug!(path = %path.display(), "not following symlinked directory");
        } else if path.extension().is_some_and(|e| e == "json") {
            out.push(path);
        }
    }
    Ok(())
}

/// Lighting class inferred from exposure settings.
pub fn lighting_class(iso: f64, f_number: f64) -> &'static str {
    if iso < 400.0 && f_number < 2.8 {
        "bright"
    } else if iso < 1600.0 && f_number < 4.0 {
        "normal"
    } else {
        "low_light"
    }
}

/// Coarse age bucket used for corpus balance reporting.
pub fn age_bucket(age: f64) -> &'static str {
    if age < 18.0 {
        "0-17"
    } else if age < 30.0 {
        "18-29"
    } else if age < 50.0 {
        "30-49"
    } else if age < 70.0 {
        "50-69"
    } else {
        "70+"
    }
}

/// Descriptive statistics over a corpus, for spotting sampling bias before training.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorpusStats {
    pub records: usize,
    pub persons: usize,
    pub camera_models: BTreeMap<String, usize>,
    pub countries: BTreeMap<String, usize>,
    pub cities: BTreeMap<String, usize>,
    pub genders: BTreeMap<String, usize>,
    pub age_buckets: BTreeMap<String, usize>,
    pub hours: BTreeMap<u32, usize>,
    pub lighting: BTreeMap<String, usize>,
    /// Number of records keyed by how many of the six capture fields they carry.
    pub completeness: BTreeMap<usize, usize>,
    pub mean_quality: Option<f64>,
    pub gender_balance: BTreeMap<String, f64>,
    pub age_balance: BTreeMap<String, f64>,
}

impl CorpusStats {
    fn collect(corpus: &Corpus) -> Self {
        let mut s = CorpusStats { records: corpus.len(), ..Default::default() };
        let mut quality_sum = 0.0;
        let mut quality_n = 0usize;

        for record in &corpus.records {
            let m = &record.metadata;
            if let Some(camera) = &m.camera_model {
                *s.camera_models.entry(camera.clone()).or_default() += 1;
            }
            if let Some(country) = &m.country {
                *s.countries.entry(country.clone()).or_default() += 1;
            }
            if let Some(city) = &m.city {
                *s.cities.entry(city.clone()).or_default() += 1;
            }
            if let Some(hour) = m.hour() {
                *s.hours.entry(hour).or_default() += 1;
            }
            if let (Some(iso), Some(f)) = (m.iso, m.f_number) {
                *s.lighting.entry(lighting_class(iso, f).to_string()).or_default() += 1;
            }
            let present = [
                m.camera_model.is_some(),
                m.datetime.is_some(),
                m.gps.is_some(),
                m.focal_length.is_some(),
                m.f_number.is_some(),
                m.iso.is_some(),
            ]
            .iter()
            .filter(|p| **p)
            .count();
            *s.completeness.entry(present).or_default() += 1;

            for person in &record.persons {
                s.persons += 1;
                if let Some(g) = person.gender {
                    *s.genders.entry(g.as_str().to_string()).or_default() += 1;
                }
                if let Some(age) = person.age {
                    *s.age_buckets.entry(age_bucket(age).to_string()).or_default() += 1;
                }
                if let Some(q) = person.quality {
                    quality_sum += q;
                    quality_n += 1;
                }
            }
        }

        s.mean_quality = (quality_n > 0).then(|| quality_sum / quality_n as f64);
        s.gender_balance = shares(&s.genders);
        s.age_balance = shares(&s.age_buckets);
        s
    }
}

fn shares(counts: &BTreeMap<String, usize>) -> BTreeMap<String, f64> {
    let total: usize = counts.values().sum();
    if total == 0 {
        return BTreeMap::new();
    }
    counts
        .iter()
        .map(|(k, v)| (k.clone(), *v as f64 / total as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_records() {
        let corpus = Corpus::from_json(&json!([
            {"metadata": {"age": 30, "location": {"country": "Spain"}},
             "persons": [{"age": "41", "gender": "female", "quality_score": 0.7},
                         {"gender": "robot", "age": "old"}]},
            {"metadata": {}},
            {"persons": null}
        ]))
        .unwrap();

        assert_eq!(corpus.len(), 3);
        let persons: Vec<_> = corpus.persons().map(|(_, p)| p.clone()).collect();
        assert_eq!(persons.len(), 2);
        assert_eq!(persons[0].age, Some(41.0));
        assert_eq!(persons[0].gender, Some(Gender::Female));
        assert_eq!(persons[0].quality, Some(0.7));
        assert_eq!(persons[1], PersonLabel::default());
    }

    #[test]
    fn test_single_record_object() {
        let corpus = Corpus::from_json(&json!({"metadata": {}, "persons": []})).unwrap();
        assert_eq!(corpus.len(), 1);
    }

    #[test]
    fn test_structural_errors() {
        let err = Corpus::from_json(&json!([{}, 7])).unwrap_err();
        assert!(matches!(err, CorpusError::Invalid { index: 1, .. }));
        assert!(Corpus::from_json(&json!([{"persons": {"age": 3}}])).is_err());
        assert!(Corpus::from_json(&json!([{"persons": [1]}])).is_err());
        assert!(Corpus::from_json(&json!([{"metadata": "x"}])).is_err());
    }

    #[test]
    fn test_load_directory_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("a.json"), r#"[{"persons": [{"age": 20}]}]"#).unwrap();
        std::fs::write(dir.path().join("nested/b.json"), r#"{"persons": [{"age": 30}]}"#).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let corpus = Corpus::load(dir.path()).unwrap();
        let ages: Vec<_> = corpus.persons().filter_map(|(_, p)| p.age).collect();
        assert_eq!(ages, vec![20.0, 30.0]);
    }

    #[cfg(unix)]
    #[test]
    fn test_load_directory_skips_symlink_loops() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/b.json"), r#"{"persons": [{"age": 30}]}"#).unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("nested/loop")).unwrap();

        let corpus = Corpus::load(dir.path()).unwrap();
        assert_eq!(corpus.len(), 1);
    }

    #[test]
    fn test_load_reports_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(Corpus::load(&path), Err(CorpusError::Json { .. })));
        assert!(matches!(
            Corpus::load(&dir.path().join("missing.json")),
            Err(CorpusError::Io { .. })
        ));
    }

    #[test]
    fn test_split_keeps_order() {
        let records: Vec<Value> = (0..10).map(|i| json!({"persons": [{"age": i + 1}]})).collect();
        let corpus = Corpus::from_json(&Value::Array(records)).unwrap();
        let (train, val) = corpus.split(0.2);
        assert_eq!(train.len(), 8);
        assert_eq!(val.len(), 2);
        assert_eq!(val.records[0].persons[0].age, Some(9.0));

        let (all, none) = corpus.split(0.0);
        assert_eq!((all.len(), none.len()), (10, 0));
    }

    #[test]
    fn test_stats() {
        let corpus = Corpus::from_json(&json!([
            {"metadata": {"camera_model": "iPhone 13", "iso": 100, "f_number": 1.8,
                          "datetime": "2023:01:01 09:00:00", "location": {"country": "USA", "city": "Boston"}},
             "persons": [{"age": 10, "gender": "male"}, {"age": 35, "gender": "female"}]},
            {"metadata": {"iso": 800, "f_number": 3.5, "gps": {"lat": 1, "lon": 2}},
             "persons": [{"age": 72, "gender": "female", "quality_score": 0.5}]},
            {"metadata": {"iso": 3200, "f_number": 8}}
        ]))
        .unwrap();
        let s = corpus.stats();

        assert_eq!(s.records, 3);
        assert_eq!(s.persons, 3);
        assert_eq!(s.camera_models["iPhone 13"], 1);
        assert_eq!(s.countries["USA"], 1);
        assert_eq!(s.cities["Boston"], 1);
        assert_eq!(s.cities.len(), 1);
        assert_eq!(s.hours[&9], 1);
        assert_eq!(s.lighting["bright"], 1);
        assert_eq!(s.lighting["normal"], 1);
        assert_eq!(s.lighting["low_light"], 1);
        assert_eq!(s.completeness[&4], 1);
        assert_eq!(s.completeness[&3], 1);
        assert_eq!(s.completeness[&2], 1);
        assert_eq!(s.age_buckets["0-17"], 1);
        assert_eq!(s.age_buckets["70+"], 1);
        assert!((s.gender_balance["female"] - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(s.mean_quality, Some(0.5));
    }
}
