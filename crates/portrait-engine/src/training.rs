//! Fitting attribute models and bias tables from a corpus, and measuring
//! a bundle against held-out records.

use crate::bias::BiasTables;
use crate::bundle::{FeatureWeights, ModelBundle, SampleCounts, BUNDLE_FORMAT_VERSION};
use crate::corpus::Corpus;
use crate::forest::{self, ForestConfig, ForestError, RandomForestClassifier, RandomForestRegressor};
use chrono::Utc;
use portrait_meta::MetadataEncoder;
use serde::Serialize;

/// An attribute needs more than this many labelled examples to get a model.
pub const MIN_TRAINING_SAMPLES: usize = 10;

pub const DEFAULT_VALIDATION_SPLIT: f64 = 0.2;

/// In-sample diagnostics for a regressor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegressionMetrics {
    pub samples: usize,
    pub mse: f64,
    pub r2: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassificationMetrics {
    pub samples: usize,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    pub records: usize,
    pub age: Option<RegressionMetrics>,
    pub gender: Option<ClassificationMetrics>,
    pub quality: Option<RegressionMetrics>,
    pub location_buckets: usize,
    pub hour_buckets: usize,
}

/// Feature rows and targets for one attribute.
struct Examples<T> {
    rows: Vec<Vec<f32>>,
    targets: Vec<T>,
}

impl<T> Default for Examples<T> {
    fn default() -> Self {
        Self { rows: Vec::new(), targets: Vec::new() }
    }
}

impl<T> Examples<T> {
    fn push(&mut self, row: &[f32], target: T) {
        self.rows.push(row.to_vec());
        self.targets.push(target);
    }

    fn enough(&self, attribute: &str) -> bool {
        let n = self.targets.len();
        if n > MIN_TRAINING_SAMPLES {
            return true;
        }
        tracing::info!(attribute, samples = n, "not enough labelled examples, skipping model");
        false
    }
}

/// Fit every attribute model with enough data, plus the bias tables, on the whole corpus.
pub fn train(
    corpus: &Corpus,
    encoder: &MetadataEncoder,
    config: &ForestConfig,
) -> Result<(ModelBundle, TrainingReport), ForestError> {
    let mut age = Examples::<f32>::default();
    let mut gender = Examples::<String>::default();
    let mut quality = Examples::<f32>::default();

    for record in &corpus.records {
        if record.persons.is_empty() {
            continue;
        }
        let features = encoder.encode_metadata(&record.metadata);
        for person in &record.persons {
            if let Some(a) = person.age {
                age.push(features.as_slice(), a as f32);
            }
            if let Some(g) = person.gender {
                gender.push(features.as_slice(), g.as_str().to_string());
            }
            if let Some(q) = person.quality {
                quality.push(features.as_slice(), q as f32);
            }
        }
    }

    let (age_model, age_metrics) = if age.enough("age") {
        let (m, r) = fit_regressor(&age, config)?;
        tracing::info!(samples = r.samples, mse = r.mse, r2 = r.r2, "trained age model");
        (Some(m), Some(r))
    } else {
        (None, None)
    };

    let (gender_model, gender_metrics) = if gender.enough("gender") {
        let x = forest::to_matrix(&gender.rows)?;
        let model = RandomForestClassifier::fit(x.view(), &gender.targets, config)?;
        let predicted: Vec<String> = gender
            .rows
            .iter()
            .map(|row| model.predict(row).map(|p| p.label).unwrap_or_default())
            .collect();
        let metrics = ClassificationMetrics {
            samples: gender.targets.len(),
            accuracy: forest::accuracy(&gender.targets, &predicted),
        };
        tracing::info!(samples = metrics.samples, accuracy = metrics.accuracy, "trained gender model");
        (Some(model), Some(metrics))
    } else {
        (None, None)
    };

    let (quality_model, quality_metrics) = if quality.enough("quality") {
        let (m, r) = fit_regressor(&quality, config)?;
        tracing::info!(samples = r.samples, mse = r.mse, r2 = r.r2, "trained quality model");
        (Some(m), Some(r))
    } else {
        (None, None)
    };

    let bias = BiasTables::compute(corpus);
    tracing::info!(
        locations = bias.location_age.len(),
        hours = bias.hour_female_ratio.len(),
        "computed bias tables"
    );

    let report = TrainingReport {
        records: corpus.len(),
        age: age_metrics,
        gender: gender_metrics,
        quality: quality_metrics,
        location_buckets: bias.location_age.len(),
        hour_buckets: bias.hour_female_ratio.len(),
    };

    let schema = encoder.schema();
    let bundle = ModelBundle {
        format_version: BUNDLE_FORMAT_VERSION,
        schema_version: schema.version,
        schema_fingerprint: schema.fingerprint(),
        trained_at: Utc::now(),
        weights: FeatureWeights::default(),
        age_model,
        gender_model,
        quality_model,
        bias,
        samples: SampleCounts {
            age: age.targets.len(),
            gender: gender.targets.len(),
            quality: quality.targets.len(),
        },
    };
    Ok((bundle, report))
}

fn fit_regressor(
    examples: &Examples<f32>,
    config: &ForestConfig,
) -> Result<(RandomForestRegressor, RegressionMetrics), ForestError> {
    let x = forest::to_matrix(&examples.rows)?;
    let model = RandomForestRegressor::fit(x.view(), &examples.targets, config)?;
    let predicted: Vec<f32> = examples.rows.iter().map(|row| model.predict(row)).collect();
    let metrics = RegressionMetrics {
        samples: examples.targets.len(),
        mse: forest::mean_squared_error(&examples.targets, &predicted),
        r2: forest::r2_score(&examples.targets, &predicted),
    };
    Ok((model, metrics))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AgeEvaluation {
    pub samples: usize,
    pub mae: f64,
    pub mse: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityEvaluation {
    pub samples: usize,
    pub mse: f64,
}

/// Metrics of a bundle's raw model predictions against labelled records.
/// An attribute is reported only when its model exists and at least one label does.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub records: usize,
    pub age: Option<AgeEvaluation>,
    pub gender: Option<ClassificationMetrics>,
    pub quality: Option<QualityEvaluation>,
}

pub fn evaluate(bundle: &ModelBundle, corpus: &Corpus, encoder: &MetadataEncoder) -> EvaluationReport {
    let mut age = (Vec::new(), Vec::new());
    let mut gender = (Vec::new(), Vec::new());
    let mut quality = (Vec::new(), Vec::new());

    for record in &corpus.records {
        if record.persons.is_empty() {
            continue;
        }
        let features = encoder.encode_metadata(&record.metadata);
        let x = features.as_slice();
        for person in &record.persons {
            if let (Some(truth), Some(model)) = (person.age, &bundle.age_model) {
                age.0.push(truth as f32);
                age.1.push(model.predict(x));
            }
            if let (Some(truth), Some(model)) = (person.gender, &bundle.gender_model) {
                gender.0.push(truth.as_str().to_string());
                gender.1.push(model.predict(x).map(|p| p.label).unwrap_or_default());
            }
            if let (Some(truth), Some(model)) = (person.quality, &bundle.quality_model) {
                quality.0.push(truth as f32);
                quality.1.push(model.predict(x).clamp(0.0, 1.0));
            }
        }
    }

    let report = EvaluationReport {
        records: corpus.len(),
        age: (!age.0.is_empty()).then(|| AgeEvaluation {
            samples: age.0.len(),
            mae: forest::mean_absolute_error(&age.0, &age.1),
            mse: forest::mean_squared_error(&age.0, &age.1),
        }),
        gender: (!gender.0.is_empty()).then(|| ClassificationMetrics {
            samples: gender.0.len(),
            accuracy: forest::accuracy(&gender.0, &gender.1),
        }),
        quality: (!quality.0.is_empty()).then(|| QualityEvaluation {
            samples: quality.0.len(),
            mse: forest::mean_squared_error(&quality.0, &quality.1),
        }),
    };
    tracing::info!(
        records = report.records,
        age = ?report.age,
        gender = ?report.gender,
        quality = ?report.quality,
        "evaluated bundle"
    );
    report
}

/// Result of a train/validate run.
#[derive(Debug, Clone)]
pub struct TrainerOutcome {
    pub bundle: ModelBundle,
    pub training: TrainingReport,
    pub validation: EvaluationReport,
}

/// Trains on the leading part of a corpus and evaluates on the rest.
#[derive(Debug, Clone)]
pub struct Trainer {
    pub encoder: MetadataEncoder,
    pub forest: ForestConfig,
    pub validation_split: f64,
}

impl Default for Trainer {
    fn default() -> Self {
        Self {
            encoder: MetadataEncoder::default(),
            forest: ForestConfig::default(),
            validation_split: DEFAULT_VALIDATION_SPLIT,
        }
    }
}

impl Trainer {
    pub fn new(encoder: MetadataEncoder) -> Self {
        Self { encoder, ..Default::default() }
    }

    pub fn run(&self, corpus: &Corpus) -> Result<TrainerOutcome, ForestError> {
        let (train_part, validation_part) = corpus.split(self.validation_split);
        tracing::info!(
            train = train_part.len(),
            validation = validation_part.len(),
            "starting training run"
        );
        let (bundle, training) = train(&train_part, &self.encoder, &self.forest)?;
        let validation = evaluate(&bundle, &validation_part, &self.encoder);
        Ok(TrainerOutcome { bundle, training, validation })
    }
}
