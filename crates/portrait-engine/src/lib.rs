//! portrait-engine — attribute models trained on capture metadata, bias
//! tables, fusion with detector output, and the recognition pipeline.

pub mod bias;
pub mod bundle;
pub mod corpus;
pub mod forest;
pub mod fusion;
pub mod pipeline;
pub mod training;

pub use bias::BiasTables;
pub use bundle::{BundleError, FeatureWeights, ModelBundle, SampleCounts};
pub use corpus::{Corpus, CorpusError, CorpusStats, PersonLabel, TrainingRecord};
pub use forest::{ForestConfig, ForestError, RandomForestClassifier, RandomForestRegressor};
pub use fusion::{correct, Attributes, MetadataContext};
pub use pipeline::{EnrollOutcome, Pipeline, PipelineConfig, PipelineError, RecognizedFace};
pub use training::{evaluate, train, EvaluationReport, Trainer, TrainerOutcome, TrainingReport};
