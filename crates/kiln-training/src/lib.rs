//! Kiln Training
//!
//! Orchestration of user-supplied training scripts:
//! - Launching and supervising one subprocess per job (`ProcessSupervisor`)
//! - Turning script output into metric snapshots (`parser`)
//! - Tracking per-job progress for concurrent readers (`ProgressStore`)
//! - Finding the model file a run produced (`ArtifactDetector`)
//! - Analyzing finished runs (`analysis`)
//! - Pushing live events to the job owner's subscribers (`BroadcastGateway`)

pub mod analysis;
pub mod artifacts;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod job;
pub mod layout;
pub mod lines;
pub mod metrics;
pub mod parser;
pub mod progress;
pub mod registry;
pub mod store;
pub mod supervisor;

pub use analysis::{analyze, DetailedMetrics, NarrativeAnalyzer, PerformanceAnalysis, PerformanceLevel};
pub use artifacts::{ArtifactDetector, ArtifactSelection, DetectedArtifact, DirectorySnapshot, FileSnapshot, SelectionReason};
pub use broadcast::{
    BroadcastGateway, BroadcastMessage, ChannelSubscriber, DeliveryError, JobEvent, RecordingObserver, Subscriber,
    SubscriptionId, TrainingObserver,
};
pub use config::TrainingConfig;
pub use error::{TrainingError, TrainingResult};
pub use job::{JobId, OwnerId, TrainingJob};
pub use layout::UploadLayout;
pub use metrics::{normalize_accuracy, ReportedAccuracy, TrainingMetricSnapshot};
pub use parser::{parse_line, OutputStream, ParsedLine};
pub use progress::{ProgressHandle, ProgressTick, TrainingProgress, TrainingStatus};
pub use registry::{FileModelRegistry, InMemoryModelRegistry, ModelRegistry, RegistryError, TrainedModelRecord};
pub use store::ProgressStore;
pub use supervisor::{ProcessSupervisor, CANCELLED_MESSAGE};
