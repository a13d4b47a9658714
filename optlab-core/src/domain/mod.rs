//! Domain types for the option-structure optimizer.

pub mod diagnostics;
pub mod episode;
pub mod ids;
pub mod matrix;
pub mod metrics;
pub mod option;
pub mod structure;

pub use diagnostics::{
    AdaptiveDecision, AdaptivePathsRecord, Diagnostics, STAGE_EXPIRIES, STAGE_SCORED,
    STAGE_STRIKES, STAGE_STRUCTURES, STAGE_SURVIVORS,
};
pub use episode::{filter_by_state, CandidateEpisode, EpisodeError};
pub use ids::RunId;
pub use matrix::{MatrixError, PathMatrix};
pub use metrics::{MetricsReport, VarMethod};
pub use option::{Leg, LegError, LegPair, OptionType, Side, StrikeSpec};
pub use structure::{
    AnalyticEstimate, CandidateStructure, CostEstimate, StructureError, StructureType, MAX_WIDTH_STRIKES,
};

/// Symbol type alias
pub type Symbol = String;

/// Contract multiplier for listed equity options.
pub const CONTRACT_MULTIPLIER: f64 = 100.0;
