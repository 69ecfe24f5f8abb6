pub mod defaults;
pub mod format;
pub mod synthesizer;
pub mod writer;

pub use synthesizer::{
    ClusterView, ConfigFileSet, ConfigSynthesizer, CONTAINER_GAME_PORT, FORWARDING_SECRETS_FILE,
};
pub use writer::{ArtifactPlacement, CommitReport, ConfigWriter, FILE_LIST};
