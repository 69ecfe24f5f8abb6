pub mod model;
pub mod overlay;
pub mod plan;
pub mod resolver;
pub mod version;

pub use model::{
    CoreKind, CoreSpec, Dependency, DependencyKind, OverlayValue, ResourceLimits, Template,
};
pub use overlay::{ConfigFormat, OverlayFile};
pub use plan::{ArtifactLocator, BuildPlan, NetworkRequirements, PlannedArtifact};
pub use resolver::{TemplateResolver, CORE_JAR};
