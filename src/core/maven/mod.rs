mod artifact;
mod pom;

pub use artifact::MavenArtifact;
pub use pom::{PomDocument, PomProperties};

/// Default repository for `maven:` sources without an explicit `repository`.
pub const MAVEN_CENTRAL: &str = "https://repo1.maven.org/maven2";
