// ─── Extraction Engine ───
// Reverse of the template resolver: an existing server directory in, a
// best-effort template and its warnings out.

pub mod detect;
pub mod extractor;
pub mod registry;
pub mod warning;

pub use extractor::{Extraction, Extractor};
pub use registry::{ArtifactRegistry, RegistryEntry, RegistryMatch};
pub use warning::ExtractionWarning;
