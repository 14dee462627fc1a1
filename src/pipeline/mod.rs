//! Generation pipeline.
//!
//! - [`concept`]: idea analysis behind the [`ConceptService`] seam, with a
//!   keyword based fallback
//! - [`templates`]: project file templates behind the [`TemplateLibrary`] seam
//! - [`machine`]: the stage machine that writes the project and runs the build

pub mod concept;
pub mod machine;
pub mod templates;

pub use concept::{Concept, ConceptError, ConceptService, HeuristicConcept};
pub use machine::GenerationPipeline;
pub use templates::{AndroidTemplates, GeneratedFile, ProjectPlan, Section, TemplateLibrary};
