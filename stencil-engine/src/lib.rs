//! Stencil instantiation engine
//!
//! Turns a versioned set of resource templates, a set of target namespaces and
//! per-namespace variable bindings into previewable manifests, and assembles the
//! final create-instance request.

// Core modules
pub mod config;
pub mod error;
pub mod validation;

// Logging configuration
pub mod logging;

// Collaborator seam
pub mod backend;
pub use backend::TemplateBackend;

// Instantiation core
pub mod bindings;
pub mod conflicts;
pub mod loadbalancer;
pub mod preview;
pub mod substitution;
pub mod submit;

// Session view-model
pub mod session;
pub use session::InstantiationSession;

pub use error::{InstantiateError, Result, SelectionError};
