//! Patti note ledger slip: live recompute of the slip figures, spreadsheet
//! import, and capture of the slip region as a clipboard-ready PNG.

pub mod capability;
pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod import;
pub mod ledger;
pub mod logging;
pub mod platform;
pub mod publish;
pub mod raster;
pub mod recompute;
pub mod resource;
pub mod slip;

pub use capability::{BrowserFamily, CapabilityProfile, CapabilityReport, EnvironmentProbe, PublishRoute};
pub use config::{ExportConfig, SlipConfig};
pub use error::{SlipError, SlipResult};
pub use import::{scan_and_fill, FieldAssignments};
pub use ledger::{CellId, DerivedCells, InputField, InputSet};
pub use publish::{DiagnosticReport, ExportOutcome, ExportReport, ExportState, Publisher};
pub use raster::{ExportArtifact, Rasterizer};
pub use recompute::{recompute, RecomputeEngine};
pub use slip::{SlipRegion, SlipSheet};
