//! Artifact exporters
//!
//! Writes the run's on-disk artifacts under `artifact_dir/<run_name>/`:
//! the deterministic `inputs.json`, per-record `profile_export.jsonl`, the
//! aggregate JSON and CSV reports, and timeslice snapshots when slicing is
//! enabled.

pub mod inputs;
pub mod writer;

pub use inputs::{build_inputs, InputsFile};
pub use writer::ArtifactWriter;
