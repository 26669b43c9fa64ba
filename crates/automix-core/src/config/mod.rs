//! Configuration shared by the automix binary and library users
//!
//! - YAML loading and saving for any serde type
//! - Loudness normalisation settings
//!
//! The mix parameters live with the planner ([`crate::planner::MixParams`])
//! and the extractor settings with the analyzer
//! ([`crate::analysis::ExtractorConfig`]); both are plain serde structs so the
//! binary can nest them in its own config file.

mod io;
mod loudness;

pub use io::{load_config, save_config};
pub use loudness::LoudnessConfig;
