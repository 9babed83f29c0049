//! Chartsync Core - Core types for the chart release controller
//!
//! This crate provides the foundational types used throughout chartsync:
//! - `RequestIdentity`: The namespaced identity of a release request
//! - `ChartSource`: Where chart content comes from (git or archive repository)
//! - `Values`: Override values with deep merge support
//! - `ReleaseStatus`: The observable outcome written back to a request
//! - `ChartMetadata` / `LoadedChart`: A materialized chart on disk
//! - `archive`: Packing and unpacking `.tgz` chart archives

pub mod archive;
pub mod chart;
pub mod error;
pub mod identity;
pub mod source;
pub mod status;
pub mod validate;
pub mod values;

pub use chart::{CHART_FILE, ChartMetadata, LoadedChart};
pub use error::{CoreError, Result};
pub use identity::RequestIdentity;
pub use source::{ChartSource, GitSource, RepoSource, SourceSpec, SourceType};
pub use status::{FailureKind, ReleaseStatus, StatusState};
pub use validate::{MAX_RELEASE_NAME_LEN, validate_chart_name, validate_release_name};
pub use values::Values;
