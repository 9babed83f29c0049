//! Chartsync Repo - Chart sources and the chart cache
//!
//! This crate materializes chart content on local disk:
//! - `ArchiveFetcher`: downloads packaged `.tgz` charts, first responsive URL wins
//! - `GitFetcher`: shallow clones a repository and keeps only the chart subpath
//! - `ChartCache`: one directory per chart name under a configured root
//! - `ChartResolver`: the [`SourceResolver`] tying the above together

pub mod cache;
pub mod config;
pub mod error;
pub mod git;
pub mod http;
pub mod resolver;

pub use cache::ChartCache;
pub use config::{CHARTS_DIR_ENV, CacheConfig};
pub use error::{RepoError, Result};
pub use git::GitFetcher;
pub use http::{ArchiveFetcher, FetchedArchive};
pub use resolver::{ChartResolver, SourceResolver};
