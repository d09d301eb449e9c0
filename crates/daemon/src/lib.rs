//! Automated disc ripping daemon.
//!
//! Watches for inserted movie discs and takes each one through scan,
//! identification, track selection, extraction, transcode, tagging, and
//! library placement.

pub mod audio;
pub mod concurrency;
pub mod drive;
pub mod extract;
pub mod finalize;
pub mod fingerprint;
pub mod identify;
pub mod job;
pub mod lookup;
pub mod pipeline;
pub mod proc;
pub mod report_server;
pub mod scan;
pub mod select;
pub mod startup;
pub mod tag;
pub mod titles;
pub mod transcode;
pub mod workspace;

pub use autorip_config as config;
pub use autorip_config::Settings;
pub use concurrency::TranscodePlan;
pub use job::{JobReport, JobState, TitleReport};
pub use lookup::{DisabledLookup, DisabledSearch, HttpCommunityClient, HttpMetadataClient};
pub use pipeline::{
    new_shared_reports, CommandExtractor, CommandScanner, CommandTagger, CommandTranscoder,
    RipError, RipPipeline, SharedReports, SystemDrive,
};
pub use report_server::{create_status_router, run_status_server, ServerError};
pub use startup::{run_startup_checks, StartupError};
pub use titles::{Classification, DiscKind, TitleCandidate};
