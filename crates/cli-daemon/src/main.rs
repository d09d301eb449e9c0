//! Command line entry point for the rip daemon.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use autorip::audio::FfmpegAnalyzer;
use autorip::config::ConfigError;
use autorip::identify::{
    CommunityLookup, IdentityResult, IdentitySource, LookupError, ManualResolver, MetadataSearch,
};
use autorip::lookup::{DisabledLookup, DisabledSearch, HttpCommunityClient, HttpMetadataClient};
use autorip::report_server::run_status_server;
use autorip::{
    new_shared_reports, run_startup_checks, CommandExtractor, CommandScanner, CommandTagger,
    CommandTranscoder, RipError, RipPipeline, Settings, SystemDrive,
};

#[derive(Parser, Debug)]
#[command(
    name = "autorip",
    about = "Rips the inserted movie disc into the media library"
)]
struct Args {
    /// Path to the configuration file
    #[arg(long, default_value = "/etc/autorip/config.toml")]
    config: PathBuf,

    /// Disc specifier passed to the extraction tool
    #[arg(long, default_value = "disc:0")]
    disc: String,

    /// Verify the external tools and exit
    #[arg(long)]
    check: bool,

    /// Skip the startup tool checks
    #[arg(long)]
    skip_checks: bool,

    /// Do not start the status HTTP server
    #[arg(long)]
    no_server: bool,

    /// Never prompt for manual identification
    #[arg(long)]
    unattended: bool,
}

/// Asks the operator on stdin when every automatic identification stage
/// comes up empty. An empty title declines the disc.
struct PromptResolver;

impl ManualResolver for PromptResolver {
    fn resolve(&self, volume_label: &str) -> Result<Option<IdentityResult>, LookupError> {
        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();

        print!(
            "Disc '{}' could not be identified. Title (empty to skip): ",
            volume_label
        );
        io::stdout()
            .flush()
            .map_err(|e| LookupError(e.to_string()))?;
        let title = match lines.next() {
            Some(Ok(line)) => line.trim().to_string(),
            _ => return Ok(None),
        };
        if title.is_empty() {
            return Ok(None);
        }

        print!("Year (optional): ");
        io::stdout()
            .flush()
            .map_err(|e| LookupError(e.to_string()))?;
        let year = match lines.next() {
            Some(Ok(line)) => line.trim().parse::<u16>().ok(),
            _ => None,
        };

        Ok(Some(IdentityResult {
            title,
            year,
            external_id: None,
            runtime_secs: None,
            source: IdentitySource::Manual,
        }))
    }
}

/// A missing config file is not an error; the daemon runs on defaults plus
/// environment overrides.
fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    if path.exists() {
        Settings::load(path)
    } else {
        warn!(path = %path.display(), "config file not found, using defaults");
        let mut settings = Settings::default();
        settings.apply_env_overrides();
        Ok(settings)
    }
}

fn build_pipeline(settings: Settings, args: &Args) -> Result<RipPipeline, LookupError> {
    let network_timeout = Duration::from_secs(settings.timeouts.network_secs);
    // Shared with the long-running adapters so ctrl-c kills in-flight
    // rips and encodes, not just the next stage.
    let abort = Arc::new(AtomicBool::new(false));

    let community: Arc<dyn CommunityLookup> = match &settings.services.community_url {
        Some(url) => Arc::new(HttpCommunityClient::new(url, network_timeout)?),
        None => Arc::new(DisabledLookup),
    };
    let search: Arc<dyn MetadataSearch> = match &settings.services.metadata_url {
        Some(url) => Arc::new(HttpMetadataClient::new(url, network_timeout)?),
        None => Arc::new(DisabledSearch),
    };
    let manual: Option<Arc<dyn ManualResolver>> = if args.unattended {
        None
    } else {
        Some(Arc::new(PromptResolver))
    };

    Ok(RipPipeline {
        drive: Arc::new(SystemDrive {
            volumes_root: settings.library.volumes_root.clone(),
            eject_tool: settings.tools.eject.clone(),
        }),
        scanner: Arc::new(CommandScanner {
            tool: settings.tools.extractor.clone(),
            disc_spec: args.disc.clone(),
            timeout: Duration::from_secs(settings.timeouts.scan_secs),
        }),
        extractor: Arc::new(CommandExtractor {
            tool: settings.tools.extractor.clone(),
            disc_spec: args.disc.clone(),
            max_attempts: settings.retry.extract_attempts,
            backoff_base: Duration::from_secs(settings.retry.backoff_base_secs),
            timeout: Duration::from_secs(settings.timeouts.extract_secs),
            abort: abort.clone(),
        }),
        transcoder: Arc::new(CommandTranscoder {
            tool: settings.tools.transcoder.clone(),
            timeout: Duration::from_secs(settings.timeouts.transcode_secs),
            abort: abort.clone(),
        }),
        tagger: Arc::new(CommandTagger {
            tool: settings.tools.tagger.clone(),
            timeout: Duration::from_secs(settings.timeouts.tag_secs),
        }),
        analyzer: Arc::new(FfmpegAnalyzer {
            ffmpeg: settings.tools.ffmpeg.clone(),
            sample_secs: settings.tuning.audio_sample_secs,
            sample_offset_secs: settings.tuning.audio_sample_offset_secs,
            timeout: Duration::from_secs(settings.timeouts.analyze_secs),
        }),
        community,
        search,
        manual,
        reports: new_shared_reports(),
        abort,
        settings,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let settings = match load_settings(&args.config) {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    if args.check {
        return match run_startup_checks(&settings.tools) {
            Ok(()) => {
                println!("all required tools available");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}", e);
                ExitCode::FAILURE
            }
        };
    }

    if !args.skip_checks {
        if let Err(e) = run_startup_checks(&settings.tools) {
            error!(error = %e, "startup checks failed");
            return ExitCode::FAILURE;
        }
    }

    let pipeline = match build_pipeline(settings, &args) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!(error = %e, "failed to set up lookup services");
            return ExitCode::FAILURE;
        }
    };

    let abort = pipeline.abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("shutdown requested, terminating in-flight work");
            abort.store(true, Ordering::SeqCst);
        }
    });

    if !args.no_server {
        let reports = pipeline.reports.clone();
        tokio::spawn(async move {
            if let Err(e) = run_status_server(reports).await {
                warn!(error = %e, "status server stopped");
            }
        });
    }

    match pipeline.run().await {
        Ok(report) => {
            info!(
                title = report.movie_title.as_deref().unwrap_or("unknown"),
                "rip complete"
            );
            for title in &report.titles {
                match (&title.final_path, &title.error) {
                    (Some(path), _) => {
                        println!("title {:02}: {}", title.title_index, path.display())
                    }
                    (None, Some(err)) => {
                        println!("title {:02}: failed ({})", title.title_index, err)
                    }
                    (None, None) => println!("title {:02}: skipped", title.title_index),
                }
            }
            ExitCode::SUCCESS
        }
        Err(RipError::NoDiscDetected) => {
            info!("no disc in the drive, nothing to do");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "rip failed");
            ExitCode::FAILURE
        }
    }
}
