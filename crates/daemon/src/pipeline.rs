//! Rip job orchestration.
//!
//! One [`RipPipeline::run`] call takes a disc from detection to library
//! placement. The pipeline owns two hard guarantees: the disc is ejected
//! exactly once on every terminal path once one was detected, and the
//! scratch workspace is removed whether the job succeeds or fails.
//!
//! Extraction is serial (one drive); transcodes of separate titles overlap
//! under a semaphore sized by [`TranscodePlan`]. A title failing transcode,
//! tagging, or finalization is recorded on its own report entry while its
//! siblings continue; only a failed main feature fails the job.

use crate::audio::{classify_title_audio, AudioAnalyzer};
use crate::concurrency::TranscodePlan;
use crate::drive::{DetectedDisc, DriveError};
use crate::extract::ExtractError;
use crate::finalize::{
    atomic_move, extra_dest, main_feature_dest, movie_dir, place_cover_art,
};
use crate::fingerprint::{compute_fingerprint, scan_with_retry, FingerprintError};
use crate::identify::{
    resolve_identity, CommunityLookup, IdentifyError, IdentityCache, IdentityResult,
    ManualResolver, MetadataSearch,
};
use crate::job::{save_report, JobEvent, JobReport, TitleReport};
use crate::scan::ScanError;
use crate::select::{classify_titles, select_tracks, SelectError};
use crate::tag::TagError;
use crate::titles::{AudioTrack, Classification, DiscKind, SubtitleTrack, TitleCandidate};
use crate::transcode::{selected_track_positions, TranscodeError, TranscodeParams};
use crate::workspace::{Workspace, WorkspaceError};
use autorip_config::Settings;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{RwLock, Semaphore};
use tracing::{info, warn};

/// Error type for a rip job.
#[derive(Debug, Error)]
pub enum RipError {
    #[error("no disc detected in the drive")]
    NoDiscDetected,

    /// Layout scan failed with read errors through the whole retry budget.
    #[error("disc unreadable: {0}")]
    UnreadableDisc(String),

    /// Layout scan failed for a non-retryable reason.
    #[error("disc scan failed: {0}")]
    ScanFailed(String),

    #[error("disc identity could not be resolved")]
    IdentityUnresolved,

    #[error(transparent)]
    NoMainFeatureFound(#[from] SelectError),

    /// Another job holds the workspace for this disc.
    #[error("a job for this disc is already running")]
    JobAlreadyRunning,

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("transcode failed for title {title_index}: {reason}")]
    TranscodeFailed { title_index: u32, reason: String },

    #[error("tag write failed for title {title_index}: {reason}")]
    TagWriteFailed { title_index: u32, reason: String },

    #[error("finalization failed for title {title_index}: {reason}")]
    FinalizeFailed { title_index: u32, reason: String },

    /// Shutdown was requested; the job stopped at a stage boundary.
    #[error("job aborted before {stage}")]
    Aborted { stage: &'static str },

    #[error(transparent)]
    Drive(#[from] DriveError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Scans the disc layout. Implemented over the extraction tool's info mode.
pub trait LayoutScanner: Send + Sync {
    fn scan(&self) -> Result<Vec<TitleCandidate>, ScanError>;
}

/// Optical drive operations.
pub trait DiscDrive: Send + Sync {
    fn detect(&self) -> Result<Option<DetectedDisc>, DriveError>;
    fn eject(&self, mount_path: &Path) -> Result<(), DriveError>;
}

/// Rips titles into a directory, returning one file per requested index.
pub trait Extractor: Send + Sync {
    fn extract(
        &self,
        title_indexes: &[u32],
        output_dir: &Path,
    ) -> Result<Vec<(u32, PathBuf)>, ExtractError>;
}

/// Transcodes one extracted title.
pub trait Transcoder: Send + Sync {
    fn transcode(&self, params: &TranscodeParams) -> Result<(), TranscodeError>;
}

/// Writes track metadata into a finished container.
pub trait Tagger: Send + Sync {
    fn tag(
        &self,
        file: &Path,
        audio_tracks: &[AudioTrack],
        subtitle_tracks: &[SubtitleTrack],
    ) -> Result<(), TagError>;
}

/// Job reports visible to the status server.
pub type SharedReports = Arc<RwLock<Vec<JobReport>>>;

pub fn new_shared_reports() -> SharedReports {
    Arc::new(RwLock::new(Vec::new()))
}

/// The rip orchestrator. Collaborators are trait objects so tests can
/// substitute fakes for every external tool.
pub struct RipPipeline {
    pub settings: Settings,
    pub drive: Arc<dyn DiscDrive>,
    pub scanner: Arc<dyn LayoutScanner>,
    pub extractor: Arc<dyn Extractor>,
    pub transcoder: Arc<dyn Transcoder>,
    pub tagger: Arc<dyn Tagger>,
    pub analyzer: Arc<dyn AudioAnalyzer>,
    pub community: Arc<dyn CommunityLookup>,
    pub search: Arc<dyn MetadataSearch>,
    pub manual: Option<Arc<dyn ManualResolver>>,
    pub reports: SharedReports,
    pub abort: Arc<AtomicBool>,
}

impl RipPipeline {
    /// Runs one disc end to end.
    ///
    /// Once a disc is detected it will be ejected exactly once before this
    /// returns, success or failure. The failed-job report is persisted
    /// before the error surfaces.
    pub async fn run(&self) -> Result<JobReport, RipError> {
        let disc = self.drive.detect()?.ok_or(RipError::NoDiscDetected)?;
        info!(label = %disc.volume_label, kind = %disc.kind, "disc detected");

        let mut ejected = false;
        let result = self.run_detected(&disc, &mut ejected).await;
        self.eject_once(&disc, &mut ejected);
        result
    }

    async fn run_detected(
        &self,
        disc: &DetectedDisc,
        ejected: &mut bool,
    ) -> Result<JobReport, RipError> {
        let titles = self.scan_layout().await?;

        let fingerprint = compute_fingerprint(&disc.volume_label, disc.kind, &titles);
        info!(fingerprint = %fingerprint, titles = titles.len(), "disc layout scanned");

        let mut report = JobReport::new(&fingerprint, &disc.volume_label);
        let workspace = match Workspace::acquire(&self.settings.library.temp_root, &fingerprint) {
            Ok(ws) => ws,
            Err(WorkspaceError::AlreadyRunning) => return Err(RipError::JobAlreadyRunning),
            Err(WorkspaceError::Io(e)) => return Err(RipError::Io(e)),
        };

        let outcome = self
            .run_job(disc, &fingerprint, titles, &workspace, &mut report, ejected)
            .await;

        if let Err(e) = &outcome {
            report.fail(&e.to_string());
        }

        match workspace.cleanup() {
            Ok(()) => advance(&mut report, JobEvent::Cleaned),
            Err(e) => warn!(error = %e, "failed to remove workspace"),
        }

        if let Err(e) = save_report(&report, &self.settings.library.state_dir) {
            warn!(error = %e, "failed to persist job report");
        }
        self.reports.write().await.push(report.clone());

        outcome.map(|_| report)
    }

    async fn scan_layout(&self) -> Result<Vec<TitleCandidate>, RipError> {
        let scanner = self.scanner.clone();
        let attempts = self.settings.retry.scan_attempts;
        let backoff = Duration::from_secs(self.settings.retry.backoff_base_secs);

        let result =
            tokio::task::spawn_blocking(move || scan_with_retry(|| scanner.scan(), attempts, backoff))
                .await
                .map_err(|e| RipError::ScanFailed(format!("scan task panicked: {}", e)))?;

        result.map_err(|e| match e {
            FingerprintError::Unreadable { .. } => RipError::UnreadableDisc(e.to_string()),
            FingerprintError::Scan(inner) => RipError::ScanFailed(inner.to_string()),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_job(
        &self,
        disc: &DetectedDisc,
        fingerprint: &str,
        mut titles: Vec<TitleCandidate>,
        workspace: &Workspace,
        report: &mut JobReport,
        ejected: &mut bool,
    ) -> Result<(), RipError> {
        let tuning = &self.settings.tuning;

        self.check_abort("identification")?;
        let identity = self
            .resolve_identity_blocking(fingerprint, &disc.volume_label, &titles)
            .await?;
        report.movie_title = Some(identity.title.clone());
        report.movie_year = identity.year;
        advance(report, JobEvent::IdentityResolved);

        self.check_abort("track selection")?;
        let main_index = classify_titles(&mut titles, identity.runtime_secs, tuning)?;
        for title in titles.iter_mut().filter(|t| is_kept(t)) {
            select_tracks(title, &self.settings.tracks);
        }
        advance(report, JobEvent::TracksChosen);

        self.check_abort("extraction")?;
        advance(report, JobEvent::ExtractionStarted);
        let kept_indexes: Vec<u32> = titles.iter().filter(|t| is_kept(t)).map(|t| t.index).collect();
        let extracted = self.extract_titles(&kept_indexes, workspace.dir()).await?;
        advance(report, JobEvent::ExtractionFinished);

        // Everything we need is on local storage now; free the drive before
        // the slow stages.
        self.eject_once(disc, ejected);

        titles = self.analyze_audio(titles, &extracted).await;
        for title in titles.iter_mut().filter(|t| is_kept(t)) {
            select_tracks(title, &self.settings.tracks);
        }

        self.check_abort("transcoding")?;
        let out_dir = workspace.output_dir()?;
        let outputs = self
            .transcode_titles(disc.kind, &titles, &extracted, &out_dir)
            .await;
        let mut failures: BTreeMap<u32, RipError> = BTreeMap::new();
        let mut ok_outputs: BTreeMap<u32, PathBuf> = BTreeMap::new();
        for (index, result) in outputs {
            match result {
                Ok(path) => {
                    ok_outputs.insert(index, path);
                }
                Err(reason) => {
                    failures.insert(
                        index,
                        RipError::TranscodeFailed {
                            title_index: index,
                            reason,
                        },
                    );
                }
            }
        }
        advance(report, JobEvent::TranscodingFinished);

        self.check_abort("tagging")?;
        for title in titles.iter().filter(|t| is_kept(t)) {
            let Some(path) = ok_outputs.get(&title.index).cloned() else {
                continue;
            };
            if let Err(reason) = self.tag_title(title, &path).await {
                ok_outputs.remove(&title.index);
                failures.insert(
                    title.index,
                    RipError::TagWriteFailed {
                        title_index: title.index,
                        reason,
                    },
                );
            }
        }
        advance(report, JobEvent::TaggingFinished);

        self.check_abort("finalization")?;
        let library_dir = movie_dir(
            &self.settings.library.output_root,
            &identity.title,
            identity.year,
        );
        let mut final_paths: BTreeMap<u32, PathBuf> = BTreeMap::new();
        for title in titles.iter().filter(|t| is_kept(t)) {
            let Some(path) = ok_outputs.get(&title.index).cloned() else {
                continue;
            };
            let dest = if title.index == main_index {
                main_feature_dest(&library_dir, &identity.title, identity.year)
            } else {
                extra_dest(&library_dir, title.name.as_deref().unwrap_or(""), title.index)
            };
            match atomic_move(&path, &dest) {
                Ok(()) => {
                    info!(title = title.index, dest = %dest.display(), "title placed in library");
                    final_paths.insert(title.index, dest);
                }
                Err(e) => {
                    failures.insert(
                        title.index,
                        RipError::FinalizeFailed {
                            title_index: title.index,
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }
        self.place_cover_art(&identity, &library_dir).await;
        advance(report, JobEvent::FinalizationFinished);

        report.titles = titles
            .iter()
            .map(|t| TitleReport {
                title_index: t.index,
                classification: t.classification,
                final_path: final_paths.get(&t.index).cloned(),
                error: failures.get(&t.index).map(|e| e.to_string()),
            })
            .collect();

        if final_paths.contains_key(&main_index) {
            Ok(())
        } else {
            Err(failures.remove(&main_index).unwrap_or_else(|| {
                RipError::ExtractionFailed("main feature produced no output".to_string())
            }))
        }
    }

    /// The lookup clients block on the network, so the whole resolution
    /// chain runs off the async runtime.
    async fn resolve_identity_blocking(
        &self,
        fingerprint: &str,
        volume_label: &str,
        titles: &[TitleCandidate],
    ) -> Result<IdentityResult, RipError> {
        let cache = IdentityCache::new(&self.settings.library.state_dir);
        let community = self.community.clone();
        let search = self.search.clone();
        let manual = self.manual.clone();
        let fingerprint = fingerprint.to_string();
        let volume_label = volume_label.to_string();
        let longest_secs = titles.iter().map(|t| t.duration_secs).max();
        let tuning = self.settings.tuning.clone();

        tokio::task::spawn_blocking(move || {
            resolve_identity(
                &cache,
                community.as_ref(),
                search.as_ref(),
                manual.as_deref(),
                &fingerprint,
                &volume_label,
                longest_secs,
                &tuning,
            )
        })
        .await
        .map_err(|e| {
            RipError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("identification task panicked: {}", e),
            ))
        })?
        .map_err(|e| match e {
            IdentifyError::Unresolved => RipError::IdentityUnresolved,
            IdentifyError::Cache(e) => RipError::Io(e),
        })
    }

    async fn extract_titles(
        &self,
        indexes: &[u32],
        output_dir: &Path,
    ) -> Result<BTreeMap<u32, PathBuf>, RipError> {
        let extractor = self.extractor.clone();
        let indexes = indexes.to_vec();
        let output_dir = output_dir.to_path_buf();

        let files = tokio::task::spawn_blocking(move || extractor.extract(&indexes, &output_dir))
            .await
            .map_err(|e| RipError::ExtractionFailed(format!("extraction task panicked: {}", e)))?
            .map_err(|e| RipError::ExtractionFailed(e.to_string()))?;

        Ok(files.into_iter().collect())
    }

    /// Runs dynamic-range analysis over every kept title's extracted file.
    /// Analysis trouble downgrades to a warning; name-derived flags stand.
    async fn analyze_audio(
        &self,
        mut titles: Vec<TitleCandidate>,
        extracted: &BTreeMap<u32, PathBuf>,
    ) -> Vec<TitleCandidate> {
        let analyzer = self.analyzer.clone();
        let threshold = self.settings.tuning.commentary_dynamic_range_db;
        let extracted = extracted.clone();
        let fallback = titles.clone();

        let joined = tokio::task::spawn_blocking(move || {
            for title in titles.iter_mut().filter(|t| is_kept(t)) {
                let Some(file) = extracted.get(&title.index) else {
                    continue;
                };
                if let Err(e) = classify_title_audio(title, file, analyzer.as_ref(), threshold) {
                    warn!(title = title.index, error = %e, "audio analysis failed");
                }
            }
            titles
        })
        .await;

        match joined {
            Ok(titles) => titles,
            Err(e) => {
                warn!(error = %e, "audio analysis task panicked, keeping scanned tracks");
                fallback
            }
        }
    }

    async fn transcode_titles(
        &self,
        kind: DiscKind,
        titles: &[TitleCandidate],
        extracted: &BTreeMap<u32, PathBuf>,
        out_dir: &Path,
    ) -> BTreeMap<u32, Result<PathBuf, String>> {
        let plan = TranscodePlan::derive(&self.settings.transcode);
        info!(
            max_concurrent = plan.max_concurrent,
            cores = plan.total_cores,
            "starting transcodes"
        );
        let semaphore = Arc::new(Semaphore::new(plan.max_concurrent as usize));

        let mut handles = Vec::new();
        for title in titles.iter().filter(|t| is_kept(t)) {
            let Some(input) = extracted.get(&title.index) else {
                continue;
            };
            let (audio_positions, subtitle_positions) = selected_track_positions(title);
            let params = TranscodeParams {
                input_path: input.clone(),
                output_path: out_dir.join(format!("title_{:02}.mkv", title.index)),
                preset: match kind {
                    DiscKind::Dvd => self.settings.presets.dvd.clone(),
                    DiscKind::BluRay => self.settings.presets.bluray.clone(),
                },
                disc_kind: kind,
                audio_positions,
                subtitle_positions,
            };

            let transcoder = self.transcoder.clone();
            let semaphore = semaphore.clone();
            let index = title.index;
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore is never closed");
                let output_path = params.output_path.clone();
                let result =
                    tokio::task::spawn_blocking(move || transcoder.transcode(&params)).await;
                let result = match result {
                    Ok(Ok(())) => Ok(output_path),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(e) => Err(format!("transcode task panicked: {}", e)),
                };
                (index, result)
            }));
        }

        let mut results = BTreeMap::new();
        for handle in handles {
            match handle.await {
                Ok((index, result)) => {
                    results.insert(index, result);
                }
                Err(e) => warn!(error = %e, "failed to join transcode task"),
            }
        }
        results
    }

    async fn tag_title(&self, title: &TitleCandidate, path: &Path) -> Result<(), String> {
        let audio: Vec<AudioTrack> = title
            .audio_tracks
            .iter()
            .filter(|t| t.selected)
            .cloned()
            .collect();
        let subtitles: Vec<SubtitleTrack> = title
            .subtitle_tracks
            .iter()
            .filter(|t| t.selected)
            .cloned()
            .collect();

        let tagger = self.tagger.clone();
        let path = path.to_path_buf();
        match tokio::task::spawn_blocking(move || tagger.tag(&path, &audio, &subtitles)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("tag task panicked: {}", e)),
        }
    }

    /// Cover art is decoration; any failure here is a warning only.
    async fn place_cover_art(&self, identity: &IdentityResult, library_dir: &Path) {
        let Some(external_id) = identity.external_id.clone() else {
            return;
        };
        let search = self.search.clone();
        let library_dir = library_dir.to_path_buf();

        let joined = tokio::task::spawn_blocking(move || {
            match search.fetch_cover_art(&external_id) {
                Ok(Some(bytes)) => {
                    if let Err(e) = place_cover_art(&library_dir, &bytes) {
                        warn!(error = %e, "failed to write cover art");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "cover art fetch failed"),
            }
        })
        .await;

        if let Err(e) = joined {
            warn!(error = %e, "cover art task panicked");
        }
    }

    fn eject_once(&self, disc: &DetectedDisc, ejected: &mut bool) {
        if *ejected {
            return;
        }
        *ejected = true;
        match self.drive.eject(&disc.mount_path) {
            Ok(()) => info!(mount = %disc.mount_path.display(), "disc ejected"),
            Err(e) => warn!(error = %e, "failed to eject disc"),
        }
    }

    fn check_abort(&self, stage: &'static str) -> Result<(), RipError> {
        if self.abort.load(Ordering::Relaxed) {
            Err(RipError::Aborted { stage })
        } else {
            Ok(())
        }
    }
}

fn is_kept(title: &TitleCandidate) -> bool {
    matches!(
        title.classification,
        Classification::MainFeature | Classification::Extra
    )
}

fn advance(report: &mut JobReport, event: JobEvent) {
    if let Err(e) = report.apply(event) {
        warn!(error = %e, "job state machine rejected event");
    }
}

/// [`LayoutScanner`] over the extraction tool's robot info mode.
pub struct CommandScanner {
    pub tool: String,
    pub disc_spec: String,
    pub timeout: Duration,
}

impl LayoutScanner for CommandScanner {
    fn scan(&self) -> Result<Vec<TitleCandidate>, ScanError> {
        crate::scan::scan_disc(&self.tool, &self.disc_spec, self.timeout)
    }
}

/// [`DiscDrive`] over the mounted-volumes directory and the eject command.
pub struct SystemDrive {
    pub volumes_root: PathBuf,
    pub eject_tool: String,
}

impl DiscDrive for SystemDrive {
    fn detect(&self) -> Result<Option<DetectedDisc>, DriveError> {
        crate::drive::detect_disc_in(&self.volumes_root)
    }

    fn eject(&self, mount_path: &Path) -> Result<(), DriveError> {
        crate::drive::eject_disc(&self.eject_tool, mount_path)
    }
}

/// [`Extractor`] over the rip command with read-error retries. Shares the
/// pipeline's abort flag so shutdown kills an in-flight rip.
pub struct CommandExtractor {
    pub tool: String,
    pub disc_spec: String,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub timeout: Duration,
    pub abort: Arc<AtomicBool>,
}

impl Extractor for CommandExtractor {
    fn extract(
        &self,
        title_indexes: &[u32],
        output_dir: &Path,
    ) -> Result<Vec<(u32, PathBuf)>, ExtractError> {
        crate::extract::run_extraction(
            &self.tool,
            &self.disc_spec,
            title_indexes,
            output_dir,
            self.max_attempts,
            self.backoff_base,
            self.timeout,
            &self.abort,
        )
    }
}

/// [`Transcoder`] over the transcode tool. Shares the pipeline's abort
/// flag so shutdown kills in-flight encodes.
pub struct CommandTranscoder {
    pub tool: String,
    pub timeout: Duration,
    pub abort: Arc<AtomicBool>,
}

impl Transcoder for CommandTranscoder {
    fn transcode(&self, params: &TranscodeParams) -> Result<(), TranscodeError> {
        crate::transcode::run_transcode(&self.tool, params, self.timeout, &self.abort)
    }
}

/// [`Tagger`] over the container property editor.
pub struct CommandTagger {
    pub tool: String,
    pub timeout: Duration,
}

impl Tagger for CommandTagger {
    fn tag(
        &self,
        file: &Path,
        audio_tracks: &[AudioTrack],
        subtitle_tracks: &[SubtitleTrack],
    ) -> Result<(), TagError> {
        crate::tag::run_tagging(
            &self.tool,
            file,
            audio_tracks,
            subtitle_tracks,
            self.timeout,
        )
    }
}
