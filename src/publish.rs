//! Export pipeline: capture the slip, then walk the publish ladder from the
//! clipboard down to a landing page or a plain download.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::capability::{check_capabilities, BrowserFamily, CapabilityProfile, CapabilityReport, EnvironmentProbe, PublishRoute};
use crate::config::ExportConfig;
use crate::error::{SlipError, SlipResult, TAINT_ADVICE};
use crate::format::escape_html;
use crate::raster::{ExportArtifact, Rasterizer};
use crate::resource::{DeferredRelease, LoadAck, ResourceHandle};
use crate::slip::SlipRegion;

pub const PNG_MIME: &str = "image/png";

/// Primary clipboard: writes an image item
#[async_trait]
pub trait ImageClipboard: Send + Sync {
    /// Fails with `ClipboardUnsupported` or `ClipboardDenied`
    async fn write_image(&self, mime: &str, bytes: &[u8]) -> SlipResult<()>;
}

/// An image decoded from the captured bytes, ready to be placed in a container
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl LoadedImage {
    pub fn decode(png: &[u8]) -> SlipResult<Self> {
        let image = image::load_from_memory_with_format(png, image::ImageFormat::Png)
            .map_err(|e| SlipError::rasterization_with_source("captured image does not decode", e))?;
        Ok(Self {
            png: png.to_vec(),
            width: image.width(),
            height: image.height(),
        })
    }
}

/// Off-screen editable container holding one image
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(pub String);

/// Secondary clipboard: insert, select, copy command
#[async_trait]
pub trait CopyCommand: Send + Sync {
    async fn insert_container(&self, image: &LoadedImage) -> SlipResult<ContainerId>;
    async fn select_contents(&self, container: &ContainerId) -> SlipResult<()>;
    /// `Ok(false)` when the command ran but reported failure
    async fn exec_copy(&self) -> SlipResult<bool>;
    async fn clear_selection(&self);
    async fn remove_container(&self, container: ContainerId);
}

/// Manual-copy page embedding the staged image
#[derive(Debug, Clone)]
pub struct LandingPage {
    pub title: String,
    pub html: String,
    pub image_url: String,
    /// Directory of the staged image; the page may be written next to it
    pub dir: PathBuf,
}

/// Where fallback output goes
#[async_trait]
pub trait DisplaySurface: Send + Sync {
    /// Save the staged file under `file_name`, returning the final location
    async fn save_download(&self, staged: &Path, file_name: &str) -> SlipResult<PathBuf>;

    /// Show a landing page. An error means the surface could not be opened
    /// (the popup was blocked). Call `ack.loaded()` once the image is loaded.
    async fn open_landing_page(&self, page: &LandingPage, ack: LoadAck) -> SlipResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStrategy {
    PrimaryClipboard,
    SecondaryClipboard,
    LandingPage,
    Download,
}

impl PublishStrategy {
    pub fn is_clipboard(&self) -> bool {
        matches!(self, PublishStrategy::PrimaryClipboard | PublishStrategy::SecondaryClipboard)
    }

    /// Ordered strategies for a route. Download always closes the ladder.
    pub fn ladder(route: &PublishRoute) -> Vec<PublishStrategy> {
        use PublishStrategy::*;
        match route {
            PublishRoute::ClipboardCapable { landing_hint: Some(_) } => {
                vec![PrimaryClipboard, SecondaryClipboard, LandingPage, Download]
            }
            PublishRoute::ClipboardCapable { landing_hint: None } => {
                vec![PrimaryClipboard, SecondaryClipboard, Download]
            }
            PublishRoute::LandingPagePreferred { .. } => vec![LandingPage, Download],
            PublishRoute::DownloadOnly => vec![Download],
        }
    }
}

impl fmt::Display for PublishStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PublishStrategy::PrimaryClipboard => "primary clipboard",
            PublishStrategy::SecondaryClipboard => "secondary clipboard",
            PublishStrategy::LandingPage => "landing page",
            PublishStrategy::Download => "download",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    Clipboard,
    Downloaded { location: PathBuf },
    LandingPage { location: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", content = "detail", rename_all = "snake_case")]
pub enum StrategyResult {
    Success(Delivery),
    Unsupported(String),
    Denied(String),
    Failed(String),
}

impl fmt::Display for StrategyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyResult::Success(_) => f.write_str("success"),
            StrategyResult::Unsupported(reason) => write!(f, "unsupported: {}", reason),
            StrategyResult::Denied(reason) => write!(f, "denied: {}", reason),
            StrategyResult::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// States an export passes through, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportState {
    Idle,
    Capturing,
    FailedTaint,
    FailedCapture,
    Captured,
    PublishClipboard,
    Published,
    ClipboardUnsupported,
    ClipboardDenied,
    PublishFallback,
    Downloaded,
    LandingPageShown,
    FailedPublish,
}

#[derive(Debug)]
pub enum ExportOutcome {
    Published { mechanism: PublishStrategy },
    Downloaded { location: PathBuf },
    LandingPageShown { location: String, hint: String },
    Failed { error: SlipError },
}

impl ExportOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, ExportOutcome::Failed { .. })
    }

    pub fn status_message(&self) -> String {
        match self {
            ExportOutcome::Published {
                mechanism: PublishStrategy::SecondaryClipboard,
            } => "✅ Image copied to clipboard via fallback!".to_string(),
            ExportOutcome::Published { .. } => "✅ Image copied to clipboard! You can now paste it.".to_string(),
            ExportOutcome::Downloaded { location } => {
                format!("📁 Image saved to {}", location.display())
            }
            ExportOutcome::LandingPageShown { location, hint } => {
                format!("🪟 Opened the image at {}. {}", location, hint)
            }
            ExportOutcome::Failed { error } => error.user_message(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyAttempt {
    pub strategy: PublishStrategy,
    pub result: StrategyResult,
}

/// Everything one export did
#[derive(Debug)]
pub struct ExportReport {
    pub outcome: ExportOutcome,
    pub states: Vec<ExportState>,
    pub attempts: Vec<StrategyAttempt>,
    pub profile: CapabilityProfile,
}

impl ExportReport {
    pub fn attempted(&self, strategy: PublishStrategy) -> bool {
        self.attempts.iter().any(|a| a.strategy == strategy)
    }
}

/// Result of the dry-run copy diagnostic
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticReport {
    pub ok: bool,
    pub method: Option<PublishStrategy>,
    pub error: Option<String>,
}

impl DiagnosticReport {
    pub fn status_line(&self) -> String {
        match (self.ok, self.method, &self.error) {
            (true, Some(method), _) => format!("✅ Diagnostic: copied via {}", method),
            (false, Some(PublishStrategy::Download), _) => {
                "❌ Diagnostic: copy failed, used the download fallback".to_string()
            }
            (_, _, Some(error)) => format!("❌ Diagnostic error: {}", error),
            _ => "❌ Diagnostic: nothing succeeded".to_string(),
        }
    }
}

/// Clears the in-flight flag when the export ends, however it ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Bookkeeping for one export run
#[derive(Default)]
struct Run {
    states: Vec<ExportState>,
    attempts: Vec<StrategyAttempt>,
    staged: Option<ResourceHandle>,
}

impl Run {
    fn enter(&mut self, state: ExportState) {
        debug!("Export state -> {:?}", state);
        self.states.push(state);
    }

    fn finish(self, outcome: ExportOutcome, profile: CapabilityProfile) -> ExportReport {
        ExportReport {
            outcome,
            states: self.states,
            attempts: self.attempts,
            profile,
        }
    }
}

pub struct Publisher {
    rasterizer: Rasterizer,
    probe: Arc<dyn EnvironmentProbe>,
    surface: Arc<dyn DisplaySurface>,
    clipboard: Option<Arc<dyn ImageClipboard>>,
    copy_command: Option<Arc<dyn CopyCommand>>,
    config: ExportConfig,
    in_flight: AtomicBool,
    pending: Mutex<Vec<DeferredRelease>>,
}

impl Publisher {
    pub fn new(
        rasterizer: Rasterizer,
        probe: Arc<dyn EnvironmentProbe>,
        surface: Arc<dyn DisplaySurface>,
        config: ExportConfig,
    ) -> Self {
        Self {
            rasterizer,
            probe,
            surface,
            clipboard: None,
            copy_command: None,
            config,
            in_flight: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn with_clipboard(mut self, clipboard: Arc<dyn ImageClipboard>) -> Self {
        self.clipboard = Some(clipboard);
        self
    }

    pub fn with_copy_command(mut self, copy_command: Arc<dyn CopyCommand>) -> Self {
        self.copy_command = Some(copy_command);
        self
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Fresh profile, with the renderer this publisher actually holds
    pub async fn profile(&self) -> CapabilityProfile {
        let mut profile = self.probe.probe().await;
        profile.primary_renderer = self.rasterizer.has_primary();
        profile
    }

    /// On-demand capability check; captures and publishes nothing
    pub async fn check(&self) -> CapabilityReport {
        let report = check_capabilities(&self.profile().await);
        info!("📋 Clipboard status: {}", report.status_line);
        report
    }

    /// The copy action: capture, then clipboard, then manual fallback
    pub async fn export(&self, region: &SlipRegion) -> SlipResult<ExportReport> {
        let _in_flight = self.begin()?;
        self.settle().await;

        let profile = self.profile().await;
        let route = profile.route();
        let mut run = Run::default();
        run.enter(ExportState::Idle);

        let artifact = match self.capture(region, &mut run).await {
            Ok(artifact) => artifact,
            Err(error) => return Ok(run.finish(ExportOutcome::Failed { error }, profile)),
        };

        let hint = match &route {
            PublishRoute::ClipboardCapable { landing_hint } => landing_hint.clone(),
            PublishRoute::LandingPagePreferred { hint } => Some(hint.clone()),
            PublishRoute::DownloadOnly => None,
        };
        if !profile.clipboard_ready() {
            info!("Clipboard not fully supported, using fallback");
        }

        let outcome = self
            .walk_ladder(&PublishStrategy::ladder(&route), &artifact, &profile, hint.as_deref(), &mut run)
            .await;
        info!("{}", outcome.status_message());
        Ok(run.finish(outcome, profile))
    }

    /// The Export PNG action: capture and save, no clipboard
    pub async fn export_png(&self, region: &SlipRegion) -> SlipResult<ExportReport> {
        let _in_flight = self.begin()?;
        self.settle().await;

        let profile = self.profile().await;
        let mut run = Run::default();
        run.enter(ExportState::Idle);

        let artifact = match self.capture(region, &mut run).await {
            Ok(artifact) => artifact,
            Err(error) => return Ok(run.finish(ExportOutcome::Failed { error }, profile)),
        };

        let outcome = self
            .walk_ladder(&[PublishStrategy::Download], &artifact, &profile, None, &mut run)
            .await;
        Ok(run.finish(outcome, profile))
    }

    /// Full dry run reporting which mechanism worked. Ignores the secure
    /// context guard so each mechanism is exercised directly.
    pub async fn run_copy_diagnostic(&self, region: &SlipRegion) -> SlipResult<DiagnosticReport> {
        let _in_flight = self.begin()?;
        info!("🩺 Running copy diagnostic...");

        let profile = self.profile().await;
        let mut run = Run::default();

        let artifact = match self.capture(region, &mut run).await {
            Ok(artifact) => artifact,
            Err(error) => {
                error!("Copy diagnostic failed: {}", error);
                return Ok(DiagnosticReport {
                    ok: false,
                    method: None,
                    error: Some(error.to_string()),
                });
            }
        };

        let mut clipboard_rungs = Vec::new();
        if profile.clipboard_write && profile.image_clipboard_item {
            clipboard_rungs.push(PublishStrategy::PrimaryClipboard);
        }
        clipboard_rungs.push(PublishStrategy::SecondaryClipboard);

        for strategy in clipboard_rungs {
            let result = self.attempt(strategy, &artifact, &profile, None, &mut run).await;
            if matches!(result, StrategyResult::Success(_)) {
                let report = DiagnosticReport {
                    ok: true,
                    method: Some(strategy),
                    error: None,
                };
                info!("{}", report.status_line());
                return Ok(report);
            }
            warn!("Diagnostic {} did not copy: {}", strategy, result);
        }

        let result = self
            .attempt(PublishStrategy::Download, &artifact, &profile, None, &mut run)
            .await;
        let report = match result {
            StrategyResult::Success(_) => DiagnosticReport {
                ok: false,
                method: Some(PublishStrategy::Download),
                error: None,
            },
            other => DiagnosticReport {
                ok: false,
                method: None,
                error: Some(other.to_string()),
            },
        };
        info!("{}", report.status_line());
        Ok(report)
    }

    /// Wait for every landing page resource still held, returning how many
    pub async fn finish_pending(&self) -> usize {
        let pending: Vec<DeferredRelease> = {
            let mut guard = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        let count = pending.len();
        for release in pending {
            release.wait().await;
        }
        count
    }

    pub fn pending_releases(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    fn begin(&self) -> SlipResult<InFlight<'_>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("⏳ Export requested while another is running");
            return Err(SlipError::ExportInProgress);
        }
        Ok(InFlight(&self.in_flight))
    }

    async fn settle(&self) {
        let delay = self.config.settle_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    async fn capture(&self, region: &SlipRegion, run: &mut Run) -> SlipResult<ExportArtifact> {
        run.enter(ExportState::Capturing);
        match self.rasterizer.rasterize(region, self.config.scale_multiplier).await {
            Ok(artifact) => {
                run.enter(ExportState::Captured);
                debug!("Generated image, {} bytes", artifact.png.len());
                Ok(artifact)
            }
            Err(error) => {
                let state = match error {
                    SlipError::RasterizationTaint { .. } => {
                        error!("❌ {}", TAINT_ADVICE);
                        ExportState::FailedTaint
                    }
                    _ => {
                        error!("❌ Image generation failed: {}", error);
                        ExportState::FailedCapture
                    }
                };
                run.enter(state);
                Err(error)
            }
        }
    }

    async fn walk_ladder(
        &self,
        ladder: &[PublishStrategy],
        artifact: &ExportArtifact,
        profile: &CapabilityProfile,
        hint: Option<&str>,
        run: &mut Run,
    ) -> ExportOutcome {
        let mut in_fallback = false;

        for (index, &strategy) in ladder.iter().enumerate() {
            if strategy.is_clipboard() && index == 0 {
                run.enter(ExportState::PublishClipboard);
            }
            if !strategy.is_clipboard() && !in_fallback {
                run.enter(ExportState::PublishFallback);
                in_fallback = true;
            }

            let result = self.attempt(strategy, artifact, profile, hint, run).await;
            match result {
                StrategyResult::Success(Delivery::Clipboard) => {
                    run.enter(ExportState::Published);
                    return ExportOutcome::Published { mechanism: strategy };
                }
                StrategyResult::Success(Delivery::Downloaded { location }) => {
                    run.enter(ExportState::Downloaded);
                    return ExportOutcome::Downloaded { location };
                }
                StrategyResult::Success(Delivery::LandingPage { location }) => {
                    run.enter(ExportState::LandingPageShown);
                    return ExportOutcome::LandingPageShown {
                        location,
                        hint: hint.unwrap_or_default().to_string(),
                    };
                }
                StrategyResult::Unsupported(_) if strategy == PublishStrategy::PrimaryClipboard => {
                    run.enter(ExportState::ClipboardUnsupported);
                }
                StrategyResult::Denied(_) if strategy == PublishStrategy::PrimaryClipboard => {
                    run.enter(ExportState::ClipboardDenied);
                }
                _ => {}
            }
        }

        run.enter(ExportState::FailedPublish);
        let attempts = run
            .attempts
            .iter()
            .map(|a| format!("{}: {}", a.strategy, a.result))
            .collect();
        ExportOutcome::Failed {
            error: SlipError::PublishFailure { attempts },
        }
    }

    /// Run one rung and record it
    async fn attempt(
        &self,
        strategy: PublishStrategy,
        artifact: &ExportArtifact,
        profile: &CapabilityProfile,
        hint: Option<&str>,
        run: &mut Run,
    ) -> StrategyResult {
        let result = match strategy {
            PublishStrategy::PrimaryClipboard => self.primary_clipboard(artifact).await,
            PublishStrategy::SecondaryClipboard => self.secondary_clipboard(artifact).await,
            PublishStrategy::LandingPage => self.landing_page(artifact, profile, hint, run).await,
            PublishStrategy::Download => self.download(artifact, run).await,
        };

        match &result {
            StrategyResult::Success(_) => info!("✅ {} succeeded", strategy),
            other => warn!("⚠️ {} {}", strategy, other),
        }
        run.attempts.push(StrategyAttempt {
            strategy,
            result: result.clone(),
        });
        result
    }

    async fn primary_clipboard(&self, artifact: &ExportArtifact) -> StrategyResult {
        let Some(clipboard) = &self.clipboard else {
            return StrategyResult::Unsupported("no clipboard service".to_string());
        };
        match clipboard.write_image(PNG_MIME, &artifact.png).await {
            Ok(()) => StrategyResult::Success(Delivery::Clipboard),
            Err(e) => classify(e),
        }
    }

    async fn secondary_clipboard(&self, artifact: &ExportArtifact) -> StrategyResult {
        let Some(command) = &self.copy_command else {
            return StrategyResult::Unsupported("no copy command".to_string());
        };

        let loaded = match LoadedImage::decode(&artifact.png) {
            Ok(loaded) => loaded,
            Err(e) => return StrategyResult::Failed(e.to_string()),
        };

        let container = match command.insert_container(&loaded).await {
            Ok(container) => container,
            Err(e) => return classify(e),
        };

        let copied = match command.select_contents(&container).await {
            Ok(()) => command.exec_copy().await,
            Err(e) => Err(e),
        };

        // Cleanup runs whatever the copy did
        command.clear_selection().await;
        command.remove_container(container).await;

        match copied {
            Ok(true) => StrategyResult::Success(Delivery::Clipboard),
            Ok(false) => StrategyResult::Failed("copy command reported failure".to_string()),
            Err(e) => classify(e),
        }
    }

    async fn landing_page(
        &self,
        artifact: &ExportArtifact,
        profile: &CapabilityProfile,
        hint: Option<&str>,
        run: &mut Run,
    ) -> StrategyResult {
        let hint = match hint {
            Some(hint) => hint.to_string(),
            None => match profile.landing_hint() {
                Some(hint) => hint,
                None => return StrategyResult::Unsupported(format!("no landing page for {} family", profile.family)),
            },
        };

        let handle = match self.stage(artifact, run).await {
            Ok(handle) => handle,
            Err(e) => return StrategyResult::Failed(e.to_string()),
        };

        let page = LandingPage {
            title: landing_title(profile.family).to_string(),
            html: landing_page_html(&handle.url(), &hint),
            image_url: handle.url(),
            dir: handle.dir().to_path_buf(),
        };

        let (ack, signal) = LoadAck::pair();
        match self.surface.open_landing_page(&page, ack).await {
            Ok(location) => {
                if let Some(handle) = run.staged.take() {
                    let release = DeferredRelease::spawn(handle, signal, self.config.landing_grace());
                    let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
                    pending.retain(|earlier| !earlier.is_finished());
                    pending.push(release);
                }
                StrategyResult::Success(Delivery::LandingPage { location })
            }
            Err(e) => {
                warn!("Landing page blocked, falling back to download: {}", e);
                StrategyResult::Failed(format!("popup blocked: {}", e))
            }
        }
    }

    async fn download(&self, artifact: &ExportArtifact, run: &mut Run) -> StrategyResult {
        let file_name = self.config.file_name();
        let result = match self.stage(artifact, run).await {
            Ok(handle) => self.surface.save_download(handle.path(), &file_name).await,
            Err(e) => Err(e),
        };

        // A download lets go of the resource straight away
        if let Some(handle) = run.staged.take() {
            handle.release();
        }

        match result {
            Ok(location) => StrategyResult::Success(Delivery::Downloaded { location }),
            Err(e) => {
                error!("Even fallback download failed: {}", e);
                StrategyResult::Failed(e.to_string())
            }
        }
    }

    /// Stage the image once per run and reuse it across fallback rungs
    async fn stage<'r>(&self, artifact: &ExportArtifact, run: &'r mut Run) -> SlipResult<&'r ResourceHandle> {
        if run.staged.is_none() {
            let root = self.config.resolved_staging_dir();
            let handle = ResourceHandle::stage(&root, &self.config.file_name(), &artifact.png).await?;
            run.staged = Some(handle);
        }
        run.staged
            .as_ref()
            .ok_or_else(|| SlipError::configuration("staging produced no resource"))
    }
}

fn classify(error: SlipError) -> StrategyResult {
    match error {
        SlipError::ClipboardUnsupported { reason } => StrategyResult::Unsupported(reason),
        SlipError::ClipboardDenied { reason } => StrategyResult::Denied(reason),
        other => StrategyResult::Failed(other.to_string()),
    }
}

fn landing_title(family: BrowserFamily) -> &'static str {
    match family {
        BrowserFamily::Chrome => "Patti Note: right-click or press copy",
        _ => "Patti Note: tap, long-press or right-click to copy or save",
    }
}

/// Standalone page showing the image with a copy hint
pub fn landing_page_html(image_url: &str, hint: &str) -> String {
    format!(
        r#"<!doctype html>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<style>
body{{display:flex;flex-direction:column;align-items:center;justify-content:center;margin:0;padding:12px;font-family:system-ui,Segoe UI,Arial;background:#fff;color:#111}}
img{{max-width:100%;height:auto;border:1px solid #ddd;box-shadow:0 4px 18px rgba(0,0,0,0.08)}}
.hint{{margin-top:14px;padding:10px 14px;border-radius:8px;background:#f3f4f6;color:#111;max-width:680px;text-align:center}}
</style>
<img src="{}" alt="Patti Note">
<div class="hint">{}</div>
"#,
        escape_html(image_url),
        escape_html(hint)
    )
}
