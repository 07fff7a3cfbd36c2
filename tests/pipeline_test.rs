use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use patti_slip::capability::{CapabilityProfile, EnvironmentProbe};
use patti_slip::config::ExportConfig;
use patti_slip::error::{SlipError, SlipResult};
use patti_slip::ledger::{InputField, InputSet};
use patti_slip::publish::{
    ContainerId, CopyCommand, DisplaySurface, ExportOutcome, ExportState, ImageClipboard, LandingPage, LoadedImage,
    PublishStrategy, Publisher, StrategyResult,
};
use patti_slip::raster::{BoxPainter, RenderError, Rasterizer, ResvgDecoder, VectorDecoder};
use patti_slip::recompute::recompute;
use patti_slip::resource::LoadAck;
use patti_slip::slip::{Element, Node, SlipRegion, SlipSheet};

const SAFARI: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 \
                      (KHTML, like Gecko) Version/17.4 Safari/605.1.15";
const FIREFOX: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0";

struct StaticProbe(CapabilityProfile);

#[async_trait]
impl EnvironmentProbe for StaticProbe {
    async fn probe(&self) -> CapabilityProfile {
        self.0.clone()
    }
}

#[derive(Clone, Copy)]
enum ClipboardBehavior {
    Accept,
    Deny,
    Unsupported,
}

struct MockClipboard {
    behavior: ClipboardBehavior,
    calls: AtomicUsize,
    last_mime: Mutex<String>,
}

impl MockClipboard {
    fn new(behavior: ClipboardBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
            last_mime: Mutex::new(String::new()),
        })
    }
}

#[async_trait]
impl ImageClipboard for MockClipboard {
    async fn write_image(&self, mime: &str, bytes: &[u8]) -> SlipResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_mime.lock().unwrap() = mime.to_string();
        assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));
        match self.behavior {
            ClipboardBehavior::Accept => Ok(()),
            ClipboardBehavior::Deny => Err(SlipError::ClipboardDenied {
                reason: "NotAllowedError".into(),
            }),
            ClipboardBehavior::Unsupported => Err(SlipError::ClipboardUnsupported {
                reason: "ClipboardItem missing".into(),
            }),
        }
    }
}

struct MockCopyCommand {
    copy_succeeds: bool,
    inserted: AtomicUsize,
    removed: AtomicUsize,
    cleared: AtomicUsize,
}

impl MockCopyCommand {
    fn new(copy_succeeds: bool) -> Arc<Self> {
        Arc::new(Self {
            copy_succeeds,
            inserted: AtomicUsize::new(0),
            removed: AtomicUsize::new(0),
            cleared: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CopyCommand for MockCopyCommand {
    async fn insert_container(&self, image: &LoadedImage) -> SlipResult<ContainerId> {
        assert!(image.width > 0 && image.height > 0);
        let n = self.inserted.fetch_add(1, Ordering::SeqCst);
        Ok(ContainerId(format!("container-{}", n)))
    }

    async fn select_contents(&self, _container: &ContainerId) -> SlipResult<()> {
        Ok(())
    }

    async fn exec_copy(&self) -> SlipResult<bool> {
        Ok(self.copy_succeeds)
    }

    async fn clear_selection(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }

    async fn remove_container(&self, _container: ContainerId) {
        self.removed.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockSurface {
    download_dir: PathBuf,
    block_popups: bool,
    fail_downloads: bool,
    downloads: Mutex<Vec<PathBuf>>,
    pages: Mutex<Vec<LandingPage>>,
}

impl MockSurface {
    fn new(download_dir: &Path) -> Self {
        Self {
            download_dir: download_dir.to_path_buf(),
            block_popups: false,
            fail_downloads: false,
            downloads: Mutex::new(Vec::new()),
            pages: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DisplaySurface for MockSurface {
    async fn save_download(&self, staged: &Path, file_name: &str) -> SlipResult<PathBuf> {
        if self.fail_downloads {
            return Err(SlipError::configuration("download blocked"));
        }
        let destination = self.download_dir.join(file_name);
        std::fs::copy(staged, &destination).map_err(|e| SlipError::file_io(file_name, e))?;
        self.downloads.lock().unwrap().push(destination.clone());
        Ok(destination)
    }

    async fn open_landing_page(&self, page: &LandingPage, ack: LoadAck) -> SlipResult<String> {
        if self.block_popups {
            return Err(SlipError::configuration("window.open returned null"));
        }
        self.pages.lock().unwrap().push(page.clone());
        ack.loaded();
        Ok(format!("mock://{}", page.title))
    }
}

struct SolidDecoder;

#[async_trait]
impl VectorDecoder for SolidDecoder {
    async fn decode(&self, _svg: &str, width: u32, height: u32) -> Result<RgbaImage, RenderError> {
        Ok(RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255])))
    }
}

struct Harness {
    staging: TempDir,
    downloads: TempDir,
    clipboard: Arc<MockClipboard>,
    copy_command: Arc<MockCopyCommand>,
}

impl Harness {
    fn new(clipboard: ClipboardBehavior, copy_succeeds: bool) -> Self {
        Self {
            staging: TempDir::new().unwrap(),
            downloads: TempDir::new().unwrap(),
            clipboard: MockClipboard::new(clipboard),
            copy_command: MockCopyCommand::new(copy_succeeds),
        }
    }

    fn config(&self) -> ExportConfig {
        ExportConfig {
            settle_delay_ms: 0,
            download_dir: Some(self.downloads.path().to_path_buf()),
            staging_dir: Some(self.staging.path().to_path_buf()),
            ..ExportConfig::default()
        }
    }

    fn surface(&self) -> MockSurface {
        MockSurface::new(self.downloads.path())
    }

    fn publisher(&self, profile: CapabilityProfile, surface: Arc<MockSurface>) -> Publisher {
        self.publisher_with(profile, surface, self.config())
    }

    fn publisher_with(&self, profile: CapabilityProfile, surface: Arc<MockSurface>, config: ExportConfig) -> Publisher {
        let rasterizer = Rasterizer::new(Arc::new(SolidDecoder));
        Publisher::new(rasterizer, Arc::new(StaticProbe(profile)), surface, config)
            .with_clipboard(self.clipboard.clone())
            .with_copy_command(self.copy_command.clone())
    }

    fn staged_dirs(&self) -> usize {
        std::fs::read_dir(self.staging.path()).map(|d| d.count()).unwrap_or(0)
    }
}

fn ready(user_agent: &str) -> CapabilityProfile {
    CapabilityProfile {
        secure_context: true,
        clipboard_write: true,
        image_clipboard_item: true,
        ..CapabilityProfile::new(user_agent, "linux")
    }
}

fn slip_region() -> SlipRegion {
    let inputs = InputSet::new()
        .with(InputField::Quantity, "10")
        .with(InputField::Rate, "2500")
        .with(InputField::PaymentAmount, "24500")
        .with(InputField::BillNo, "INV-9");
    SlipSheet::new().render(&recompute(&inputs))
}

#[tokio::test]
async fn test_primary_clipboard_publishes() {
    let harness = Harness::new(ClipboardBehavior::Accept, true);
    let surface = Arc::new(harness.surface());
    let publisher = harness.publisher(ready(FIREFOX), surface.clone());

    let report = publisher.export(&slip_region()).await.unwrap();

    assert!(matches!(
        report.outcome,
        ExportOutcome::Published {
            mechanism: PublishStrategy::PrimaryClipboard
        }
    ));
    assert_eq!(
        report.states,
        vec![
            ExportState::Idle,
            ExportState::Capturing,
            ExportState::Captured,
            ExportState::PublishClipboard,
            ExportState::Published,
        ]
    );
    assert_eq!(*harness.clipboard.last_mime.lock().unwrap(), "image/png");
    assert_eq!(harness.copy_command.inserted.load(Ordering::SeqCst), 0);
    assert!(surface.downloads.lock().unwrap().is_empty());
    assert!(!publisher.is_busy());
}

#[tokio::test]
async fn test_denied_clipboard_uses_copy_command_and_cleans_up() {
    let harness = Harness::new(ClipboardBehavior::Deny, true);
    let publisher = harness.publisher(ready(FIREFOX), Arc::new(harness.surface()));

    let report = publisher.export(&slip_region()).await.unwrap();

    assert!(matches!(
        report.outcome,
        ExportOutcome::Published {
            mechanism: PublishStrategy::SecondaryClipboard
        }
    ));
    assert!(report.states.contains(&ExportState::ClipboardDenied));
    assert!(report.outcome.status_message().contains("via fallback"));
    assert_eq!(harness.copy_command.inserted.load(Ordering::SeqCst), 1);
    assert_eq!(harness.copy_command.removed.load(Ordering::SeqCst), 1);
    assert_eq!(harness.copy_command.cleared.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_copies_fall_back_to_download() {
    let harness = Harness::new(ClipboardBehavior::Unsupported, false);
    let surface = Arc::new(harness.surface());
    let publisher = harness.publisher(ready(FIREFOX), surface.clone());

    let report = publisher.export(&slip_region()).await.unwrap();

    let location = match &report.outcome {
        ExportOutcome::Downloaded { location } => location.clone(),
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(location, harness.downloads.path().join("patti-note.png"));
    let bytes = std::fs::read(&location).unwrap();
    let image = image::load_from_memory(&bytes).unwrap();
    assert_eq!((image.width(), image.height()), (1728, 688));

    assert_eq!(
        report.states,
        vec![
            ExportState::Idle,
            ExportState::Capturing,
            ExportState::Captured,
            ExportState::PublishClipboard,
            ExportState::ClipboardUnsupported,
            ExportState::PublishFallback,
            ExportState::Downloaded,
        ]
    );
    // the secondary copy still tidied its container
    assert_eq!(harness.copy_command.removed.load(Ordering::SeqCst), 1);
    // a download releases its staged copy straight away
    assert_eq!(harness.staged_dirs(), 0);
}

#[tokio::test]
async fn test_insecure_context_never_touches_clipboard() {
    let harness = Harness::new(ClipboardBehavior::Accept, true);
    let surface = Arc::new(harness.surface());
    let profile = CapabilityProfile {
        secure_context: false,
        ..ready(FIREFOX)
    };
    let publisher = harness.publisher(profile, surface.clone());

    let report = publisher.export(&slip_region()).await.unwrap();

    assert!(matches!(report.outcome, ExportOutcome::Downloaded { .. }));
    assert_eq!(harness.clipboard.calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.copy_command.inserted.load(Ordering::SeqCst), 0);
    assert!(!report.attempted(PublishStrategy::PrimaryClipboard));
    assert!(!report.attempted(PublishStrategy::SecondaryClipboard));
}

#[tokio::test]
async fn test_taint_stops_the_export() {
    let harness = Harness::new(ClipboardBehavior::Accept, true);
    let surface = Arc::new(harness.surface());
    let rasterizer = Rasterizer::new(Arc::new(SolidDecoder))
        .with_primary(Arc::new(BoxPainter::new(ResvgDecoder::without_fonts())));
    let publisher = Publisher::new(
        rasterizer,
        Arc::new(StaticProbe(ready(FIREFOX))),
        surface.clone(),
        harness.config(),
    )
    .with_clipboard(harness.clipboard.clone());

    let mut region = slip_region();
    region.root.children.push(Node::Element(
        Element::new("img").with_attr("src", "https://cdn.example.com/stamp.png"),
    ));

    let report = publisher.export(&region).await.unwrap();

    match &report.outcome {
        ExportOutcome::Failed {
            error: SlipError::RasterizationTaint { .. },
        } => {}
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(report.states.last(), Some(&ExportState::FailedTaint));
    assert!(report.outcome.status_message().contains("CORS"));
    assert!(report.attempts.is_empty());
    assert_eq!(harness.clipboard.calls.load(Ordering::SeqCst), 0);
    assert!(surface.downloads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_landing_page_for_safari_without_clipboard() {
    let harness = Harness::new(ClipboardBehavior::Accept, true);
    let surface = Arc::new(harness.surface());
    let profile = CapabilityProfile {
        image_clipboard_item: false,
        ..ready(SAFARI)
    };
    let publisher = harness.publisher(profile, surface.clone());

    let report = publisher.export(&slip_region()).await.unwrap();

    match &report.outcome {
        ExportOutcome::LandingPageShown { hint, .. } => assert!(hint.contains("Right-click")),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(
        report.states,
        vec![
            ExportState::Idle,
            ExportState::Capturing,
            ExportState::Captured,
            ExportState::PublishFallback,
            ExportState::LandingPageShown,
        ]
    );

    let pages = surface.pages.lock().unwrap().clone();
    assert_eq!(pages.len(), 1);
    assert!(pages[0].html.contains(&pages[0].image_url));
    assert!(pages[0].dir.join("patti-note.png").exists());

    // the page acknowledged the load, so the resource goes right away
    assert_eq!(publisher.pending_releases(), 1);
    assert_eq!(publisher.finish_pending().await, 1);
    assert!(!pages[0].dir.exists());
}

#[tokio::test]
async fn test_released_landing_pages_do_not_accumulate() {
    let harness = Harness::new(ClipboardBehavior::Accept, true);
    let surface = Arc::new(harness.surface());
    let profile = CapabilityProfile {
        image_clipboard_item: false,
        ..ready(SAFARI)
    };
    let publisher = harness.publisher(profile, surface.clone());

    publisher.export(&slip_region()).await.unwrap();
    let first = surface.pages.lock().unwrap()[0].dir.clone();
    for _ in 0..200 {
        if !first.exists() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(!first.exists());
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    publisher.export(&slip_region()).await.unwrap();

    assert_eq!(surface.pages.lock().unwrap().len(), 2);
    assert_eq!(publisher.pending_releases(), 1);
    assert_eq!(publisher.finish_pending().await, 1);
    assert_eq!(harness.staged_dirs(), 0);
}

#[tokio::test]
async fn test_blocked_popup_falls_back_to_download() {
    let harness = Harness::new(ClipboardBehavior::Accept, true);
    let surface = Arc::new(MockSurface {
        block_popups: true,
        ..harness.surface()
    });
    let publisher = harness.publisher(CapabilityProfile::new(SAFARI, "macos"), surface.clone());

    let report = publisher.export(&slip_region()).await.unwrap();

    assert!(matches!(report.outcome, ExportOutcome::Downloaded { .. }));
    match &report.attempts[0].result {
        StrategyResult::Failed(reason) => assert!(reason.contains("popup blocked")),
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(report.attempts[1].strategy, PublishStrategy::Download);
    assert_eq!(publisher.pending_releases(), 0);
    assert_eq!(harness.staged_dirs(), 0);
}

#[tokio::test]
async fn test_every_mechanism_failing_is_reported() {
    let harness = Harness::new(ClipboardBehavior::Deny, false);
    let surface = Arc::new(MockSurface {
        fail_downloads: true,
        ..harness.surface()
    });
    let publisher = harness.publisher(ready(FIREFOX), surface);

    let report = publisher.export(&slip_region()).await.unwrap();

    match &report.outcome {
        ExportOutcome::Failed {
            error: SlipError::PublishFailure { attempts },
        } => assert_eq!(attempts.len(), 3),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(report.states.last(), Some(&ExportState::FailedPublish));
    assert!(report.outcome.status_message().contains("Export PNG"));
}

#[tokio::test]
async fn test_export_png_skips_the_clipboard() {
    let harness = Harness::new(ClipboardBehavior::Accept, true);
    let surface = Arc::new(harness.surface());
    let publisher = harness.publisher(ready(FIREFOX), surface.clone());

    let report = publisher.export_png(&slip_region()).await.unwrap();

    assert!(matches!(report.outcome, ExportOutcome::Downloaded { .. }));
    assert_eq!(harness.clipboard.calls.load(Ordering::SeqCst), 0);
    assert_eq!(surface.downloads.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_second_export_while_running_is_rejected() {
    let harness = Harness::new(ClipboardBehavior::Accept, true);
    let config = ExportConfig {
        settle_delay_ms: 20,
        ..harness.config()
    };
    let publisher = harness.publisher_with(ready(FIREFOX), Arc::new(harness.surface()), config);
    let region = slip_region();

    let (first, second) = tokio::join!(publisher.export(&region), publisher.export(&region));

    assert!(first.unwrap().outcome.is_success());
    assert!(matches!(second, Err(SlipError::ExportInProgress)));
    assert_eq!(harness.clipboard.calls.load(Ordering::SeqCst), 1);

    // the guard is released once the first export ends
    assert!(publisher.export(&region).await.is_ok());
}

#[tokio::test]
async fn test_diagnostic_ignores_secure_context() {
    let harness = Harness::new(ClipboardBehavior::Accept, true);
    let profile = CapabilityProfile {
        secure_context: false,
        ..ready(FIREFOX)
    };
    let publisher = harness.publisher(profile, Arc::new(harness.surface()));

    let report = publisher.run_copy_diagnostic(&slip_region()).await.unwrap();

    assert!(report.ok);
    assert_eq!(report.method, Some(PublishStrategy::PrimaryClipboard));
    assert_eq!(harness.clipboard.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_diagnostic_reports_download_fallback() {
    let harness = Harness::new(ClipboardBehavior::Deny, false);
    let publisher = harness.publisher(ready(FIREFOX), Arc::new(harness.surface()));

    let report = publisher.run_copy_diagnostic(&slip_region()).await.unwrap();

    assert!(!report.ok);
    assert_eq!(report.method, Some(PublishStrategy::Download));
    assert!(report.status_line().contains("download fallback"));
}

#[tokio::test]
async fn test_check_reports_without_capturing() {
    let harness = Harness::new(ClipboardBehavior::Accept, true);
    let surface = Arc::new(harness.surface());
    let publisher = harness.publisher(ready(FIREFOX), surface.clone());

    let report = publisher.check().await;

    assert!(report.ready);
    assert!(report.status_line.contains("⚠️ no primary renderer"));
    assert_eq!(harness.clipboard.calls.load(Ordering::SeqCst), 0);
    assert!(surface.downloads.lock().unwrap().is_empty());
    assert_eq!(harness.staged_dirs(), 0);
}
