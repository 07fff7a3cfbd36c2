//! Desktop implementations of the export capabilities.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capability::{CapabilityProfile, ClipboardPermission, EnvironmentProbe};
use crate::error::{ErrorContext, SlipError, SlipResult};
use crate::publish::{ContainerId, CopyCommand, DisplaySurface, ImageClipboard, LandingPage, LoadedImage, PNG_MIME};
use crate::resource::{LoadAck, ResourceHandle};

/// System clipboard through arboard. Only wired where the system keeps the
/// contents after the owning process exits.
#[cfg(all(feature = "clipboard", any(target_os = "macos", target_os = "windows")))]
#[derive(Debug, Default, Clone, Copy)]
pub struct ArboardClipboard;

#[cfg(all(feature = "clipboard", any(target_os = "macos", target_os = "windows")))]
#[async_trait]
impl ImageClipboard for ArboardClipboard {
    async fn write_image(&self, mime: &str, bytes: &[u8]) -> SlipResult<()> {
        if mime != PNG_MIME {
            return Err(SlipError::ClipboardUnsupported {
                reason: format!("{} items are not supported", mime),
            });
        }

        let pixels = image::load_from_memory_with_format(bytes, image::ImageFormat::Png)
            .map_err(|e| SlipError::rasterization_with_source("clipboard image does not decode", e))?
            .to_rgba8();
        let (width, height) = pixels.dimensions();

        let mut clipboard = arboard::Clipboard::new().map_err(arboard_error)?;
        clipboard
            .set_image(arboard::ImageData {
                width: width as usize,
                height: height as usize,
                bytes: std::borrow::Cow::Owned(pixels.into_raw()),
            })
            .map_err(arboard_error)?;

        info!("📋 Wrote {}x{} image to the system clipboard", width, height);
        Ok(())
    }
}

#[cfg(all(feature = "clipboard", any(target_os = "macos", target_os = "windows")))]
fn arboard_error(error: arboard::Error) -> SlipError {
    match error {
        arboard::Error::ClipboardNotSupported => SlipError::ClipboardUnsupported {
            reason: "no clipboard on this platform".to_string(),
        },
        other => SlipError::ClipboardDenied {
            reason: other.to_string(),
        },
    }
}

/// Pipes the PNG into a clipboard tool (`wl-copy`, `xclip`) that keeps
/// serving the selection after this process exits. X11 and Wayland drop
/// the contents with their owner, so these tools stand in for arboard there.
#[derive(Debug, Clone)]
pub struct ToolClipboard {
    program: String,
    args: Vec<String>,
}

impl ToolClipboard {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// `wl-copy` under Wayland, `xclip` otherwise
    pub fn detect() -> Self {
        if std::env::var_os("WAYLAND_DISPLAY").is_some() {
            Self::new("wl-copy", &["--type", "image/png"])
        } else {
            Self::new("xclip", &["-selection", "clipboard", "-t", "image/png", "-i"])
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether the program is found on `PATH`
    pub fn is_installed(&self) -> bool {
        std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(&self.program).is_file()))
            .unwrap_or(false)
    }
}

#[async_trait]
impl ImageClipboard for ToolClipboard {
    async fn write_image(&self, mime: &str, bytes: &[u8]) -> SlipResult<()> {
        if mime != PNG_MIME {
            return Err(SlipError::ClipboardUnsupported {
                reason: format!("{} items are not supported", mime),
            });
        }

        let spawned = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SlipError::ClipboardUnsupported {
                    reason: format!("{} is not installed", self.program),
                })
            }
            Err(e) => return Err(SlipError::ClipboardDenied { reason: e.to_string() }),
        };

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(bytes)
                .await
                .map_err(|e| SlipError::ClipboardDenied { reason: e.to_string() })?;
            // EOF hands the image over
            drop(stdin);
        }

        let status = child
            .wait()
            .await
            .map_err(|e| SlipError::ClipboardDenied { reason: e.to_string() })?;
        if !status.success() {
            return Err(SlipError::ClipboardDenied {
                reason: format!("{} exited with {}", self.program, status),
            });
        }

        info!("📋 Handed {} bytes to {}", bytes.len(), self.program);
        Ok(())
    }
}

/// Primary clipboard for this platform, `None` when built without one
pub fn native_clipboard() -> Option<Arc<dyn ImageClipboard>> {
    #[cfg(all(feature = "clipboard", any(target_os = "macos", target_os = "windows")))]
    {
        return Some(Arc::new(ArboardClipboard));
    }

    #[cfg(all(feature = "clipboard", not(any(target_os = "macos", target_os = "windows"))))]
    {
        return Some(Arc::new(ToolClipboard::detect()));
    }

    #[allow(unreachable_code)]
    None
}

/// Copy via the platform's clipboard tool. The container is a staged file
/// and the selection is the container handed to the tool.
pub struct SystemCopyCommand {
    staging_root: PathBuf,
    containers: Mutex<HashMap<ContainerId, ResourceHandle>>,
    selection: Mutex<Option<ContainerId>>,
}

impl SystemCopyCommand {
    pub fn new(staging_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
            containers: Mutex::new(HashMap::new()),
            selection: Mutex::new(None),
        }
    }

    fn selected_path(&self) -> Option<PathBuf> {
        let selection = self.selection.lock().unwrap_or_else(|e| e.into_inner()).clone()?;
        let containers = self.containers.lock().unwrap_or_else(|e| e.into_inner());
        containers.get(&selection).map(|handle| handle.path().to_path_buf())
    }

    fn copy_invocation(path: &Path) -> SlipResult<Command> {
        let command = if cfg!(target_os = "macos") {
            let mut cmd = Command::new("osascript");
            cmd.arg("-e").arg(format!(
                "set the clipboard to (read (POSIX file \"{}\") as «class PNGf»)",
                path.display()
            ));
            cmd
        } else if cfg!(target_os = "windows") {
            let mut cmd = Command::new("powershell");
            cmd.args(["-NoProfile", "-STA", "-Command"]).arg(format!(
                "Add-Type -AssemblyName System.Windows.Forms; Add-Type -AssemblyName System.Drawing; \
                 [System.Windows.Forms.Clipboard]::SetImage([System.Drawing.Image]::FromFile('{}'))",
                path.display()
            ));
            cmd
        } else if std::env::var_os("WAYLAND_DISPLAY").is_some() {
            let file = std::fs::File::open(path).with_path(path)?;
            let mut cmd = Command::new("wl-copy");
            cmd.args(["--type", "image/png"]).stdin(Stdio::from(file));
            cmd
        } else {
            let mut cmd = Command::new("xclip");
            cmd.args(["-selection", "clipboard", "-t", "image/png", "-i"]).arg(path);
            cmd
        };
        Ok(command)
    }
}

#[async_trait]
impl CopyCommand for SystemCopyCommand {
    async fn insert_container(&self, image: &LoadedImage) -> SlipResult<ContainerId> {
        let handle = ResourceHandle::stage(&self.staging_root, "clipboard.png", &image.png).await?;
        let id = ContainerId(Uuid::new_v4().to_string());
        debug!("Inserted {}x{} image into container {}", image.width, image.height, id.0);
        self.containers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), handle);
        Ok(id)
    }

    async fn select_contents(&self, container: &ContainerId) -> SlipResult<()> {
        let known = self
            .containers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(container);
        if !known {
            return Err(SlipError::configuration(format!("unknown container {}", container.0)));
        }
        *self.selection.lock().unwrap_or_else(|e| e.into_inner()) = Some(container.clone());
        Ok(())
    }

    async fn exec_copy(&self) -> SlipResult<bool> {
        let Some(path) = self.selected_path() else {
            return Ok(false);
        };

        let mut command = Self::copy_invocation(&path)?;
        command.stdout(Stdio::null()).stderr(Stdio::null());

        match command.status().await {
            Ok(status) => Ok(status.success()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SlipError::ClipboardUnsupported {
                reason: "no clipboard tool installed".to_string(),
            }),
            Err(e) => Err(SlipError::ClipboardDenied { reason: e.to_string() }),
        }
    }

    async fn clear_selection(&self) {
        *self.selection.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    async fn remove_container(&self, container: ContainerId) {
        let removed = self
            .containers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&container);
        if let Some(handle) = removed {
            handle.release();
        }
    }
}

/// Downloads land in a directory; landing pages open in the default browser
pub struct DesktopSurface {
    download_dir: PathBuf,
    open_pages: bool,
}

impl DesktopSurface {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            open_pages: true,
        }
    }

    /// Write landing pages without launching a browser
    pub fn headless(mut self) -> Self {
        self.open_pages = false;
        self
    }

    fn opener() -> (&'static str, &'static [&'static str]) {
        if cfg!(target_os = "macos") {
            ("open", &[])
        } else if cfg!(target_os = "windows") {
            ("cmd", &["/C", "start", ""])
        } else {
            ("xdg-open", &[])
        }
    }
}

/// `name.png`, then `name (1).png`, `name (2).png` ... until one is free
pub fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, extension) = match file_name.rsplit_once('.') {
        Some((stem, ext)) => (stem, format!(".{}", ext)),
        None => (file_name, String::new()),
    };
    (1..)
        .map(|n| dir.join(format!("{} ({}){}", stem, n, extension)))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

#[async_trait]
impl DisplaySurface for DesktopSurface {
    async fn save_download(&self, staged: &Path, file_name: &str) -> SlipResult<PathBuf> {
        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .with_path(&self.download_dir)?;

        let destination = unique_destination(&self.download_dir, file_name);
        tokio::fs::copy(staged, &destination).await.with_path(&destination)?;

        info!("📁 Saved {}", destination.display());
        Ok(destination)
    }

    async fn open_landing_page(&self, page: &LandingPage, ack: LoadAck) -> SlipResult<String> {
        let page_path = page.dir.join("index.html");
        let html = format!("<title>{}</title>\n{}", crate::format::escape_html(&page.title), page.html);
        tokio::fs::write(&page_path, html).await.with_path(&page_path)?;
        let location = format!("file://{}", page_path.display());

        if !self.open_pages {
            debug!("Headless surface, page written to {}", location);
            ack.loaded();
            return Ok(location);
        }

        let (program, args) = Self::opener();
        let status = Command::new(program)
            .args(args)
            .arg(&page_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| SlipError::configuration(format!("cannot launch {}: {}", program, e)))?;

        if !status.success() {
            return Err(SlipError::configuration(format!("{} exited with {}", program, status)));
        }

        // The browser loads the page on its own schedule; dropping the ack
        // keeps the image for the full grace period
        drop(ack);
        info!("🪟 Opened landing page {}", location);
        Ok(location)
    }
}

/// Probe for a local desktop session
#[derive(Debug, Clone, Default)]
pub struct DesktopEnvironment {
    user_agent: Option<String>,
}

impl DesktopEnvironment {
    pub fn new(user_agent: Option<String>) -> Self {
        Self { user_agent }
    }

    fn has_display() -> bool {
        if cfg!(any(target_os = "macos", target_os = "windows")) {
            return true;
        }
        std::env::var_os("WAYLAND_DISPLAY").is_some() || std::env::var_os("DISPLAY").is_some()
    }
}

#[async_trait]
impl EnvironmentProbe for DesktopEnvironment {
    async fn probe(&self) -> CapabilityProfile {
        let user_agent = self.user_agent.clone().unwrap_or_else(|| {
            format!("patti/{} ({})", env!("CARGO_PKG_VERSION"), std::env::consts::OS)
        });

        let clipboard_built = cfg!(feature = "clipboard");
        let display = Self::has_display();
        if !display {
            warn!("No display session found, clipboard unavailable");
        }

        let tool_ready = cfg!(any(target_os = "macos", target_os = "windows")) || {
            let tool = ToolClipboard::detect();
            let installed = tool.is_installed();
            if !installed {
                warn!("{} not found, clipboard unavailable", tool.program());
            }
            installed
        };

        let mut profile = CapabilityProfile::new(user_agent, std::env::consts::OS);
        profile.secure_context = true;
        profile.clipboard_write = clipboard_built && display && tool_ready;
        profile.image_clipboard_item = clipboard_built;
        profile.permission = Some(if profile.clipboard_write {
            ClipboardPermission::Granted
        } else {
            ClipboardPermission::Unavailable
        });
        profile
    }
}
