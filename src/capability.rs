//! What the current environment can do for an export, probed fresh each time.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserFamily {
    Safari,
    Ios,
    Chrome,
    Other,
}

impl BrowserFamily {
    /// Classify an identification string. iOS and Safari win over Chrome.
    pub fn detect(user_agent: &str) -> Self {
        let is_safari = matches(r"Safari", user_agent) && !matches(r"Chrome|Chromium|Android", user_agent);
        let is_ios = matches(r"iP(ad|hone|od)", user_agent);
        let is_chrome = matches(r"Chrome", user_agent) && !matches(r"Edge|OPR|Brave|Chromium", user_agent);

        if is_ios {
            BrowserFamily::Ios
        } else if is_safari {
            BrowserFamily::Safari
        } else if is_chrome {
            BrowserFamily::Chrome
        } else {
            BrowserFamily::Other
        }
    }

    /// Families whose programmatic image clipboard is unreliable enough that
    /// a manual-copy page beats a bare download
    pub fn prefers_landing_page(&self) -> bool {
        !matches!(self, BrowserFamily::Other)
    }
}

impl fmt::Display for BrowserFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BrowserFamily::Safari => "Safari",
            BrowserFamily::Ios => "iOS",
            BrowserFamily::Chrome => "Chrome",
            BrowserFamily::Other => "other",
        };
        f.write_str(name)
    }
}

fn matches(pattern: &str, text: &str) -> bool {
    Regex::new(pattern).map(|re| re.is_match(text)).unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipboardPermission {
    Granted,
    Denied,
    Prompt,
    Unavailable,
}

impl fmt::Display for ClipboardPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            ClipboardPermission::Granted => "granted",
            ClipboardPermission::Denied => "denied",
            ClipboardPermission::Prompt => "prompt",
            ClipboardPermission::Unavailable => "unavailable",
        };
        f.write_str(state)
    }
}

/// Snapshot of export capabilities. Never cached across calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityProfile {
    pub secure_context: bool,
    pub clipboard_write: bool,
    pub image_clipboard_item: bool,
    pub primary_renderer: bool,
    pub user_agent: String,
    pub family: BrowserFamily,
    /// Host platform name, e.g. `macos`
    pub platform: String,
    /// `None` when the permission state could not be determined
    pub permission: Option<ClipboardPermission>,
}

impl CapabilityProfile {
    pub fn new(user_agent: impl Into<String>, platform: impl Into<String>) -> Self {
        let user_agent = user_agent.into();
        Self {
            secure_context: false,
            clipboard_write: false,
            image_clipboard_item: false,
            primary_renderer: false,
            family: BrowserFamily::detect(&user_agent),
            user_agent,
            platform: platform.into(),
            permission: None,
        }
    }

    /// Entry guard for both clipboard mechanisms
    pub fn clipboard_ready(&self) -> bool {
        self.secure_context && self.clipboard_write && self.image_clipboard_item
    }

    pub fn is_mac(&self) -> bool {
        let platform = self.platform.to_lowercase();
        platform.contains("mac") || platform.contains("darwin")
    }

    /// Instruction shown beside the image on a landing page
    pub fn landing_hint(&self) -> Option<String> {
        match self.family {
            BrowserFamily::Ios => Some(
                "Long-press the image and choose \"Copy\" or \"Save Image\" to save or copy it to your device."
                    .to_string(),
            ),
            BrowserFamily::Safari => Some(
                "Right-click the image and choose \"Copy Image\" or \"Save Image As...\". \
                 On macOS, you can also drag it into other apps."
                    .to_string(),
            ),
            BrowserFamily::Chrome => {
                let shortcut = if self.is_mac() { "⌘+C" } else { "Ctrl+C" };
                Some(format!(
                    "Right-click the image and choose \"Copy image\" or press {} to copy it. \
                     You can then paste it into chat or documents.",
                    shortcut
                ))
            }
            BrowserFamily::Other => None,
        }
    }

    pub fn route(&self) -> PublishRoute {
        let route = match (self.clipboard_ready(), self.landing_hint()) {
            (true, landing_hint) => PublishRoute::ClipboardCapable { landing_hint },
            (false, Some(hint)) => PublishRoute::LandingPagePreferred { hint },
            (false, None) => PublishRoute::DownloadOnly,
        };
        debug!("Publish route for {} family: {:?}", self.family, route);
        route
    }
}

/// How an export should be delivered, fixed once per export
#[derive(Debug, Clone, PartialEq)]
pub enum PublishRoute {
    /// Clipboard first; the manual fallback is a landing page when a hint
    /// exists for the family, else a download
    ClipboardCapable { landing_hint: Option<String> },
    LandingPagePreferred { hint: String },
    DownloadOnly,
}

/// Probes the environment for a fresh profile
#[async_trait]
pub trait EnvironmentProbe: Send + Sync {
    async fn probe(&self) -> CapabilityProfile;
}

/// Result of the on-demand capability check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityReport {
    pub status_line: String,
    pub ready: bool,
}

/// Describe a profile without capturing or publishing anything
pub fn check_capabilities(profile: &CapabilityProfile) -> CapabilityReport {
    let mut parts = vec![
        if profile.secure_context { "🔒 secure" } else { "⚠️ insecure" }.to_string(),
        if profile.clipboard_write { "📋 clipboard API" } else { "❌ no clipboard API" }.to_string(),
        if profile.image_clipboard_item {
            "🖼️ image clipboard item"
        } else {
            "❌ no image clipboard item"
        }
        .to_string(),
    ];

    if profile.family == BrowserFamily::Chrome && profile.clipboard_write {
        parts.push("⚙️ Chrome: may require permission prompt".to_string());
    }

    parts.push(
        if profile.primary_renderer {
            "🎨 primary renderer"
        } else {
            "⚠️ no primary renderer"
        }
        .to_string(),
    );

    if let Some(permission) = profile.permission {
        parts.push(format!("📝 perm:{}", permission));
    }

    CapabilityReport {
        status_line: parts.join(" | "),
        ready: profile.clipboard_ready(),
    }
}
