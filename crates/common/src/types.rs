use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Viewport dimensions of a page, in CSS pixels.
///
/// The engine is launched with the default viewport; sessions may request a
/// different size at creation time. The stream coordinate mapper uses the
/// viewport that was current when streaming started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ViewportSize {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

impl fmt::Display for ViewportSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Navigation wait condition.
///
/// | Condition | Resolves when |
/// |-----------|---------------|
/// | `load` | `document.readyState === "complete"` |
/// | `domcontentloaded` | `document.readyState` left `"loading"` |
/// | `networkidle` | no network activity for ~500ms after load |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitCondition {
    #[default]
    Load,
    DomContentLoaded,
    NetworkIdle,
}

impl WaitCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::DomContentLoaded => "domcontentloaded",
            Self::NetworkIdle => "networkidle",
        }
    }
}

impl FromStr for WaitCondition {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "load" => Ok(Self::Load),
            "domcontentloaded" => Ok(Self::DomContentLoaded),
            "networkidle" => Ok(Self::NetworkIdle),
            _ => Err(()),
        }
    }
}

/// Mouse button used for element clicks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl MouseButton {
    /// Name of the button in CDP `Input.dispatchMouseEvent` terms.
    pub fn cdp_name(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Middle => "middle",
        }
    }
}

impl FromStr for MouseButton {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "middle" => Ok(Self::Middle),
            _ => Err(()),
        }
    }
}

/// Result of a navigation.
///
/// Navigation failures (timeout, DNS error, connection refused) are reported
/// here as data, never as a transport-level fault.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateOutcome {
    pub success: bool,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NavigateOutcome {
    pub fn failed(url: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            success: false,
            url: url.into(),
            title: None,
            status: None,
            content_length: None,
            error: Some(error.to_string()),
        }
    }
}

/// Result of a JavaScript evaluation. Script exceptions land in `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvalOutcome {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.to_string()),
        }
    }
}

/// Result of a fire-and-report action (click, type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// Result of a screenshot capture. `screenshot` is base64-encoded JPEG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScreenshotOutcome {
    pub fn ok(screenshot: String) -> Self {
        Self {
            success: true,
            screenshot: Some(screenshot),
            error: None,
        }
    }

    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            screenshot: None,
            error: Some(error.to_string()),
        }
    }
}

/// Text content of a single element. `text` may be null for elements that
/// exist but carry no text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementTextOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ElementTextOutcome {
    pub fn ok(text: Option<String>) -> Self {
        Self {
            success: true,
            text,
            error: None,
        }
    }

    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            text: None,
            error: Some(error.to_string()),
        }
    }
}

/// Page content snapshot. Field names are part of the wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageContentOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PageContentOutcome {
    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            url: None,
            title: None,
            text_content: None,
            html_content: None,
            error: Some(error.to_string()),
        }
    }
}

/// Result of a click mapped from stream-container coordinates. `x`/`y` are
/// the mapped position in engine viewport pixels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamClickOutcome {
    pub success: bool,
    pub x: f64,
    pub y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
