//! Minimal typed CDP calls for the few protocol methods `headless_chrome`
//! does not wrap with a convenience API. Each struct carries only the
//! parameters this service actually sends; optional protocol fields are
//! simply omitted from the payload.

use anyhow::Result;
use headless_chrome::protocol::cdp::types::Method;
use headless_chrome::Tab;
use periscope_common::MouseButton;
use serde::Serialize;

/// `Input.dispatchMouseEvent` with the press/release subset we use.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct DispatchMouseEvent {
    r#type: &'static str,
    x: f64,
    y: f64,
    button: &'static str,
    click_count: u32,
}

impl Method for DispatchMouseEvent {
    const NAME: &'static str = "Input.dispatchMouseEvent";
    type ReturnObject = serde_json::Value;
}

/// `Log.enable` — needed before console entries are delivered as events.
#[derive(Serialize, Debug, Clone)]
struct LogEnable {}

impl Method for LogEnable {
    const NAME: &'static str = "Log.enable";
    type ReturnObject = serde_json::Value;
}

/// `Runtime.enable` — needed before uncaught exceptions are delivered.
#[derive(Serialize, Debug, Clone)]
struct RuntimeEnable {}

impl Method for RuntimeEnable {
    const NAME: &'static str = "Runtime.enable";
    type ReturnObject = serde_json::Value;
}

/// Dispatch a native click at viewport coordinates.
pub fn click_at(tab: &Tab, x: f64, y: f64, button: MouseButton) -> Result<()> {
    tab.call_method(DispatchMouseEvent {
        r#type: "mousePressed",
        x,
        y,
        button: button.cdp_name(),
        click_count: 1,
    })?;
    tab.call_method(DispatchMouseEvent {
        r#type: "mouseReleased",
        x,
        y,
        button: button.cdp_name(),
        click_count: 1,
    })?;
    Ok(())
}

/// Enable the event domains the page observers listen on.
pub fn enable_page_events(tab: &Tab) -> Result<()> {
    tab.call_method(LogEnable {})?;
    tab.call_method(RuntimeEnable {})?;
    Ok(())
}
