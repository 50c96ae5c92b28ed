//! Click attribution across the isolated-frame boundary.
//!
//! The frame posts `{"type": "adserver-click", "url": ...}` to its parent. The
//! parent accepts it only when the type matches exactly and the sender's
//! origin is trusted:
//! - the page's own origin
//! - an origin from the configured allowlist (exact match)
//! - another loopback origin, but only while the page itself is on loopback

use serde_json::Value;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;
use url::{Host, Url};

/// `type` of the click message posted by an isolated frame.
pub const CLICK_MESSAGE_TYPE: &str = "adserver-click";

/// Origins trusted to post click messages.
#[derive(Debug, Clone, PartialEq)]
pub struct OriginPolicy {
    page_origin: String,
    page_is_loopback: bool,
    allowed_origins: Vec<String>,
}

fn is_loopback_host(host: Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => domain.eq_ignore_ascii_case("localhost"),
        Host::Ipv4(ip) => IpAddr::V4(ip).is_loopback(),
        Host::Ipv6(ip) => IpAddr::V6(ip).is_loopback(),
    }
}

fn is_loopback_url(url: &Url) -> bool {
    url.host().is_some_and(is_loopback_host)
}

impl OriginPolicy {
    pub fn new(page_location: &Url, allowed_origins: &[String]) -> Self {
        Self {
            page_origin: page_location.origin().ascii_serialization(),
            page_is_loopback: is_loopback_url(page_location),
            allowed_origins: allowed_origins.to_vec(),
        }
    }

    pub fn page_origin(&self) -> &str {
        &self.page_origin
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        if origin == self.page_origin {
            return true;
        }

        if self.allowed_origins.iter().any(|allowed| allowed == origin) {
            return true;
        }

        if self.page_is_loopback {
            return Url::parse(origin)
                .map(|url| {
                    // Only a bare origin counts, not an arbitrary URL
                    url.origin().ascii_serialization() == origin && is_loopback_url(&url)
                })
                .unwrap_or(false);
        }

        false
    }
}

/// A click reported by an isolated frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ClickMessage {
    pub url: Option<String>,
}

/// Parse a posted message; anything but an exact click message is `None`.
pub fn parse_click_message(data: &Value) -> Option<ClickMessage> {
    let object = data.as_object()?;
    if object.get("type")?.as_str()? != CLICK_MESSAGE_TYPE {
        return None;
    }

    Some(ClickMessage {
        url: object.get("url").and_then(Value::as_str).map(str::to_string),
    })
}

/// Filters frame messages and forwards accepted clicks.
#[derive(Clone)]
pub struct MessageGate {
    policy: OriginPolicy,
    on_click: Arc<dyn Fn(&ClickMessage) + Send + Sync>,
}

impl MessageGate {
    pub fn new(policy: OriginPolicy, on_click: Arc<dyn Fn(&ClickMessage) + Send + Sync>) -> Self {
        Self { policy, on_click }
    }

    /// Returns true if the message was accepted and the click callback ran.
    pub fn handle(&self, origin: &str, data: &Value) -> bool {
        if !self.policy.is_allowed(origin) {
            debug!(origin, "Ignoring message from untrusted origin");
            return false;
        }

        match parse_click_message(data) {
            Some(message) => {
                (self.on_click)(&message);
                true
            }
            None => false,
        }
    }
}

/// Script placed inside the isolated frame: reports link and image clicks
/// to the parent, targeted at the parent's origin only.
pub fn frame_bridge_script(parent_origin: &str) -> String {
    // JSON string literals are valid JS; `</` is escaped so the value can't
    // close the surrounding script element.
    let origin = serde_json::to_string(parent_origin)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace("</", "<\\/");
    let message_type = serde_json::to_string(CLICK_MESSAGE_TYPE)
        .unwrap_or_else(|_| "\"\"".to_string());

    format!(
        "(function() {{\
var parentOrigin = {origin};\
document.addEventListener('click', function(e) {{\
var target = e.target && e.target.closest ? e.target.closest('a, img') : null;\
if (!target) {{ return; }}\
e.preventDefault();\
window.parent.postMessage({{ type: {message_type} }}, parentOrigin);\
}});\
}})();"
    )
}
