//! Banner renderer: cache, delivery, sanitize, inject, track.
//!
//! Per call: `start -> cache hit | fetch -> success | failure`.
//! - cache hit: sanitize and inject, method `cache`
//! - fetch success: cache, sanitize, inject, method `direct` or `isolated`
//! - failure: fallback placeholder (method `fallback`, success) when enabled,
//!   otherwise a failed result with the container left as it was
//!
//! The impression fires exactly once per successful injection.

use crate::bridge::{ClickMessage, MessageGate, OriginPolicy};
use crate::cache::BannerCache;
use crate::config::{FallbackConfig, SdkConfig};
use crate::error::Error;
use crate::events::{EventBus, SdkEvent};
use crate::fetch::{Creative, DeliveryClient, DeliveryRequest, HttpTransport, Transport};
use crate::inject::{build_isolated_frame, click_through_url, inject_direct, inject_isolated};
use crate::page::{ClickListener, HostPage, Mounted, SlotContainer, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use crate::sanitize::{create_safe_element, escape_html, is_safe_html, Sanitizer};
use crate::validate::validate_slot_id;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a creative ended up on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMethod {
    Direct,
    Isolated,
    Fallback,
    Cache,
}

impl RenderMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderMethod::Direct => "direct",
            RenderMethod::Isolated => "isolated",
            RenderMethod::Fallback => "fallback",
            RenderMethod::Cache => "cache",
        }
    }
}

impl fmt::Display for RenderMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one render call.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderResult {
    pub success: bool,
    pub method: RenderMethod,
    pub creative: Option<Creative>,
    /// The failure behind a `fallback` result, or behind an unsuccessful one
    pub error: Option<Error>,
}

/// Per-call render options.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Overrides the measured container width
    pub width: Option<u32>,
    /// Overrides the measured container height
    pub height: Option<u32>,
    /// Referer sent to the delivery API, defaults to the page URL
    pub referer: Option<String>,
    pub cancel: Option<CancellationToken>,
}

/// Placeholder markup shown when no creative can be delivered.
pub fn fallback_html(config: &FallbackConfig, width: u32, height: u32, sanitizer: &Sanitizer) -> String {
    let size = format!("width:{}px;height:{}px", width, height);

    if let Some(custom) = config.html.as_deref().filter(|html| !html.trim().is_empty()) {
        return format!(
            r#"<div class="adserver-fallback" style="{}">{}</div>"#,
            size,
            sanitizer.sanitize(custom)
        );
    }

    let style = format!(
        "{};display:flex;align-items:center;justify-content:center;box-sizing:border-box;\
         background:{};border:1px dashed {};text-align:center;padding:20px;\
         font-family:Arial, sans-serif;font-size:14px;color:{}",
        size, config.background_color, config.border_color, config.text_color
    );

    let content = format!(
        "{}{}",
        create_safe_element("p", &[("style", "margin:0;font-weight:bold")], "Advertisement"),
        create_safe_element(
            "p",
            &[("style", "margin:5px 0 0 0;font-size:12px;opacity:0.8")],
            &escape_html(&config.text)
        ),
    );

    create_safe_element(
        "div",
        &[("class", "adserver-fallback"), ("style", &style)],
        &create_safe_element("div", &[], &content),
    )
}

/// Renders creatives into slot containers.
pub struct Renderer<T: Transport = HttpTransport> {
    config: Arc<SdkConfig>,
    cache: BannerCache,
    client: DeliveryClient<T>,
    page: Arc<dyn HostPage>,
    events: Arc<EventBus>,
    sanitizer: Sanitizer,
}

impl<T: Transport> Renderer<T> {
    pub fn new(
        config: Arc<SdkConfig>,
        cache: BannerCache,
        client: DeliveryClient<T>,
        page: Arc<dyn HostPage>,
        events: Arc<EventBus>,
    ) -> Self {
        let sanitizer = match config.csp_nonce.as_deref() {
            Some(nonce) => Sanitizer::with_nonce(nonce).unwrap_or_else(|e| {
                warn!(error = %e, "Ignoring invalid CSP nonce");
                Sanitizer::new()
            }),
            None => Sanitizer::new(),
        };

        Self {
            config,
            cache,
            client,
            page,
            events,
            sanitizer,
        }
    }

    /// Render the creative for `slot_id` into `container`.
    pub async fn render(
        &self,
        slot_id: &str,
        container: &SlotContainer,
        options: RenderOptions,
    ) -> RenderResult {
        let result = self.render_inner(slot_id, container, &options).await;

        info!(
            slot = slot_id,
            success = result.success,
            method = %result.method,
            "Render finished"
        );
        self.events.emit(&SdkEvent::Render {
            slot_id: slot_id.to_string(),
            success: result.success,
            method: result.method,
        });
        result
    }

    async fn render_inner(
        &self,
        slot_id: &str,
        container: &SlotContainer,
        options: &RenderOptions,
    ) -> RenderResult {
        // Invalid ids are rejected before any side effect, fallback included
        if let Err(e) = validate_slot_id(slot_id) {
            warn!(slot = slot_id, error = %e, "Rejected slot id");
            return RenderResult {
                success: false,
                method: RenderMethod::Fallback,
                creative: None,
                error: Some(e.into()),
            };
        }

        let (creative, from_cache) = match self.cache.get(slot_id) {
            Some(creative) => (creative, true),
            None => match self.fetch(slot_id, container, options).await {
                Ok(creative) => {
                    self.cache.put(slot_id, &creative);
                    (creative, false)
                }
                Err(e) => return self.fail(slot_id, container, options, e),
            },
        };

        match self.mount(slot_id, container, &creative).await {
            Ok(method) => {
                self.track_impression(slot_id, &creative);
                RenderResult {
                    success: true,
                    method: if from_cache { RenderMethod::Cache } else { method },
                    creative: Some(creative),
                    error: None,
                }
            }
            Err(e) => self.fail(slot_id, container, options, e),
        }
    }

    async fn fetch(
        &self,
        slot_id: &str,
        container: &SlotContainer,
        options: &RenderOptions,
    ) -> Result<Creative, Error> {
        let (measured_width, measured_height) = container.measure();
        let location = self.page.location();

        let request = DeliveryRequest {
            slot_id: slot_id.to_string(),
            width: Some(options.width.unwrap_or(measured_width)),
            height: Some(options.height.unwrap_or(measured_height)),
            referer: Some(
                options
                    .referer
                    .clone()
                    .unwrap_or_else(|| location.to_string()),
            ),
        };

        let creative = self
            .client
            .fetch_creative(
                &self.config.delivery_settings(),
                &location,
                &request,
                options.cancel.as_ref(),
            )
            .await?;
        Ok(creative)
    }

    /// Sanitize and inject `creative` using the configured strategy.
    async fn mount(
        &self,
        slot_id: &str,
        container: &SlotContainer,
        creative: &Creative,
    ) -> Result<RenderMethod, Error> {
        let sanitized = self.sanitizer.sanitize(&creative.html);
        if !is_safe_html(&sanitized) {
            warn!(slot = slot_id, "Sanitized creative still matches unsafe patterns");
        }

        let on_click = self.click_action(slot_id, creative);

        if !self.config.iframe_mode {
            inject_direct(container, creative, &sanitized, on_click);
            return Ok(RenderMethod::Direct);
        }

        let location = self.page.location();
        let frame = build_isolated_frame(
            creative,
            &sanitized,
            &self.page.origin(),
            self.sanitizer.nonce(),
        );
        let gate = MessageGate::new(
            OriginPolicy::new(&location, &self.config.allowed_origins),
            Arc::new(move |_: &ClickMessage| on_click()),
        );

        let loaded = self.page.load_frame(&frame);
        let previous = inject_isolated(container, frame, gate);

        let outcome = match tokio::time::timeout(self.config.api_timeout(), loaded).await {
            Ok(Ok(Ok(()))) => return Ok(RenderMethod::Isolated),
            Ok(Ok(Err(reason))) => reason,
            Ok(Err(_)) => "frame closed before it finished loading".to_string(),
            Err(_) => format!("no load signal within {}ms", self.config.api_timeout),
        };

        container.mount(previous);
        Err(Error::FrameLoad(outcome))
    }

    fn click_action(&self, slot_id: &str, creative: &Creative) -> ClickListener {
        let page = Arc::clone(&self.page);
        let events = Arc::clone(&self.events);
        let click_url = creative.click_url.clone();
        let slot_id = slot_id.to_string();

        Arc::new(move || {
            let Some(url) = click_through_url(&click_url, &page.location()) else {
                return;
            };
            debug!(slot = %slot_id, url = %url, "Opening click-through");
            page.open_window(&url);
            events.emit(&SdkEvent::Click {
                slot_id: slot_id.clone(),
                url: url.to_string(),
            });
        })
    }

    /// Fire-and-forget impression: beacon, else a detached POST.
    fn track_impression(&self, slot_id: &str, creative: &Creative) {
        if creative.impression_url.is_empty() {
            return;
        }

        let url = match self.page.location().join(&creative.impression_url) {
            Ok(url) => url,
            Err(e) => {
                warn!(slot = slot_id, error = %e, "Invalid impression URL");
                return;
            }
        };

        if !self.page.send_beacon(&url) {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let transport = Arc::clone(self.client.transport());
                    let target = url.clone();
                    handle.spawn(async move {
                        if let Err(e) = transport.post(&target).await {
                            debug!(url = %target, error = %e, "Impression request failed");
                        }
                    });
                }
                Err(_) => debug!(url = %url, "No runtime for impression request"),
            }
        }

        self.events.emit(&SdkEvent::Impression {
            slot_id: slot_id.to_string(),
            url: url.to_string(),
        });
    }

    fn fail(
        &self,
        slot_id: &str,
        container: &SlotContainer,
        options: &RenderOptions,
        error: Error,
    ) -> RenderResult {
        warn!(slot = slot_id, error = %error, "Render failed");

        if !self.config.fallback_enabled {
            return RenderResult {
                success: false,
                method: RenderMethod::Fallback,
                creative: None,
                error: Some(error),
            };
        }

        let width = options.width.unwrap_or(DEFAULT_WIDTH);
        let height = options.height.unwrap_or(DEFAULT_HEIGHT);
        container.mount(Mounted::Html(fallback_html(
            &self.config.fallback,
            width,
            height,
            &self.sanitizer,
        )));

        RenderResult {
            success: true,
            method: RenderMethod::Fallback,
            creative: None,
            error: Some(error),
        }
    }
}
