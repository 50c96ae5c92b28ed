//! SDK context - one explicit handle per page.
//!
//! Lifecycle: `uninitialized -> ready -> destroyed`
//! - `init` is idempotent: calling it again logs a warning and merges the
//!   new overrides into the current configuration
//! - `destroy` emits `destroy`, drops every listener and is final
//! - `init` after `destroy` is an error, as is rendering outside `ready`
//!
//! Every error the SDK sees (render failures, failing hooks) goes through one
//! path: error tracker, `error` event, then the page's `on_error` hook.

use crate::cache::BannerCache;
use crate::config::{resolve_config, Hook, PartialConfig, SdkConfig};
use crate::error::{Error, Result};
use crate::events::{EventBus, SdkEvent};
use crate::fetch::{DeliveryClient, HttpTransport, Transport};
use crate::page::{HostPage, SlotContainer};
use crate::render::{RenderOptions, RenderResult, Renderer};
use crate::storage::{MemoryStorage, Storage};
use crate::telemetry::ErrorTracker;
use crate::VERSION;
use parking_lot::RwLock;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Uninitialized,
    Ready,
    Destroyed,
}

/// The SDK context handed to everything that renders.
pub struct Sdk<T: Transport = HttpTransport> {
    lifecycle: RwLock<Lifecycle>,
    config: RwLock<Arc<SdkConfig>>,
    client: DeliveryClient<T>,
    storage: Arc<dyn Storage>,
    page: Arc<dyn HostPage>,
    events: Arc<EventBus>,
    errors: ErrorTracker,
}

impl Sdk<HttpTransport> {
    /// SDK over reqwest with session-scoped in-memory storage.
    pub fn with_http(page: Arc<dyn HostPage>) -> anyhow::Result<Self> {
        Ok(Self::new(
            HttpTransport::new()?,
            page,
            Arc::new(MemoryStorage::new()),
        ))
    }
}

impl<T: Transport> Sdk<T> {
    pub fn new(transport: T, page: Arc<dyn HostPage>, storage: Arc<dyn Storage>) -> Self {
        Self {
            lifecycle: RwLock::new(Lifecycle::Uninitialized),
            config: RwLock::new(Arc::new(SdkConfig::default())),
            client: DeliveryClient::new(transport),
            storage,
            page,
            events: Arc::new(EventBus::new()),
            errors: ErrorTracker::new(),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.read()
    }

    pub fn is_ready(&self) -> bool {
        self.lifecycle() == Lifecycle::Ready
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<SdkConfig> {
        Arc::clone(&self.config.read())
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn errors(&self) -> &ErrorTracker {
        &self.errors
    }

    /// Resolve the configuration and move to `ready`.
    ///
    /// `global_json` is the page-level config object; if it fails to parse it
    /// is ignored with a warning. A failing `on_init`/`on_ready` hook is
    /// reported and returned, but the SDK stays ready.
    pub fn init(
        &self,
        overrides: PartialConfig,
        script: PartialConfig,
        global_json: Option<&str>,
    ) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.write();
            let state = *lifecycle;
            match state {
                Lifecycle::Destroyed => {
                    drop(lifecycle);
                    let err = Error::Destroyed;
                    self.errors.capture(&err, Some("init"));
                    return Err(err);
                }
                Lifecycle::Ready => {
                    drop(lifecycle);
                    warn!("SDK already initialized, updating config");
                    return self.update_config(overrides);
                }
                Lifecycle::Uninitialized => {}
            }

            let global = match global_json {
                Some(json) => PartialConfig::from_global_json(json).unwrap_or_else(|e| {
                    warn!(error = %e, "Ignoring malformed global config");
                    PartialConfig::default()
                }),
                None => PartialConfig::default(),
            };

            *self.config.write() = Arc::new(resolve_config(overrides, script, global));
            *lifecycle = Lifecycle::Ready;
        }

        let config = self.config();
        info!(
            version = VERSION,
            endpoint = %config.api_endpoint,
            iframe_mode = config.iframe_mode,
            "SDK initialized"
        );
        self.events.emit(&SdkEvent::Init { version: VERSION });
        self.events.emit(&SdkEvent::Ready);

        self.run_hook("onInit", config.hooks.on_init.as_ref())?;
        self.run_hook("onReady", config.hooks.on_ready.as_ref())?;
        Ok(())
    }

    fn run_hook(&self, hook: &'static str, callback: Option<&Hook>) -> Result<()> {
        let Some(callback) = callback else {
            return Ok(());
        };

        callback().map_err(|e| {
            let err = Error::Hook {
                hook,
                message: format!("{:#}", e),
            };
            self.report(&err, "init");
            err
        })
    }

    /// Track `err`, emit it, and hand it to the page's error hook.
    fn report(&self, err: &Error, context: &str) {
        self.errors.capture(err, Some(context));
        self.events.emit(&SdkEvent::Error {
            message: err.to_string(),
        });

        let on_error = self.config.read().hooks.on_error.clone();
        if let Some(on_error) = on_error {
            if catch_unwind(AssertUnwindSafe(|| on_error(err))).is_err() {
                error!("onError callback panicked");
            }
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.lifecycle() {
            Lifecycle::Ready => Ok(()),
            Lifecycle::Uninitialized => Err(Error::NotInitialized),
            Lifecycle::Destroyed => Err(Error::Destroyed),
        }
    }

    /// Merge `overrides` into the current configuration.
    ///
    /// The merged record replaces the current one only if it validates as a
    /// whole; otherwise the current record stays and the error is returned.
    pub fn update_config(&self, overrides: PartialConfig) -> Result<()> {
        self.ensure_ready()?;

        let current = self.config();
        let next = SdkConfig::from_partial(overrides.or(PartialConfig::from(current.as_ref())))
            .map_err(|e| {
                warn!(error = %e, "Rejected config update");
                Error::from(e)
            })?;

        debug!(config = ?next, "Config updated");
        *self.config.write() = Arc::new(next);
        self.events.emit(&SdkEvent::Config);
        Ok(())
    }

    fn cache(&self, config: &SdkConfig) -> BannerCache {
        BannerCache::new(
            Arc::clone(&self.storage),
            config.cache_enabled,
            config.cache_ttl(),
        )
    }

    fn renderer(&self) -> Renderer<T> {
        let config = self.config();
        let cache = self.cache(&config);
        Renderer::new(
            config,
            cache,
            self.client.clone(),
            Arc::clone(&self.page),
            Arc::clone(&self.events),
        )
    }

    /// Render `slot_id` into `container`.
    ///
    /// Only lifecycle violations are returned as `Err`; delivery and
    /// injection failures come back inside the [`RenderResult`] and are also
    /// reported through the error path.
    pub async fn render(
        &self,
        slot_id: &str,
        container: &SlotContainer,
        options: RenderOptions,
    ) -> Result<RenderResult> {
        self.ensure_ready()?;

        let result = self.renderer().render(slot_id, container, options).await;
        if let Some(err) = &result.error {
            self.report(err, &format!("render:{}", slot_id));
        }
        Ok(result)
    }

    /// Render every container that carries a `data-slot-id`, in order.
    pub async fn auto_render(
        &self,
        containers: &[SlotContainer],
    ) -> Result<Vec<(String, RenderResult)>> {
        self.ensure_ready()?;

        let mut results = Vec::new();
        for container in containers {
            let Some(slot_id) = container.slot_id() else {
                continue;
            };
            let result = self.render(slot_id, container, RenderOptions::default()).await?;
            results.push((slot_id.to_string(), result));
        }
        Ok(results)
    }

    /// Drop every cached creative. Works in any lifecycle state.
    pub fn clear_cache(&self) {
        self.cache(&self.config()).clear();
        debug!("Cache cleared");
    }

    pub fn cache_size(&self) -> usize {
        self.cache(&self.config()).size()
    }

    /// Tear down: emit `destroy`, remove all listeners. Idempotent.
    pub fn destroy(&self) {
        {
            let mut lifecycle = self.lifecycle.write();
            if *lifecycle == Lifecycle::Destroyed {
                return;
            }
            *lifecycle = Lifecycle::Destroyed;
        }

        info!("Destroying SDK");
        self.events.emit(&SdkEvent::Destroy);
        self.events.off_all(None);
    }

    /// Snapshot for debugging: version, lifecycle, config, cache size and
    /// captured errors.
    pub fn debug_info(&self) -> serde_json::Value {
        serde_json::json!({
            "version": VERSION,
            "lifecycle": self.lifecycle(),
            "config": &*self.config(),
            "cacheSize": self.cache_size(),
            "errors": self.errors.entries(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeliveryError;
    use crate::events::EventKind;
    use crate::fetch::testing::{creative_body, ScriptedTransport};
    use crate::page::HeadlessPage;
    use crate::render::RenderMethod;
    use crate::config::Hooks;
    use parking_lot::Mutex;
    use url::Url;

    fn sdk(transport: ScriptedTransport) -> Sdk<ScriptedTransport> {
        let page = HeadlessPage::new(Url::parse("https://pub.example.com/").unwrap());
        Sdk::new(transport, Arc::new(page), Arc::new(MemoryStorage::new()))
    }

    fn record(sdk: &Sdk<ScriptedTransport>, kinds: &[EventKind]) -> Arc<Mutex<Vec<EventKind>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in kinds {
            let seen = seen.clone();
            sdk.events().on(*kind, move |event| seen.lock().push(event.kind()));
        }
        seen
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let sdk = sdk(ScriptedTransport::new());
        let container = SlotContainer::new();

        assert_eq!(sdk.lifecycle(), Lifecycle::Uninitialized);
        assert_eq!(
            sdk.render("top", &container, RenderOptions::default()).await,
            Err(Error::NotInitialized)
        );

        let seen = record(&sdk, &[EventKind::Init, EventKind::Ready, EventKind::Destroy]);
        sdk.init(PartialConfig::default(), PartialConfig::default(), None)
            .unwrap();
        assert!(sdk.is_ready());

        sdk.destroy();
        sdk.destroy();
        assert_eq!(
            *seen.lock(),
            vec![EventKind::Init, EventKind::Ready, EventKind::Destroy]
        );
        assert!(sdk.events().event_names().is_empty());

        assert_eq!(
            sdk.init(PartialConfig::default(), PartialConfig::default(), None),
            Err(Error::Destroyed)
        );
        assert_eq!(
            sdk.render("top", &container, RenderOptions::default()).await,
            Err(Error::Destroyed)
        );
        assert_eq!(sdk.errors().len(), 1);
    }

    #[test]
    fn test_second_init_updates_config() {
        let sdk = sdk(ScriptedTransport::new());
        sdk.init(PartialConfig::default(), PartialConfig::default(), None)
            .unwrap();
        let seen = record(&sdk, &[EventKind::Init, EventKind::Config]);

        let overrides = PartialConfig {
            iframe_mode: Some(true),
            ..Default::default()
        };
        sdk.init(overrides, PartialConfig::default(), None).unwrap();

        assert!(sdk.config().iframe_mode);
        assert_eq!(*seen.lock(), vec![EventKind::Config]);
    }

    #[test]
    fn test_config_sources() {
        let sdk = sdk(ScriptedTransport::new());
        let script = PartialConfig {
            api_timeout: Some(1_500.0),
            ..Default::default()
        };
        sdk.init(
            PartialConfig::default(),
            script,
            Some(r#"{"apiTimeout": 9000, "cacheEnabled": false}"#),
        )
        .unwrap();

        let config = sdk.config();
        assert_eq!(config.api_timeout, 1_500);
        assert!(!config.cache_enabled);
    }

    #[test]
    fn test_malformed_global_config_ignored() {
        let sdk = sdk(ScriptedTransport::new());
        sdk.init(PartialConfig::default(), PartialConfig::default(), Some("{not json"))
            .unwrap();
        assert_eq!(sdk.config().api_endpoint, "/api/v1");
    }

    #[test]
    fn test_invalid_update_keeps_current_config() {
        let sdk = sdk(ScriptedTransport::new());
        assert_eq!(
            sdk.update_config(PartialConfig::default()),
            Err(Error::NotInitialized)
        );

        sdk.init(PartialConfig::default(), PartialConfig::default(), None)
            .unwrap();
        sdk.update_config(PartialConfig {
            api_timeout: Some(2_000.0),
            ..Default::default()
        })
        .unwrap();

        let err = sdk
            .update_config(PartialConfig {
                retry_delay: Some(5.0),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(sdk.config().api_timeout, 2_000);
        assert_eq!(sdk.config().retry_delay, 1_000);
    }

    #[test]
    fn test_failing_hook_reported() {
        let sdk = sdk(ScriptedTransport::new());
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();

        let overrides = PartialConfig {
            hooks: Hooks {
                on_init: Some(Arc::new(|| -> anyhow::Result<()> {
                    Err(anyhow::anyhow!("page not ready"))
                })),
                on_error: Some(Arc::new(move |e: &Error| sink.lock().push(e.to_string()))),
                ..Default::default()
            },
            ..Default::default()
        };
        let seen = record(&sdk, &[EventKind::Error]);

        let err = sdk
            .init(overrides, PartialConfig::default(), None)
            .unwrap_err();
        assert_eq!(
            err,
            Error::Hook {
                hook: "onInit",
                message: "page not ready".to_string()
            }
        );
        assert!(sdk.is_ready());
        assert_eq!(*reported.lock(), vec!["onInit callback failed: page not ready"]);
        assert_eq!(*seen.lock(), vec![EventKind::Error]);
        assert_eq!(sdk.errors().entries()[0].context.as_deref(), Some("init"));
    }

    #[tokio::test]
    async fn test_render_and_cache_management() {
        let transport = ScriptedTransport::new();
        transport.push_body(&creative_body("<p>ad</p>", 300, 250));
        let sdk = sdk(transport);
        sdk.init(PartialConfig::default(), PartialConfig::default(), None)
            .unwrap();
        let seen = record(&sdk, &[EventKind::Render, EventKind::Impression]);

        let result = sdk
            .render("top", &SlotContainer::new(), RenderOptions::default())
            .await
            .unwrap();
        assert_eq!(result.method, RenderMethod::Direct);
        assert_eq!(*seen.lock(), vec![EventKind::Impression, EventKind::Render]);
        assert_eq!(sdk.cache_size(), 1);

        sdk.clear_cache();
        assert_eq!(sdk.cache_size(), 0);
        assert!(sdk.errors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_failure_reported() {
        let transport = ScriptedTransport::new();
        transport.always(Err(DeliveryError::Transport("offline".into())));
        let sdk = sdk(transport);
        sdk.init(
            PartialConfig {
                retry_enabled: Some(false),
                ..Default::default()
            },
            PartialConfig::default(),
            None,
        )
        .unwrap();

        let result = sdk
            .render("top", &SlotContainer::new(), RenderOptions::default())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.method, RenderMethod::Fallback);

        let errors = sdk.errors().entries();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].context.as_deref(), Some("render:top"));
        assert!(errors[0].message.contains("offline"));
    }

    #[tokio::test]
    async fn test_auto_render() {
        let transport = ScriptedTransport::new();
        transport
            .push_body(&creative_body("<p>one</p>", 300, 250))
            .push_body(&creative_body("<p>two</p>", 728, 90));
        let sdk = sdk(transport);
        sdk.init(PartialConfig::default(), PartialConfig::default(), None)
            .unwrap();

        let containers = [
            SlotContainer::for_slot("sidebar"),
            SlotContainer::new(),
            SlotContainer::for_slot("footer"),
        ];
        let results = sdk.auto_render(&containers).await.unwrap();

        let slots: Vec<&str> = results.iter().map(|(slot, _)| slot.as_str()).collect();
        assert_eq!(slots, vec!["sidebar", "footer"]);
        assert!(results.iter().all(|(_, r)| r.success));
        assert!(containers[0].inner_html().contains("<p>one</p>"));
        assert_eq!(containers[1].inner_html(), "");
        assert!(containers[2].inner_html().contains("<p>two</p>"));
    }

    #[test]
    fn test_debug_info() {
        let sdk = sdk(ScriptedTransport::new());
        sdk.init(PartialConfig::default(), PartialConfig::default(), None)
            .unwrap();

        let info = sdk.debug_info();
        assert_eq!(info["version"], VERSION);
        assert_eq!(info["lifecycle"], "ready");
        assert_eq!(info["config"]["apiEndpoint"], "/api/v1");
        assert_eq!(info["config"]["cacheTTL"], 300_000);
        assert_eq!(info["cacheSize"], 0);
        assert!(info["errors"].as_array().unwrap().is_empty());
    }
}
