//! # Ad Sandbox
//!
//! Ad delivery, caching and safe-rendering engine for publisher pages.
//!
//! ## Security Guarantees
//!
//! - **No creative scripts**: every `<script>` element is stripped before
//!   markup reaches the page
//! - **No inline handlers**: `on*` attributes are removed in any quoting style
//! - **No dangerous URLs**: `javascript:`, `data:` and friends are neutralized
//!   in `href`, `src` and CSS `url(...)`
//! - **Isolated frames**: optional sandboxed rendering whose only channel back
//!   is an origin-checked click message
//! - **Click-through by the SDK**: tracking URLs are opened, never executed
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ad_sandbox::{HeadlessPage, PartialConfig, RenderOptions, Sdk, SlotContainer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let page = HeadlessPage::new("https://publisher.example.com/".parse()?);
//!     let sdk = Sdk::with_http(Arc::new(page))?;
//!     sdk.init(PartialConfig::default(), PartialConfig::default(), None)?;
//!
//!     let container = SlotContainer::new().with_box(728.0, 90.0);
//!     let result = sdk
//!         .render("demo-leaderboard", &container, RenderOptions::default())
//!         .await?;
//!
//!     println!("{} via {}", result.success, result.method);
//!     Ok(())
//! }
//! ```

mod bridge;
mod cache;
mod config;
mod error;
mod events;
mod fetch;
mod inject;
mod page;
mod render;
mod runtime;
mod sanitize;
mod storage;
mod telemetry;
mod validate;

/// Crate version reported in `init` events and debug info.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use bridge::{frame_bridge_script, ClickMessage, MessageGate, OriginPolicy, CLICK_MESSAGE_TYPE};
pub use cache::{cache_key, BannerCache, CACHE_KEY_PREFIX};
pub use config::{
    resolve_config, ErrorHook, FallbackConfig, Hook, Hooks, PartialConfig, SdkConfig,
    GLOBAL_CONFIG_NAME,
};
pub use error::{DeliveryError, Error, Result, StorageError};
pub use events::{EventBus, EventKind, ListenerId, SdkEvent};
pub use fetch::{
    backoff_delay, delivery_url, parse_delivery_response, Creative, DeliveryClient,
    DeliveryRequest, DeliveryResponse, DeliverySettings, HttpResponse, HttpTransport,
    RetryPolicy, Transport,
};
pub use inject::{click_through_url, inject_direct, inject_isolated};
pub use page::{FrameBehavior, HeadlessPage, HostPage, IsolatedFrame, Mounted, SlotContainer};
pub use render::{fallback_html, RenderMethod, RenderOptions, RenderResult, Renderer};
pub use runtime::{Lifecycle, Sdk};
pub use sanitize::{
    create_safe_element, generate_nonce, is_safe_html, sanitize_html, strip_script_tags,
    Sanitizer,
};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use telemetry::{CapturedError, ErrorTracker};
pub use validate::{
    validate_api_endpoint, validate_csp_nonce, validate_number_range, validate_slot_id,
    validate_url, ValidationError, ValidationErrorCode,
};
