//! The host page as seen by the renderer.
//!
//! - [`HostPage`]: location, new browsing contexts, beacons and isolated frames
//! - [`HeadlessPage`]: in-memory page that records everything it is asked to do
//! - [`SlotContainer`]: a page region that receives a creative

use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use url::Url;
use uuid::Uuid;

/// Size used when a container can't be measured.
pub const DEFAULT_WIDTH: u32 = 300;
pub const DEFAULT_HEIGHT: u32 = 250;

/// Sandbox flags for isolated frames: scripts and same-origin access only.
pub const FRAME_SANDBOX: &str = "allow-scripts allow-same-origin";

pub const FRAME_CLASS: &str = "adserver-banner-iframe";

/// Signal resolved once an isolated frame finished initializing.
pub type FrameLoad = oneshot::Receiver<Result<(), String>>;

/// Services the embedding page provides.
pub trait HostPage: Send + Sync {
    /// Current page URL.
    fn location(&self) -> Url;

    /// ASCII origin of the page (`scheme://host[:port]`).
    fn origin(&self) -> String {
        self.location().origin().ascii_serialization()
    }

    /// Open `url` in a new top-level browsing context.
    fn open_window(&self, url: &Url);

    /// Queue a beacon. Returns false when beacons aren't supported, in which
    /// case the caller falls back to a plain request.
    fn send_beacon(&self, url: &Url) -> bool;

    /// Attach an isolated frame and report when its document finished loading.
    fn load_frame(&self, frame: &IsolatedFrame) -> FrameLoad;
}

/// How a [`HeadlessPage`] answers frame loads.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameBehavior {
    Load,
    Fail(String),
    /// Never signals; the renderer's timeout has to fire
    Hang,
}

/// Page without a display: records windows, beacons and frames.
pub struct HeadlessPage {
    location: Url,
    beacons_supported: bool,
    frame_behavior: FrameBehavior,
    opened: Mutex<Vec<Url>>,
    beacons: Mutex<Vec<Url>>,
    frames: Mutex<Vec<IsolatedFrame>>,
    // Keeps `Hang` receivers pending instead of closed
    hanging: Mutex<Vec<oneshot::Sender<Result<(), String>>>>,
}

impl HeadlessPage {
    pub fn new(location: Url) -> Self {
        Self {
            location,
            beacons_supported: true,
            frame_behavior: FrameBehavior::Load,
            opened: Mutex::new(Vec::new()),
            beacons: Mutex::new(Vec::new()),
            frames: Mutex::new(Vec::new()),
            hanging: Mutex::new(Vec::new()),
        }
    }

    pub fn without_beacons(mut self) -> Self {
        self.beacons_supported = false;
        self
    }

    pub fn with_frame_behavior(mut self, behavior: FrameBehavior) -> Self {
        self.frame_behavior = behavior;
        self
    }

    pub fn opened_windows(&self) -> Vec<Url> {
        self.opened.lock().clone()
    }

    pub fn beacons(&self) -> Vec<Url> {
        self.beacons.lock().clone()
    }

    pub fn frames(&self) -> Vec<IsolatedFrame> {
        self.frames.lock().clone()
    }
}

impl HostPage for HeadlessPage {
    fn location(&self) -> Url {
        self.location.clone()
    }

    fn open_window(&self, url: &Url) {
        self.opened.lock().push(url.clone());
    }

    fn send_beacon(&self, url: &Url) -> bool {
        if !self.beacons_supported {
            return false;
        }
        self.beacons.lock().push(url.clone());
        true
    }

    fn load_frame(&self, frame: &IsolatedFrame) -> FrameLoad {
        self.frames.lock().push(frame.clone());

        let (tx, rx) = oneshot::channel();
        match &self.frame_behavior {
            FrameBehavior::Load => {
                let _ = tx.send(Ok(()));
            }
            FrameBehavior::Fail(reason) => {
                let _ = tx.send(Err(reason.clone()));
            }
            FrameBehavior::Hang => self.hanging.lock().push(tx),
        }
        rx
    }
}

/// Sandboxed child browsing context holding one creative.
#[derive(Debug, Clone, PartialEq)]
pub struct IsolatedFrame {
    pub id: Uuid,
    pub width: u32,
    pub height: u32,
    pub sandbox: &'static str,
    /// Full document written into the frame
    pub document: String,
}

impl IsolatedFrame {
    /// The `<iframe>` element as it appears in the host tree.
    pub fn element_html(&self) -> String {
        format!(
            r#"<iframe id="adserver-frame-{}" class="{}" title="Advertisement" width="{}" height="{}" sandbox="{}" style="border:none;overflow:hidden;display:block"></iframe>"#,
            self.id, FRAME_CLASS, self.width, self.height, self.sandbox
        )
    }
}

/// Called for clicks intercepted on a directly injected creative.
pub type ClickListener = Arc<dyn Fn() + Send + Sync>;

/// Called for messages posted by an isolated frame; returns whether the
/// message was accepted.
pub type MessageListener = Arc<dyn Fn(&str, &Value) -> bool + Send + Sync>;

/// What a container currently shows.
#[derive(Clone, Default)]
pub enum Mounted {
    #[default]
    Empty,
    /// Markup placed by the page or the fallback path
    Html(String),
    /// Creative injected into the host tree
    Direct {
        html: String,
        on_click: ClickListener,
    },
    /// Creative inside an isolated frame
    Isolated {
        frame: IsolatedFrame,
        on_message: MessageListener,
    },
}

impl fmt::Debug for Mounted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mounted::Empty => f.write_str("Empty"),
            Mounted::Html(html) => f.debug_tuple("Html").field(html).finish(),
            Mounted::Direct { html, .. } => f.debug_struct("Direct").field("html", html).finish(),
            Mounted::Isolated { frame, .. } => {
                f.debug_struct("Isolated").field("frame", &frame.id).finish()
            }
        }
    }
}

/// A page region that can host a creative.
#[derive(Debug, Default)]
pub struct SlotContainer {
    slot_id: Option<String>,
    /// Rendered box from layout, if any
    bounding_box: Option<(f64, f64)>,
    /// Computed CSS `width`/`height`, e.g. `"728px"`
    computed_width: Option<String>,
    computed_height: Option<String>,
    content: Mutex<Mounted>,
}

impl SlotContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Container carrying a `data-slot-id` attribute.
    pub fn for_slot(slot_id: impl Into<String>) -> Self {
        Self {
            slot_id: Some(slot_id.into()),
            ..Self::default()
        }
    }

    pub fn with_box(mut self, width: f64, height: f64) -> Self {
        self.bounding_box = Some((width, height));
        self
    }

    pub fn with_computed_size(mut self, width: &str, height: &str) -> Self {
        self.computed_width = Some(width.to_string());
        self.computed_height = Some(height.to_string());
        self
    }

    pub fn with_html(self, html: impl Into<String>) -> Self {
        *self.content.lock() = Mounted::Html(html.into());
        self
    }

    pub fn slot_id(&self) -> Option<&str> {
        self.slot_id.as_deref()
    }

    /// Size to request for this container: rendered box, then computed CSS,
    /// then 300x250.
    pub fn measure(&self) -> (u32, u32) {
        if let Some((width, height)) = self.bounding_box {
            if width > 0.0 && height > 0.0 {
                return (width.round() as u32, height.round() as u32);
            }
        }

        let css = |value: &Option<String>| value.as_deref().map(parse_css_pixels);
        if let (Some(Some(width)), Some(Some(height))) =
            (css(&self.computed_width), css(&self.computed_height))
        {
            if width > 0 && height > 0 {
                return (width as u32, height as u32);
            }
        }

        (DEFAULT_WIDTH, DEFAULT_HEIGHT)
    }

    pub fn mounted(&self) -> Mounted {
        self.content.lock().clone()
    }

    /// Replace the content, returning what was there before.
    pub fn mount(&self, content: Mounted) -> Mounted {
        std::mem::replace(&mut *self.content.lock(), content)
    }

    /// The container's markup as the host tree would serialize it.
    pub fn inner_html(&self) -> String {
        match &*self.content.lock() {
            Mounted::Empty => String::new(),
            Mounted::Html(html) | Mounted::Direct { html, .. } => html.clone(),
            Mounted::Isolated { frame, .. } => frame.element_html(),
        }
    }

    /// Deliver a click whose target-to-container path is `path` (tag names,
    /// innermost first). Returns true when default navigation was suppressed.
    pub fn dispatch_click(&self, path: &[&str]) -> bool {
        let listener = match &*self.content.lock() {
            Mounted::Direct { on_click, .. } => Arc::clone(on_click),
            _ => return false,
        };

        let on_link_or_image = path
            .iter()
            .any(|tag| tag.eq_ignore_ascii_case("a") || tag.eq_ignore_ascii_case("img"));
        if !on_link_or_image {
            return false;
        }

        listener();
        true
    }

    /// Deliver a message posted from this container's isolated frame.
    pub fn post_message(&self, origin: &str, data: &Value) -> bool {
        let listener = match &*self.content.lock() {
            Mounted::Isolated { on_message, .. } => Arc::clone(on_message),
            _ => return false,
        };
        listener(origin, data)
    }
}

/// `parseInt` of a CSS length: the leading integer, if any.
fn parse_css_pixels(value: &str) -> Option<i64> {
    let trimmed = value.trim_start();
    let end = trimmed
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && *c == '-')))
        .map_or(trimmed.len(), |(i, _)| i);
    trimmed[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_measure_prefers_box() {
        let container = SlotContainer::new()
            .with_box(727.6, 90.2)
            .with_computed_size("100px", "100px");
        assert_eq!(container.measure(), (728, 90));
    }

    #[test]
    fn test_measure_falls_back_to_css() {
        let container = SlotContainer::new()
            .with_box(0.0, 90.0)
            .with_computed_size("320px", "50.5px");
        assert_eq!(container.measure(), (320, 50));
    }

    #[test]
    fn test_measure_default() {
        assert_eq!(SlotContainer::new().measure(), (300, 250));
        let container = SlotContainer::new().with_computed_size("auto", "0px");
        assert_eq!(container.measure(), (300, 250));
    }

    #[test]
    fn test_parse_css_pixels() {
        assert_eq!(parse_css_pixels("728px"), Some(728));
        assert_eq!(parse_css_pixels(" -5px"), Some(-5));
        assert_eq!(parse_css_pixels("auto"), None);
    }

    #[test]
    fn test_direct_click_dispatch() {
        let clicks = Arc::new(AtomicUsize::new(0));
        let counter = clicks.clone();
        let container = SlotContainer::new();
        container.mount(Mounted::Direct {
            html: "<a><img></a>".into(),
            on_click: Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        });

        assert!(container.dispatch_click(&["img", "a", "div"]));
        assert!(container.dispatch_click(&["A"]));
        assert!(!container.dispatch_click(&["span", "div"]));
        assert_eq!(clicks.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_click_on_static_html_ignored() {
        let container = SlotContainer::new().with_html("<a>x</a>");
        assert!(!container.dispatch_click(&["a"]));
        assert!(!container.post_message("https://x", &Value::Null));
        assert_eq!(container.inner_html(), "<a>x</a>");
    }

    #[tokio::test]
    async fn test_headless_frames() {
        let frame = IsolatedFrame {
            id: Uuid::new_v4(),
            width: 300,
            height: 250,
            sandbox: FRAME_SANDBOX,
            document: String::new(),
        };

        let page = HeadlessPage::new(Url::parse("https://pub.example.com/").unwrap());
        assert_eq!(page.load_frame(&frame).await, Ok(Ok(())));

        let page = HeadlessPage::new(Url::parse("https://pub.example.com/").unwrap())
            .with_frame_behavior(FrameBehavior::Fail("blocked".into()));
        assert_eq!(page.load_frame(&frame).await, Ok(Err("blocked".to_string())));
        assert_eq!(page.frames().len(), 1);
        assert!(frame.element_html().contains(r#"sandbox="allow-scripts allow-same-origin""#));
    }

    #[test]
    fn test_headless_beacons() {
        let url = Url::parse("https://api/imp").unwrap();
        let page = HeadlessPage::new(Url::parse("https://pub.example.com/").unwrap());
        assert!(page.send_beacon(&url));
        assert_eq!(page.beacons(), vec![url.clone()]);
        assert_eq!(page.origin(), "https://pub.example.com");

        let page = page.without_beacons();
        assert!(!page.send_beacon(&url));
    }
}
