//! Injection strategies.
//!
//! Direct: sanitized markup inside a sized wrapper in the host tree, with
//! link/image clicks intercepted at the wrapper.
//!
//! Isolated: sanitized markup written into a sandboxed frame whose only way
//! out is a click message to the parent (see [`crate::bridge`]).

use crate::bridge::{frame_bridge_script, MessageGate};
use crate::fetch::Creative;
use crate::page::{ClickListener, IsolatedFrame, Mounted, SlotContainer, FRAME_SANDBOX};
use std::sync::Arc;
use tracing::warn;
use url::Url;
use uuid::Uuid;

/// Query parameter carrying the page URL on click-through.
pub const REFERRER_PARAM: &str = "referrer";

/// Click-through URL: the creative's click URL with `referrer` set to the
/// current page. A relative click URL resolves against the page.
pub fn click_through_url(click_url: &str, page_location: &Url) -> Option<Url> {
    if click_url.is_empty() {
        return None;
    }

    let mut url = match page_location.join(click_url) {
        Ok(url) => url,
        Err(e) => {
            warn!(click_url, error = %e, "Invalid click URL");
            return None;
        }
    };

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != REFERRER_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(REFERRER_PARAM, page_location.as_str());

    Some(url)
}

/// Wrapper markup for direct injection.
pub fn direct_wrapper_html(creative: &Creative, sanitized_html: &str) -> String {
    format!(
        r#"<div class="adserver-banner" style="width:{}px;height:{}px;display:inline-block;position:relative">{}</div>"#,
        creative.width, creative.height, sanitized_html
    )
}

/// Mount `sanitized_html` directly into `container`. Returns the previous
/// content.
pub fn inject_direct(
    container: &SlotContainer,
    creative: &Creative,
    sanitized_html: &str,
    on_click: ClickListener,
) -> Mounted {
    container.mount(Mounted::Direct {
        html: direct_wrapper_html(creative, sanitized_html),
        on_click,
    })
}

/// Build the isolated frame for a creative.
///
/// The document carries the sanitized creative plus the SDK's own bridge
/// script and base style, both stamped with `nonce` when one is configured.
pub fn build_isolated_frame(
    creative: &Creative,
    sanitized_html: &str,
    parent_origin: &str,
    nonce: Option<&str>,
) -> IsolatedFrame {
    let nonce_attr = nonce
        .map(|n| format!(r#" nonce="{}""#, n))
        .unwrap_or_default();

    let document = format!(
        concat!(
            "<!DOCTYPE html><html><head><meta charset=\"UTF-8\">",
            "<style{nonce}>body{{margin:0;padding:0;overflow:hidden}}a{{text-decoration:none}}",
            "img{{border:none;display:block;max-width:100%}}</style>",
            "</head><body>{body}<script{nonce}>{script}</script></body></html>"
        ),
        nonce = nonce_attr,
        body = sanitized_html,
        script = frame_bridge_script(parent_origin),
    );

    IsolatedFrame {
        id: Uuid::new_v4(),
        width: creative.width,
        height: creative.height,
        sandbox: FRAME_SANDBOX,
        document,
    }
}

/// Mount an isolated frame into `container`, routing its messages through
/// `gate`. Returns the previous content.
pub fn inject_isolated(container: &SlotContainer, frame: IsolatedFrame, gate: MessageGate) -> Mounted {
    let gate = Arc::new(gate);
    container.mount(Mounted::Isolated {
        frame,
        on_message: Arc::new(move |origin, data| gate.handle(origin, data)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{ClickMessage, OriginPolicy};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn creative() -> Creative {
        Creative {
            html: String::new(),
            width: 728,
            height: 90,
            click_url: "https://api/click?c=1".to_string(),
            impression_url: "https://api/imp".to_string(),
            campaign_id: String::new(),
        }
    }

    fn page() -> Url {
        Url::parse("https://pub.example.com/news?id=7").unwrap()
    }

    #[test]
    fn test_click_through_url() {
        let url = click_through_url("https://api/click?c=1", &page()).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api/click?c=1&referrer=https%3A%2F%2Fpub.example.com%2Fnews%3Fid%3D7"
        );

        // Existing referrer is replaced, not duplicated
        let url = click_through_url("https://api/click?referrer=old", &page()).unwrap();
        assert_eq!(url.query_pairs().filter(|(k, _)| k == "referrer").count(), 1);

        let url = click_through_url("/click", &page()).unwrap();
        assert!(url.as_str().starts_with("https://pub.example.com/click?referrer="));

        assert!(click_through_url("", &page()).is_none());
    }

    #[test]
    fn test_direct_wrapper() {
        let container = SlotContainer::new();
        inject_direct(&container, &creative(), "<img src=\"ad.jpg\">", Arc::new(|| {}));
        assert_eq!(
            container.inner_html(),
            r#"<div class="adserver-banner" style="width:728px;height:90px;display:inline-block;position:relative"><img src="ad.jpg"></div>"#
        );
    }

    #[test]
    fn test_isolated_frame_document() {
        let frame = build_isolated_frame(&creative(), "<p>ad</p>", "https://pub.example.com", Some("n0nce"));
        assert_eq!((frame.width, frame.height), (728, 90));
        assert_eq!(frame.sandbox, "allow-scripts allow-same-origin");
        assert!(frame.document.contains("<body><p>ad</p><script nonce=\"n0nce\">"));
        assert!(frame.document.contains("<style nonce=\"n0nce\">"));

        let frame = build_isolated_frame(&creative(), "<p>ad</p>", "https://pub.example.com", None);
        assert!(frame.document.contains("<style>"));
        assert!(frame.document.contains("<script>"));
    }

    #[test]
    fn test_isolated_messages_gated() {
        let clicks = Arc::new(AtomicUsize::new(0));
        let counter = clicks.clone();
        let gate = MessageGate::new(
            OriginPolicy::new(&page(), &[]),
            Arc::new(move |_: &ClickMessage| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let container = SlotContainer::new();
        let frame = build_isolated_frame(&creative(), "", "https://pub.example.com", None);
        inject_isolated(&container, frame, gate);
        assert!(container.inner_html().starts_with("<iframe id=\"adserver-frame-"));

        let click = json!({"type": "adserver-click"});
        assert!(!container.post_message("https://attacker.example", &click));
        assert_eq!(clicks.load(Ordering::SeqCst), 0);
        assert!(container.post_message("https://pub.example.com", &click));
        assert_eq!(clicks.load(Ordering::SeqCst), 1);
    }
}
