//! Playback automation over the W3C WebDriver protocol.
//!
//! [`WebDriverAutomation`] drives one browser session through a local
//! driver process (geckodriver, chromedriver). Reading state focuses
//! the most recent window, fingerprints its URL, and queries the
//! site's media element; applying state focuses the window already on
//! the target page, opening one when none is, then seeks and toggles
//! playback.
//!
//! All element lookups run under the session's implicit wait, so a
//! page that is still loading gets its chance before a lookup fails.
//! The two boundary methods serialize on an internal lock; the
//! listener task and the controlling task share one session and
//! WebDriver has no notion of concurrent command streams.
//!
//! # Media Elements
//!
//! | Site | Element |
//! |------|---------|
//! | `bilibili-video` | `video` |
//! | `bilibili-bangumi` | `video` |
//! | `mutefun-video` | `video` inside the `#playleft` iframe |
//! | `kugou-music` | `audio` |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{SiteKind, UrlFingerprint};

use super::{MediaAutomation, PlaybackState};

// ============================================================================
// Constants
// ============================================================================

/// Address geckodriver listens on by default.
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:4444";

/// W3C key identifying an element reference in a JSON payload.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Implicit wait applied to the session, in milliseconds. Element
/// lookups block up to this long before failing.
const ELEMENT_WAIT_MS: u64 = 10_000;

/// Upper bound for one driver command round trip. Must exceed the
/// implicit wait or slow lookups die in transit.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// ElementRef
// ============================================================================

/// Reference to a located element, as the driver names it.
struct ElementRef(String);

impl ElementRef {
    /// Extracts the reference from a find-element reply.
    fn from_value(value: &Value) -> Result<Self> {
        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(|id| Self(id.to_string()))
            .ok_or_else(|| Error::automation("find reply carries no element reference"))
    }

    /// Encodes the reference as a script argument.
    fn to_arg(&self) -> Value {
        json!({ ELEMENT_KEY: self.0 })
    }
}

// ============================================================================
// WebDriverAutomation
// ============================================================================

/// A live browser session behind the automation boundary.
///
/// # Lifecycle
///
/// 1. [`connect`](Self::connect) creates the driver session and sets
///    its implicit wait.
/// 2. [`MediaAutomation`] calls observe and steer playback; failures
///    degrade instead of propagating.
/// 3. [`close`](Self::close) deletes the session, closing the browser.
#[derive(Debug)]
pub struct WebDriverAutomation {
    http: reqwest::Client,
    /// Session root, `{driver}/session/{id}`.
    base: String,
    /// One command sequence at a time across both endpoint tasks.
    lock: Mutex<()>,
}

impl WebDriverAutomation {
    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Creates a browser session on a running driver.
    ///
    /// `browser` goes into the session capabilities as the browser
    /// name, `firefox` being what geckodriver expects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Automation`] when the driver refuses the
    /// session and [`Error::Http`] when it is not reachable at all.
    pub async fn connect(webdriver_url: &str, browser: &str) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(COMMAND_TIMEOUT).build()?;
        let root = webdriver_url.trim_end_matches('/');

        let capabilities = json!({
            "capabilities": { "alwaysMatch": { "browserName": browser } }
        });
        let response = http
            .post(format!("{root}/session"))
            .json(&capabilities)
            .send()
            .await?;
        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(Error::automation(format!(
                "session refused: {}",
                error_detail(&payload)
            )));
        }
        let session = payload
            .get("value")
            .and_then(|value| value.get("sessionId"))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::automation("driver reply carries no session id"))?;
        info!(session, browser, "webdriver session created");

        let automation = Self {
            base: format!("{root}/session/{session}"),
            http,
            lock: Mutex::new(()),
        };
        automation
            .command(
                Method::POST,
                "/timeouts",
                Some(&json!({ "implicit": ELEMENT_WAIT_MS })),
            )
            .await?;
        Ok(automation)
    }

    /// Deletes the session, closing the browser it drives.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Automation`] when the driver refuses, which
    /// usually means the session is already gone.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.command(Method::DELETE, "", None).await?;
        info!("webdriver session closed");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // State Access
    // ------------------------------------------------------------------------

    /// Reads the playback state of the most recent window.
    async fn read_state(&self) -> Result<PlaybackState> {
        self.focus_last_window().await?;
        let fingerprint = UrlFingerprint::parse(&self.current_url().await?);
        let site = match &fingerprint {
            UrlFingerprint::Page { site, .. } => *site,
            UrlFingerprint::Void => return Ok(PlaybackState::idle()),
        };

        let media = self.locate_media(site).await?;
        let time = self
            .execute("return arguments[0].currentTime", vec![media.to_arg()])
            .await?
            .as_f64()
            .ok_or_else(|| Error::automation("currentTime is not a number"))?;
        let paused = self
            .execute("return arguments[0].paused", vec![media.to_arg()])
            .await?
            .as_bool()
            .ok_or_else(|| Error::automation("paused is not a boolean"))?;

        Ok(PlaybackState {
            fingerprint,
            time,
            paused,
        })
    }

    /// Seeks and toggles the media of the state's page, focusing or
    /// opening that page first. A void state is a no-op.
    async fn write_state(&self, state: PlaybackState) -> Result<()> {
        let (site, url) = match &state.fingerprint {
            UrlFingerprint::Page { site, url } => (*site, url.as_str()),
            UrlFingerprint::Void => return Ok(()),
        };

        if !self.focus_page(&state.fingerprint).await? {
            self.open_page(url).await?;
        }

        let media = self.locate_media(site).await?;
        self.execute(
            "arguments[0].currentTime = arguments[1]",
            vec![media.to_arg(), json!(state.time)],
        )
        .await?;
        let toggle = if state.paused {
            "arguments[0].pause()"
        } else {
            "arguments[0].play()"
        };
        self.execute(toggle, vec![media.to_arg()]).await?;
        Ok(())
    }

    /// Finds the media element for a site, entering its frame when the
    /// player is framed.
    async fn locate_media(&self, site: SiteKind) -> Result<ElementRef> {
        match site {
            SiteKind::BilibiliVideo | SiteKind::BilibiliBangumi => {
                self.find_element("video").await
            }
            SiteKind::MutefunVideo => {
                let playleft = self.find_element("#playleft").await?;
                let iframe = self.find_element_within(&playleft, "iframe").await?;
                self.switch_frame(&iframe).await?;
                self.find_element("video").await
            }
            SiteKind::KugouMusic => self.find_element("audio").await,
        }
    }

    // ------------------------------------------------------------------------
    // Window Management
    // ------------------------------------------------------------------------

    /// Focuses the most recently opened window. Switching windows also
    /// leaves any iframe a previous lookup entered.
    async fn focus_last_window(&self) -> Result<()> {
        let handles = self.window_handles().await?;
        let last = handles
            .last()
            .ok_or_else(|| Error::automation("no browser windows"))?;
        self.switch_window(last).await
    }

    /// Walks the windows looking for one on the target page; leaves it
    /// focused and reports whether one was found.
    async fn focus_page(&self, target: &UrlFingerprint) -> Result<bool> {
        for handle in self.window_handles().await? {
            self.switch_window(&handle).await?;
            let current = UrlFingerprint::parse(&self.current_url().await?);
            if &current == target {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Opens a page in a new window, keeping the others; falls back to
    /// navigating in place when the browser refuses the popup.
    async fn open_page(&self, url: &str) -> Result<()> {
        match self
            .execute("window.open(arguments[0])", vec![json!(url)])
            .await
        {
            Ok(_) => self.focus_last_window().await,
            Err(err) => {
                debug!(error = %err, "window.open refused, navigating in place");
                self.navigate(url).await
            }
        }
    }

    // ------------------------------------------------------------------------
    // Driver Commands
    // ------------------------------------------------------------------------

    async fn window_handles(&self) -> Result<Vec<String>> {
        let value = self.command(Method::GET, "/window/handles", None).await?;
        value
            .as_array()
            .map(|handles| {
                handles
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .ok_or_else(|| Error::automation("window handles reply is not an array"))
    }

    async fn switch_window(&self, handle: &str) -> Result<()> {
        self.command(Method::POST, "/window", Some(&json!({ "handle": handle })))
            .await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let value = self.command(Method::GET, "/url", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::automation("current url is not a string"))
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.command(Method::POST, "/url", Some(&json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn find_element(&self, selector: &str) -> Result<ElementRef> {
        let value = self
            .command(
                Method::POST,
                "/element",
                Some(&json!({ "using": "css selector", "value": selector })),
            )
            .await?;
        ElementRef::from_value(&value)
    }

    async fn find_element_within(&self, parent: &ElementRef, selector: &str) -> Result<ElementRef> {
        let path = format!("/element/{}/element", parent.0);
        let value = self
            .command(
                Method::POST,
                &path,
                Some(&json!({ "using": "css selector", "value": selector })),
            )
            .await?;
        ElementRef::from_value(&value)
    }

    async fn switch_frame(&self, frame: &ElementRef) -> Result<()> {
        self.command(Method::POST, "/frame", Some(&json!({ "id": frame.to_arg() })))
            .await?;
        Ok(())
    }

    async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(&json!({ "script": script, "args": args })),
        )
        .await
    }

    /// Sends one command to the session and unwraps its `value` field.
    async fn command(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let mut request = self.http.request(method, format!("{}{path}", self.base));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let payload: Value = response.json().await.unwrap_or(Value::Null);
            return Err(Error::automation(format!(
                "driver answered {status}: {}",
                error_detail(&payload)
            )));
        }
        let mut payload: Value = response.json().await?;
        match payload.get_mut("value") {
            Some(value) => Ok(value.take()),
            None => Err(Error::automation("driver reply carries no value field")),
        }
    }
}

/// Pulls the human-readable part out of a driver error body.
fn error_detail(payload: &Value) -> &str {
    payload
        .get("value")
        .and_then(|value| value.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("no detail")
}

// ============================================================================
// MediaAutomation
// ============================================================================

#[async_trait]
impl MediaAutomation for WebDriverAutomation {
    async fn local_state(&self) -> PlaybackState {
        let _guard = self.lock.lock().await;
        match self.read_state().await {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %err, "reading playback state failed, reporting idle");
                PlaybackState::idle()
            }
        }
    }

    async fn apply_state(&self, state: PlaybackState) {
        let _guard = self.lock.lock().await;
        if let Err(err) = self.write_state(state).await {
            warn!(error = %err, "applying playback state failed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{Ipv4Addr, SocketAddr};
    use std::sync::Arc;

    use http_body_util::{BodyExt, Full};
    use hyper::body::{Bytes, Incoming};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;

    type Router = dyn Fn(&Method, &str, &Value) -> (StatusCode, Value) + Send + Sync;

    /// Serves a scripted driver on a random localhost port.
    async fn spawn_stub(router: Arc<Router>) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("bind stub");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let router = router.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |request: Request<Incoming>| {
                        let router = router.clone();
                        async move {
                            let (parts, body) = request.into_parts();
                            let bytes = body.collect().await?.to_bytes();
                            let payload: Value =
                                serde_json::from_slice(&bytes).unwrap_or(Value::Null);
                            let (status, value) =
                                router(&parts.method, parts.uri.path(), &payload);
                            let mut response =
                                Response::new(Full::new(Bytes::from(value.to_string())));
                            *response.status_mut() = status;
                            Ok::<_, hyper::Error>(response)
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });
        addr
    }

    /// Driver with one window sitting on `url`, answering element and
    /// script commands; executed scripts land in `scripts`.
    fn scripted_driver(
        url: &'static str,
        time: f64,
        paused: bool,
        scripts: Arc<parking_lot::Mutex<Vec<String>>>,
    ) -> Arc<Router> {
        Arc::new(move |method: &Method, path: &str, body: &Value| {
            if method == Method::POST && path == "/session" {
                return (StatusCode::OK, json!({ "value": { "sessionId": "stub" } }));
            }
            if method == Method::DELETE {
                return (StatusCode::OK, json!({ "value": null }));
            }
            if path.ends_with("/window/handles") {
                return (StatusCode::OK, json!({ "value": ["w-1"] }));
            }
            if path.ends_with("/url") && method == Method::GET {
                return (StatusCode::OK, json!({ "value": url }));
            }
            if path.ends_with("/execute/sync") {
                let script = body
                    .get("script")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let reply = if script.starts_with("return") && script.contains("currentTime") {
                    json!({ "value": time })
                } else if script.starts_with("return") && script.contains("paused") {
                    json!({ "value": paused })
                } else {
                    json!({ "value": null })
                };
                scripts.lock().push(script);
                return (StatusCode::OK, reply);
            }
            if path.ends_with("/element") {
                return (StatusCode::OK, json!({ "value": { ELEMENT_KEY: "el-1" } }));
            }
            // timeouts, window, frame, navigation
            (StatusCode::OK, json!({ "value": null }))
        })
    }

    async fn connect_to(addr: SocketAddr) -> WebDriverAutomation {
        WebDriverAutomation::connect(&format!("http://{addr}"), "firefox")
            .await
            .expect("connect")
    }

    #[tokio::test]
    async fn test_reads_playing_state() {
        let scripts = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let router = scripted_driver(
            "https://www.bilibili.com/video/BV1vx4y147cK",
            12.5,
            true,
            scripts,
        );
        let automation = connect_to(spawn_stub(router).await).await;

        let state = automation.local_state().await;
        assert_eq!(
            state.fingerprint,
            UrlFingerprint::parse("https://www.bilibili.com/video/BV1vx4y147cK")
        );
        assert_eq!(state.time, 12.5);
        assert!(state.paused);

        automation.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_unrecognized_page_reports_idle() {
        let scripts = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let router = scripted_driver("https://example.com/watch/1", 99.0, false, scripts.clone());
        let automation = connect_to(spawn_stub(router).await).await;

        let state = automation.local_state().await;
        assert!(state.is_idle());
        // No element was queried for a page outside the site table.
        assert!(scripts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_apply_seeks_and_plays_focused_page() {
        let scripts = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let router = scripted_driver(
            "https://www.bilibili.com/video/BV1vx4y147cK",
            0.0,
            true,
            scripts.clone(),
        );
        let automation = connect_to(spawn_stub(router).await).await;

        automation
            .apply_state(PlaybackState {
                fingerprint: UrlFingerprint::parse("https://www.bilibili.com/video/BV1vx4y147cK"),
                time: 64.0,
                paused: false,
            })
            .await;

        let executed = scripts.lock().clone();
        assert_eq!(
            executed,
            vec![
                "arguments[0].currentTime = arguments[1]".to_string(),
                "arguments[0].play()".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_apply_void_state_is_noop() {
        let scripts = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let router = scripted_driver(
            "https://www.bilibili.com/video/BV1vx4y147cK",
            0.0,
            false,
            scripts.clone(),
        );
        let automation = connect_to(spawn_stub(router).await).await;

        automation.apply_state(PlaybackState::idle()).await;
        assert!(scripts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_refused_session_is_automation_error() {
        let router: Arc<Router> = Arc::new(|_method: &Method, _path: &str, _body: &Value| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "value": { "error": "session not created", "message": "boom" } }),
            )
        });
        let addr = spawn_stub(router).await;

        let err = WebDriverAutomation::connect(&format!("http://{addr}"), "firefox")
            .await
            .expect_err("must fail");
        assert!(matches!(err, Error::Automation { .. }));
    }

    #[tokio::test]
    async fn test_driver_failure_degrades_to_idle() {
        let router: Arc<Router> = Arc::new(|method: &Method, path: &str, _body: &Value| {
            if method == Method::POST && path == "/session" {
                return (StatusCode::OK, json!({ "value": { "sessionId": "stub" } }));
            }
            if path.ends_with("/timeouts") {
                return (StatusCode::OK, json!({ "value": null }));
            }
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "value": { "error": "unknown error", "message": "lost the browser" } }),
            )
        });
        let automation = connect_to(spawn_stub(router).await).await;

        let state = automation.local_state().await;
        assert!(state.is_idle());
    }
}
