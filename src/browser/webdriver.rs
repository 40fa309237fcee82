//! Minimal W3C WebDriver client.
//!
//! Speaks the JSON wire format of the WebDriver recommendation directly over
//! `reqwest`, which is all a sequential page crawler needs:
//!
//! ```text
//! POST   /session                     start a browser
//! POST   /session/{id}/url            navigate
//! POST   /session/{id}/element        find element (polled while waiting)
//! GET    /session/{id}/source         rendered markup
//! DELETE /session/{id}                quit
//! ```
//!
//! Provisioning (driver install, sandbox flags) is expressed only through the
//! capabilities sent on session creation; the driver process itself must
//! already be listening at [`WebDriverOptions::endpoint`].

use reqwest::{Client, Method};
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use super::BrowserSession;
use crate::error::BrowserError;

/// W3C error code returned while a waited-for element is not there yet.
const NO_SUCH_ELEMENT: &str = "no such element";

/// Settings used to provision a browser session.
#[derive(Debug, Clone)]
pub struct WebDriverOptions {
    /// Base URL of the running driver, e.g. `http://localhost:9515`.
    pub endpoint: String,
    /// Run Chrome without a visible window.
    pub headless: bool,
    pub window_size: (u32, u32),
    /// Delay between element lookups while waiting for rendering.
    pub poll_interval: Duration,
}

impl Default for WebDriverOptions {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9515".to_string(),
            headless: true,
            window_size: (1280, 2000),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl WebDriverOptions {
    /// New-session payload with Chrome arguments for this configuration.
    pub fn capabilities(&self) -> Value {
        let mut args = Vec::new();
        if self.headless {
            args.push("--headless=new".to_string());
        }
        args.push("--no-sandbox".to_string());
        args.push("--disable-gpu".to_string());
        args.push(format!(
            "--window-size={},{}",
            self.window_size.0, self.window_size.1
        ));

        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args }
                }
            }
        })
    }
}

/// A live WebDriver session.
pub struct WebDriverSession {
    client: Client,
    endpoint: String,
    session_id: Option<String>,
    poll_interval: Duration,
}

impl std::fmt::Debug for WebDriverSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebDriverSession")
            .field("endpoint", &self.endpoint)
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl WebDriverSession {
    /// Start a new browser through the driver at `options.endpoint`.
    #[instrument(level = "info", skip_all, fields(endpoint = %options.endpoint, headless = options.headless))]
    pub async fn start(options: &WebDriverOptions) -> Result<Self, BrowserError> {
        let client = Client::new();
        let endpoint = options.endpoint.trim_end_matches('/').to_string();

        let value = send(
            &client,
            Method::POST,
            &format!("{endpoint}/session"),
            Some(options.capabilities()),
        )
        .await?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::Malformed("new session response lacks sessionId".into()))?
            .to_string();

        info!(%session_id, "Browser session started");
        Ok(Self {
            client,
            endpoint,
            session_id: Some(session_id),
            poll_interval: options.poll_interval,
        })
    }

    fn session_url(&self, suffix: &str) -> Result<String, BrowserError> {
        let id = self.session_id.as_deref().ok_or(BrowserError::Released)?;
        Ok(format!("{}/session/{}{}", self.endpoint, id, suffix))
    }

    async fn command(
        &self,
        method: Method,
        suffix: &str,
        body: Option<Value>,
    ) -> Result<Value, BrowserError> {
        let url = self.session_url(suffix)?;
        send(&self.client, method, &url, body).await
    }
}

impl BrowserSession for WebDriverSession {
    #[instrument(level = "debug", skip(self))]
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    #[instrument(level = "debug", skip(self))]
    async fn wait_for_element(
        &mut self,
        css: &str,
        timeout: Duration,
    ) -> Result<bool, BrowserError> {
        let deadline = Instant::now() + timeout;
        let query = json!({ "using": "css selector", "value": css });

        loop {
            match self.command(Method::POST, "/element", Some(query.clone())).await {
                Ok(_) => return Ok(true),
                Err(BrowserError::Protocol { ref error, .. }) if error == NO_SUCH_ELEMENT => {}
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                debug!(?timeout, "element did not appear in time");
                return Ok(false);
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn page_source(&mut self) -> Result<String, BrowserError> {
        let value = self.command(Method::GET, "/source", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::Malformed("page source is not a string".into()))
    }

    #[instrument(level = "info", skip(self))]
    async fn quit(&mut self) -> Result<(), BrowserError> {
        if self.session_id.is_none() {
            return Ok(());
        }
        let result = self.command(Method::DELETE, "", None).await;
        self.session_id = None;
        result.map(|_| info!("Browser session released"))
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if let Some(id) = &self.session_id {
            warn!(session_id = %id, "WebDriver session dropped without quit; browser may linger");
        }
    }
}

async fn send(
    client: &Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, BrowserError> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.send().await?;
    let status = response.status().as_u16();
    let payload: Value = response.json().await?;
    unwrap_value(status, payload)
}

/// Extract `value` from a WebDriver response, mapping error payloads.
pub(crate) fn unwrap_value(status: u16, mut payload: Value) -> Result<Value, BrowserError> {
    let value = payload
        .get_mut("value")
        .map(Value::take)
        .ok_or_else(|| BrowserError::Malformed(format!("response without value (HTTP {status})")))?;

    if (200..300).contains(&status) {
        return Ok(value);
    }

    let field = |name: &str| {
        value
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    Err(BrowserError::Protocol {
        status,
        error: field("error"),
        message: field("message"),
    })
}
