use crate::config::{CALLBACK_PREFIX, LeaderboardConfig};
use crate::core::callbacks::{CallbackRegistry, CallbackSlot};
use crate::core::network;
use crate::error::{ConfigError, TransportError};
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use url::Url;

/// One round trip to the leaderboard endpoint. No retries happen here.
pub trait Transport: Send + Sync {
    fn attempt_fetch(&self) -> Result<Value, TransportError>;
    fn attempt_post(&self, score: i64, name: &str) -> Result<Value, TransportError>;

    /// Longest a single `attempt_fetch` can run, fallbacks included.
    fn fetch_attempt_budget(&self) -> Duration;
    /// Longest a single `attempt_post` can run.
    fn post_attempt_budget(&self) -> Duration;
}

/// Loads a callback URL whose response invokes the slot's handler.
///
/// `inject` must return promptly; the answer is delivered later through
/// `slot.resolver()`. An `Err` means the reference could not even be created.
pub trait ScriptInjector: Send + Sync {
    fn inject(&self, url: &Url, slot: &CallbackSlot) -> Result<(), TransportError>;
}

/// Fetches the callback URL on a worker thread and hands the unwrapped body
/// to the registry, the way a `<script>` tag would call into the page.
pub struct UreqScriptInjector {
    agent: ureq::Agent,
    timeout: Duration,
}

impl UreqScriptInjector {
    pub fn new(agent: ureq::Agent, timeout: Duration) -> Self {
        Self { agent, timeout }
    }
}

impl ScriptInjector for UreqScriptInjector {
    fn inject(&self, url: &Url, slot: &CallbackSlot) -> Result<(), TransportError> {
        let agent = self.agent.clone();
        let timeout = self.timeout;
        let url = url.to_string();
        let resolver = slot.resolver();

        thread::Builder::new()
            .name("leaderboard-callback".into())
            .spawn(move || {
                let token = resolver.token().as_str().to_string();
                let completion = agent
                    .get(&url)
                    .call()
                    .map_err(|e| match network::map_ureq_error(e, timeout) {
                        TransportError::HttpError(msg) => TransportError::ScriptError(msg),
                        other => other,
                    })
                    .and_then(|resp| {
                        resp.into_body()
                            .read_to_string()
                            .map_err(|e| network::map_ureq_error(e, timeout))
                    })
                    .and_then(|body| network::unwrap_jsonp(&body, &token));
                resolver.resolve(completion);
            })
            .map(|_| ())
            .map_err(|e| TransportError::ScriptError(format!("failed to start loader: {}", e)))
    }
}

pub struct HttpTransport {
    endpoint: Url,
    agent: ureq::Agent,
    registry: Arc<CallbackRegistry>,
    injector: Arc<dyn ScriptInjector>,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &LeaderboardConfig) -> Result<Self, ConfigError> {
        let raw = config.endpoint.trim();
        if raw.is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }
        let endpoint = Url::parse(raw).map_err(|source| ConfigError::BadEndpoint {
            url: raw.to_string(),
            source,
        })?;

        let agent = network::get_agent(config.request_timeout);
        let injector = Arc::new(UreqScriptInjector::new(agent.clone(), config.request_timeout));
        Ok(Self {
            endpoint,
            agent,
            registry: Arc::new(CallbackRegistry::new(CALLBACK_PREFIX)),
            injector,
            timeout: config.request_timeout,
        })
    }

    pub fn with_injector(mut self, injector: Arc<dyn ScriptInjector>) -> Self {
        self.injector = injector;
        self
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }

    fn side_channel(&self, params: &[(&str, String)]) -> Result<Value, TransportError> {
        let slot = self.registry.acquire();
        let url = network::callback_url(&self.endpoint, slot.token(), params, &network::cache_buster());
        debug!("Injecting callback request {}", url);

        slot.mark_injected();
        self.injector.inject(&url, &slot)?;
        slot.wait(self.timeout)
    }

    fn direct(&self) -> Result<Value, TransportError> {
        let response = self
            .agent
            .get(self.endpoint.as_str())
            .call()
            .map_err(|e| network::map_ureq_error(e, self.timeout))?;

        if !response.status().is_success() {
            return Err(TransportError::HttpError(format!("status {}", response.status())));
        }

        response
            .into_body()
            .read_json::<Value>()
            .map_err(|e| match network::map_ureq_error(e, self.timeout) {
                TransportError::HttpError(msg) => TransportError::ParseError(msg),
                other => other,
            })
    }
}

impl Transport for HttpTransport {
    fn attempt_fetch(&self) -> Result<Value, TransportError> {
        match self.side_channel(&[]) {
            Ok(payload) => Ok(payload),
            Err(e) => {
                info!("Callback request failed ({}), trying a direct request...", e);
                self.direct().inspect_err(|e| warn!("Direct request failed too: {}", e))
            }
        }
    }

    fn attempt_post(&self, score: i64, name: &str) -> Result<Value, TransportError> {
        self.side_channel(&[
            ("action", "post".to_string()),
            ("score", score.to_string()),
            ("name", name.to_string()),
        ])
    }

    // A fetch may wait out the side channel and then the direct request.
    fn fetch_attempt_budget(&self) -> Duration {
        self.timeout.saturating_mul(2)
    }

    fn post_attempt_budget(&self) -> Duration {
        self.timeout
    }
}
