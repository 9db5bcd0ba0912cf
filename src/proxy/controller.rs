//! Proxy controller: mode dispatch, recording and replay of one active pact

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::matcher::RequestMatcher;
use crate::message::{HttpRequest, HttpResponse};
use crate::network::{HttpHandler, ProxyServer, UpstreamClient};
use crate::pact::{Info, Modes, OperatingMode, Pact, PactSelector, Record};
use crate::preprocess::Preprocessor;
use crate::recording::{RecordingEngine, Session};
use crate::replay::{ReplayEngine, ReplayStats};
use crate::schema::{SchemaGenerator, SchemaValidator};
use crate::storage::{open_store, PactStore};
use crate::{ProxyError, Result};

use super::control;
use super::hooks::{ControllerHooks, DuplicateSuppression, HookContext};
use super::response::{validation_response, DefaultNotFound, NotFoundResponder};
use super::ExchangeSource;

/// Metadata of the active pact
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PactSummary {
    /// Pact id
    pub id: String,
    /// Pact metadata
    pub info: Info,
    /// Number of records
    pub records: usize,
    /// Records served since the pact became current
    pub consumed: usize,
    /// Modes in effect
    pub modes: Modes,
    /// Replay statistics
    pub stats: ReplayStats,
    /// Changes not yet saved
    pub pending_write: bool,
}

/// Builder for [`ProxyController`]
pub struct ControllerBuilder {
    config: Config,
    store: Option<Arc<dyn PactStore>>,
    hooks: Vec<Arc<dyn ControllerHooks>>,
    not_found: Option<Arc<dyn NotFoundResponder>>,
    schema_generator: Option<Arc<dyn SchemaGenerator>>,
    validator: Option<Arc<SchemaValidator>>,
}

impl ControllerBuilder {
    /// Use this store instead of the configured one
    #[must_use]
    pub fn store(mut self, store: Arc<dyn PactStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Add lifecycle hooks; hooks run in the order they were added
    #[must_use]
    pub fn hook(mut self, hook: Arc<dyn ControllerHooks>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Replace the default 404 for unmatched requests
    #[must_use]
    pub fn not_found(mut self, responder: Arc<dyn NotFoundResponder>) -> Self {
        self.not_found = Some(responder);
        self
    }

    /// Attach body schemas to recorded exchanges
    #[must_use]
    pub fn schema_generator(mut self, generator: Arc<dyn SchemaGenerator>) -> Self {
        self.schema_generator = Some(generator);
        self
    }

    /// Use a validator with custom formats or registered schemas
    #[must_use]
    pub fn validator(mut self, validator: Arc<SchemaValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Build the controller
    ///
    /// Makes `config.pact_id` current when set.
    ///
    /// # Errors
    ///
    /// Returns `Config` for invalid configuration, storage location or mode
    /// combination, and `Storage` if the initial pact cannot be read
    pub fn build(self) -> Result<Arc<ProxyController>> {
        let config = self.config;
        config.validate()?;

        let store = match self.store {
            Some(store) => store,
            None => open_store(&config.storage)?,
        };

        let info = config.info();
        let preprocessor = Preprocessor::new(&config.preprocessor)?;

        let mut hooks = Vec::new();
        if config.suppress_duplicates {
            hooks.push(Arc::new(DuplicateSuppression) as Arc<dyn ControllerHooks>);
        }
        hooks.extend(self.hooks);

        let modes = Modes::new(config.mode, config.recording_mode);
        let mut session = Session::new(modes);

        if let Some(id) = &config.pact_id {
            let id = PactSelector::Id(id.clone()).resolve()?;
            let loaded = store.load(&id)?;
            let existed = loaded.is_some();
            info!(
                "Initial pact {} ({})",
                id,
                if existed { "loaded" } else { "new" }
            );
            session.activate(loaded.unwrap_or_else(|| Pact::new(&id, info.clone())), existed);
        }

        modes.validate(session.pact().is_some())?;

        let upstream = UpstreamClient::new(
            &info.base_url,
            Duration::from_millis(config.upstream_timeout_ms),
            config.limits.max_response_size,
        );
        let validator = self
            .validator
            .unwrap_or_else(|| Arc::new(SchemaValidator::new()));

        Ok(Arc::new(ProxyController {
            info,
            store,
            upstream,
            recording: RecordingEngine::new(preprocessor, self.schema_generator),
            replay: ReplayEngine::new(validator),
            hooks,
            not_found: self
                .not_found
                .unwrap_or_else(|| Arc::new(DefaultNotFound)),
            session: Mutex::new(session),
            persist_lock: Mutex::new(()),
            config,
        }))
    }
}

/// Routes every request according to the active modes and pact
///
/// Holds the single active [`Session`]. Saves are serialized through
/// `persist_lock`, which is always taken before the session lock.
pub struct ProxyController {
    config: Config,
    info: Info,
    store: Arc<dyn PactStore>,
    upstream: UpstreamClient,
    recording: RecordingEngine,
    replay: ReplayEngine,
    hooks: Vec<Arc<dyn ControllerHooks>>,
    not_found: Arc<dyn NotFoundResponder>,
    session: Mutex<Session>,
    persist_lock: Mutex<()>,
}

impl ProxyController {
    /// Start building a controller
    #[must_use]
    pub fn builder(config: Config) -> ControllerBuilder {
        ControllerBuilder {
            config,
            store: None,
            hooks: Vec::new(),
            not_found: None,
            schema_generator: None,
            validator: None,
        }
    }

    /// Run `before_start` hooks and bind the listener
    ///
    /// # Errors
    ///
    /// Returns the first hook error, or `Config` if the address cannot be bound
    pub async fn start(controller: Arc<Self>) -> Result<ProxyServer> {
        for hook in &controller.hooks {
            hook.before_start(&controller)?;
        }
        ProxyServer::bind(controller).await
    }

    /// Configuration the controller was built with
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Store backing the pacts
    #[must_use]
    pub fn store(&self) -> &Arc<dyn PactStore> {
        &self.store
    }

    /// Modes in effect
    pub async fn modes(&self) -> Modes {
        self.session.lock().await.modes()
    }

    /// Route a request to the control API or the proxy
    pub async fn dispatch(self: &Arc<Self>, request: HttpRequest) -> HttpResponse {
        if control::is_control_path(&request.path) {
            control::handle(self, &request).await
        } else {
            self.handle_request(request).await
        }
    }

    /// Handle a proxied request
    ///
    /// Never fails: every error becomes an HTTP status.
    pub async fn handle_request(self: &Arc<Self>, request: HttpRequest) -> HttpResponse {
        let modes = self.modes().await;
        debug!("{} {} ({})", request.method, request.path, modes.mode);

        match modes.mode {
            OperatingMode::Disabled | OperatingMode::Forward | OperatingMode::Record => {
                // Detached so a client disconnect cannot cut a recording short
                let controller = Arc::clone(self);
                let task = tokio::spawn(async move { controller.forward(request, modes).await });
                match task.await {
                    Ok(response) => response,
                    Err(e) => {
                        error!("Forwarding task failed: {}", e);
                        HttpHandler::error_response(&ProxyError::Other(format!(
                            "Forwarding task failed: {e}"
                        )))
                    }
                }
            }
            OperatingMode::Mock | OperatingMode::Apply => self.replay(&request, modes).await,
        }
    }

    async fn forward(&self, request: HttpRequest, modes: Modes) -> HttpResponse {
        let response = match self.upstream.forward(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("{} {} failed: {}", request.method, request.path, e);
                return HttpHandler::error_response(&e);
            }
        };

        if modes.mode.is_record() {
            self.record(&request, &response).await;
        }

        ExchangeSource::Live(response).into_response()
    }

    async fn record(&self, request: &HttpRequest, response: &HttpResponse) {
        let record = self.recording.capture(&self.info.base_url, request, response);

        {
            let mut session = self.session.lock().await;
            if !session.modes().mode.is_record() {
                return;
            }
            if session.pact().is_none() {
                debug!("No active pact, not recording {} {}", request.method, request.path);
                return;
            }

            let accepted = {
                let matcher = self.matcher_for(&session);
                let context = HookContext {
                    pact: session.pact(),
                    records: session.merge_view(),
                    matcher: &matcher,
                    modes: session.modes(),
                    base_url: &self.info.base_url,
                };
                self.hooks.iter().fold(true, |accepted, hook| {
                    hook.on_proxy_response(&context, request, response, &record) && accepted
                })
            };
            if !accepted {
                debug!("Recording of {} {} vetoed", request.method, request.path);
                return;
            }

            let outcome = self.recording.merge(&mut session, record, &self.info);
            if !outcome.is_write() {
                return;
            }
            debug!(
                "Recorded {} {} into {} ({:?})",
                request.method,
                request.path,
                session.pact_id().unwrap_or_default(),
                outcome
            );
        }

        if let Err(e) = self.flush().await {
            warn!("Failed to persist recording, will retry on next write: {}", e);
        }
    }

    async fn replay(&self, request: &HttpRequest, modes: Modes) -> HttpResponse {
        let base_url = self.info.base_url.as_str();

        let (found, matcher, pact_id) = {
            let mut session = self.session.lock().await;
            let matcher = self.matcher_for(&session);
            let found = self.replay.lookup(&mut session, &matcher, request, base_url);

            let context = HookContext {
                pact: session.pact(),
                records: session
                    .pact()
                    .map(|pact| pact.records.iter().collect())
                    .unwrap_or_default(),
                matcher: &matcher,
                modes,
                base_url,
            };
            let record = found.as_ref().map(|(_, record)| record);
            if let Some(response) = self
                .hooks
                .iter()
                .find_map(|hook| hook.mock_request(&context, request, record))
            {
                return response;
            }

            let pact_id = session.pact_id().map(ToString::to_string);
            (found, matcher, pact_id)
        };

        let Some((matched, record)) = found else {
            let key = matcher.request_key(request, base_url);
            return self.not_found.respond(request, &key, pact_id.as_deref());
        };

        if modes.mode == OperatingMode::Apply {
            let preprocessor = self.recording.preprocessor();
            let live = preprocessor.process(Record::capture(
                base_url,
                request,
                &HttpResponse::default(),
            ));
            if let Err(e) = self.replay.verify(
                &record,
                &live,
                self.config.strict_matching,
                preprocessor.obfuscation_pattern(),
            ) {
                let key = matcher.request_key(request, base_url);
                warn!("{} does not match record {}: {}", key, matched.index, e);
                return validation_response(&key, &e);
            }
        }

        ExchangeSource::Recorded {
            index: matched.index,
            duplicate: matched.duplicate,
            response: record.response.to_http(),
        }
        .into_response()
    }

    fn matcher_for(&self, session: &Session) -> RequestMatcher {
        session
            .pact()
            .map_or_else(|| RequestMatcher::new(&self.info), |pact| RequestMatcher::new(&pact.info))
            .with_sequential_fallback(self.config.sequential_fallback)
    }

    /// Make a pact current, loading it or creating an empty one
    ///
    /// Selecting the already current pact without pending writes and
    /// without `clear` leaves the session untouched. Otherwise pending
    /// writes of the previous pact are saved first.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPactId` for unusable ids and `Storage` if the
    /// previous pact cannot be saved or the new one cannot be read
    pub async fn set_current_pact(&self, selector: PactSelector, clear: bool) -> Result<PactSummary> {
        let id = selector.resolve()?;
        let _persist = self.persist_lock.lock().await;

        {
            let session = self.session.lock().await;
            if !clear && session.pact_id() == Some(id.as_str()) && !session.has_pending_write() {
                debug!("Pact {} is already current", id);
                return self
                    .summary(&session)
                    .ok_or_else(|| ProxyError::Other("Active pact disappeared".to_string()));
            }
        }

        self.flush_locked().await.map_err(|e| {
            ProxyError::Storage(format!("Failed to save current pact before switching: {e}"))
        })?;

        let store = Arc::clone(&self.store);
        let load_id = id.clone();
        let loaded = tokio::task::spawn_blocking(move || store.load(&load_id))
            .await
            .map_err(|e| ProxyError::Storage(format!("Load task failed: {e}")))??;

        let existed = loaded.is_some() && !clear;
        let mut pact = loaded.unwrap_or_else(|| Pact::new(&id, self.info.clone()));
        if clear {
            pact.records.clear();
        }

        {
            let mut session = self.session.lock().await;
            info!(
                "Pact {} is now current ({} records, mode {})",
                id,
                pact.len(),
                session.modes().mode
            );
            session.activate(pact, existed);
            if clear {
                session.mark_dirty();
            }
        }
        self.replay.reset_stats();

        if clear {
            if let Err(e) = self.flush_locked().await {
                warn!("Failed to save cleared pact {}: {}", id, e);
            }
        }

        let session = self.session.lock().await;
        self.summary(&session)
            .ok_or_else(|| ProxyError::Other("Active pact disappeared".to_string()))
    }

    /// Restart matching from the first record
    ///
    /// Persisted data is not touched.
    pub async fn reset_current_pact(&self) {
        let mut session = self.session.lock().await;
        session.reset_cursors();
        debug!("Cursors reset for {}", session.pact_id().unwrap_or("<none>"));
    }

    /// Install new modes and restart matching
    ///
    /// # Errors
    ///
    /// Returns `Config` for combinations that cannot serve requests
    pub async fn reset(&self, modes: Modes) -> Result<()> {
        let mut session = self.session.lock().await;
        Self::install_modes(&mut session, modes)
    }

    /// Switch between `record` and `mock`
    ///
    /// `true` always selects `record`; `false` leaves every mode but
    /// `record` unchanged. A mode change restarts matching like
    /// [`reset`](Self::reset).
    ///
    /// # Errors
    ///
    /// Returns `Config` for combinations that cannot serve requests
    pub async fn set_recording(&self, recording: bool) -> Result<Modes> {
        let mut session = self.session.lock().await;
        let mut modes = session.modes();
        if recording {
            modes.mode = OperatingMode::Record;
        } else if modes.mode.is_record() {
            modes.mode = OperatingMode::Mock;
        }

        if modes != session.modes() {
            Self::install_modes(&mut session, modes)?;
        }
        Ok(modes)
    }

    fn install_modes(session: &mut Session, modes: Modes) -> Result<()> {
        modes.validate(session.pact().is_some())?;
        session.set_modes(modes);
        session.reset_cursors();
        info!(
            "Mode {} (recording {})",
            modes.mode, modes.recording_mode
        );
        Ok(())
    }

    /// Save pending writes and unset the active pact
    ///
    /// # Errors
    ///
    /// Returns `Storage` if pending writes cannot be saved; the pact stays
    /// current in that case
    pub async fn unset_current_pact(&self) -> Result<Option<String>> {
        let _persist = self.persist_lock.lock().await;
        self.flush_locked().await?;

        let previous = self.session.lock().await.deactivate();
        if let Some(pact) = &previous {
            info!("Pact {} is no longer current", pact.id);
        }
        Ok(previous.map(|pact| pact.id))
    }

    /// Save pending writes of the active pact
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the save fails; the changes stay pending
    pub async fn flush(&self) -> Result<()> {
        let _persist = self.persist_lock.lock().await;
        self.flush_locked().await
    }

    async fn flush_locked(&self) -> Result<()> {
        let Some((pact, generation)) = self.session.lock().await.snapshot() else {
            return Ok(());
        };

        let id = pact.id.clone();
        let records = pact.len();
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.save(&pact))
            .await
            .map_err(|e| ProxyError::Storage(format!("Save task failed: {e}")))??;

        self.session.lock().await.mark_persisted(generation);
        debug!("Saved pact {} ({} records)", id, records);
        Ok(())
    }

    /// Metadata of the active pact
    pub async fn current(&self) -> Option<PactSummary> {
        let session = self.session.lock().await;
        self.summary(&session)
    }

    fn summary(&self, session: &Session) -> Option<PactSummary> {
        session.pact().map(|pact| PactSummary {
            id: pact.id.clone(),
            info: pact.info.clone(),
            records: pact.len(),
            consumed: session.cursor().consumed_count(),
            modes: session.modes(),
            stats: self.replay.stats(),
            pending_write: session.has_pending_write(),
        })
    }
}
