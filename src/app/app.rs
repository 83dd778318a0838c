use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_port::*;
use crate::infra_fake::*;
use crate::infra_fs::*;
use crate::infra_http::*;
use crate::logger::*;
use crate::settings::Settings;
use std::sync::Arc;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct App {
    pub controller: Arc<AuthController>,
}

impl App {
    /// Wires the configured backend and waits for the initial session check to settle.
    pub async fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        let controller = match settings.auth.backend.as_str() {
            "fake" => {
                let provider: Arc<dyn AuthProvider> = Arc::new(FakeAuthProvider::new());
                let profiles: Arc<dyn ProfileRepo> = Arc::new(FakeProfileRepo::new());
                let client = Self::session_client(settings, provider, "http://fake.local").await;
                AuthController::new(client, profiles)
            }
            "real" if !settings.backend.is_configured() => {
                warn!("backend url or anon key missing, running in demo mode");
                AuthController::demo()
            }
            "real" => {
                let http = reqwest::Client::builder()
                    .user_agent(concat!("topcat/", env!("CARGO_PKG_VERSION")))
                    .timeout(HTTP_TIMEOUT)
                    .build()?;
                let backend = BackendConfig {
                    url: settings.backend.url.clone(),
                    anon_key: settings.backend.anon_key.clone(),
                };
                let provider: Arc<dyn AuthProvider> =
                    Arc::new(GoTrueAuthProvider::new(http.clone(), backend.clone()));
                let profiles: Arc<dyn ProfileRepo> =
                    Arc::new(PostgrestProfileRepo::new(http, backend));
                let client = Self::session_client(settings, provider, &settings.backend.url).await;
                AuthController::new(client, profiles)
            }
            other => return Err(anyhow::anyhow!("Unknown auth backend: {}", other)),
        };

        controller.initialize().await;
        let state = controller.settled().await;
        info!(phase = ?state.phase, demo = controller.is_demo(), "auth client started");

        Ok(App { controller })
    }

    async fn session_client(
        settings: &Settings,
        provider: Arc<dyn AuthProvider>,
        backend_url: &str,
    ) -> Arc<dyn SessionClient> {
        let storage = if settings.storage.disabled {
            Arc::new(SafeStorage::memory_only())
        } else {
            let file: Arc<dyn PersistentStorage> =
                Arc::new(FileStorage::new(&settings.storage.path));
            Arc::new(SafeStorage::probe(file).await)
        };
        debug!(info = ?storage.info(), "storage selected");

        let mut config = SessionClientConfig::for_backend_url(backend_url);
        config.auto_refresh = settings.session.auto_refresh;
        config.detect_session_in_url = settings.session.detect_session_in_url;
        config.refresh_margin = chrono::Duration::seconds(settings.session.refresh_margin_secs);

        Arc::new(RealSessionClient::new(provider, storage, config))
    }

    pub async fn shutdown(&self) {
        info!("auth client shutting down...");
        self.controller.teardown().await;
    }
}
