use super::{WeatherError, WeathercloudClient};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, info, warn};

pub const MISSING_CREDENTIALS: &str =
    "Credenciales no proporcionadas. Configura WEATHERCLOUD_EMAIL y WEATHERCLOUD_PASSWORD en .env";

/// Résultat de connexion ; un échec est une donnée, jamais une panique
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LoginOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LoginOutcome {
    fn ok() -> Self {
        Self { success: true, error: None }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()) }
    }
}

impl WeathercloudClient {
    /// POST /signin ; 302 ou 200 = session ouverte (cookies conservés par le client)
    pub async fn login(&self) -> LoginOutcome {
        let mut authenticated = self.authenticated.lock().await;
        let outcome = self.sign_in().await;
        *authenticated = outcome.success;
        outcome
    }

    async fn sign_in(&self) -> LoginOutcome {
        let (Some(email), Some(password)) = (&self.email, &self.password) else {
            return LoginOutcome::failed(MISSING_CREDENTIALS);
        };

        let form = [
            ("entity", email.as_str()),
            ("password", password.as_str()),
            ("rememberMe", "1"),
        ];
        let resp = match self.http.post(self.url("/signin")).form(&form).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("[weather] login transport error: {e}");
                return LoginOutcome::failed(e.to_string());
            }
        };

        match resp.status() {
            StatusCode::FOUND | StatusCode::OK => {
                info!("[weather] session opened for {}", email);
                LoginOutcome::ok()
            }
            status => {
                warn!("[weather] login rejected with HTTP {status}");
                LoginOutcome::failed(format!("Weathercloud rechazó el inicio de sesión (HTTP {})", status.as_u16()))
            }
        }
    }

    /// Sonde légère : seule une réponse 200 vaut session valide
    async fn probe(&self) -> bool {
        match self.http.get(self.url(&self.conf.probe_path)).send().await {
            Ok(resp) => {
                debug!("[weather] session probe -> {}", resp.status());
                resp.status() == StatusCode::OK
            }
            Err(e) => {
                debug!("[weather] session probe failed: {e}");
                false
            }
        }
    }

    /// Vérifie la session et se reconnecte si besoin. Les reconnexions
    /// concurrentes sont sérialisées par le verrou de session.
    pub async fn ensure_authenticated(&self) -> Result<(), WeatherError> {
        let mut authenticated = self.authenticated.lock().await;
        if *authenticated && self.probe().await {
            return Ok(());
        }

        let outcome = self.sign_in().await;
        *authenticated = outcome.success;
        if outcome.success {
            Ok(())
        } else {
            Err(WeatherError::Authentication(outcome.error.unwrap_or_default()))
        }
    }
}
