/**
 * ARDUINO IOT CLOUD - Client du débitmètre "Medidor de Flujo"
 *
 * RÔLE :
 * Obtient un jeton OAuth2 (client credentials) puis résout le thing du
 * débitmètre et ses deux propriétés utiles (instflow, constflow).
 *
 * FONCTIONNEMENT :
 * - token.rs  : échange CLIENT_ID / CLIENT_SECRET contre un bearer token
 * - things.rs : liste des things, recherche par nom exact, propriétés
 * - Le jeton est redemandé à chaque séquence d'appels, jamais stocké
 * - HTTP 429 est remonté à part (RateLimited) pour déclencher le repli cache
 */

mod things;
mod token;

pub use token::BearerToken;

use crate::config::{ArduinoConf, Secrets};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ArduinoError {
    #[error("CLIENT_ID o CLIENT_SECRET no configurados")]
    MissingCredentials,
    #[error("Error de autenticación: {0}")]
    Authentication(String),
    #[error("No se encontró el dispositivo '{name}'")]
    ThingNotFound { name: String, available: Vec<String> },
    #[error("Límite de peticiones alcanzado en Arduino IoT Cloud")]
    RateLimited,
    #[error("Arduino IoT Cloud respondió {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("Error de red con Arduino IoT Cloud: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Thing tel que renvoyé par /v2/things (champs non utilisés ignorés)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thing {
    pub id: String,
    pub name: String,
}

/// Propriété d'un thing ; last_value reste brut car les autres propriétés
/// du compte peuvent porter des chaînes ou des booléens
#[derive(Debug, Clone, Deserialize)]
pub struct Property {
    pub name: String,
    #[serde(default)]
    pub last_value: serde_json::Value,
    #[serde(default)]
    pub value_updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowValue {
    pub value: Option<f64>,
    pub updated_at: Option<String>,
}

/// Lecture consolidée du débitmètre ; chaque mesure est optionnelle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowmeterReading {
    pub thing_name: String,
    pub thing_id: String,
    pub instflow: Option<FlowValue>,
    pub constflow: Option<FlowValue>,
}

pub struct ArduinoClient {
    http: reqwest::Client,
    conf: ArduinoConf,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl ArduinoClient {
    pub fn new(conf: &ArduinoConf, secrets: &Secrets, timeout: Duration) -> Result<Self, ArduinoError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hidromet-kernel/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            conf: conf.clone(),
            client_id: secrets.client_id.clone(),
            client_secret: secrets.client_secret.clone(),
        })
    }

    pub fn thing_name(&self) -> &str {
        &self.conf.thing_name
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.conf.api_base.trim_end_matches('/'), path)
    }
}

/// 429 → RateLimited, autre non-2xx → Upstream avec le corps tronqué
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ArduinoError> {
    let status = resp.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(ArduinoError::RateLimited);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let message: String = body.chars().take(300).collect();
        return Err(ArduinoError::Upstream { status: status.as_u16(), message });
    }
    Ok(resp)
}
