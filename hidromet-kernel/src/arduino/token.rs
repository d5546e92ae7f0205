use super::{ArduinoClient, ArduinoError};
use serde::Deserialize;
use tracing::debug;

/// Jeton bearer opaque, durée de vie gérée côté Arduino
#[derive(Clone)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

impl ArduinoClient {
    /// Échange client credentials → bearer token.
    /// Les identifiants sont vérifiés avant tout appel réseau.
    pub async fn fetch_token(&self) -> Result<BearerToken, ArduinoError> {
        let (Some(client_id), Some(client_secret)) = (&self.client_id, &self.client_secret) else {
            return Err(ArduinoError::MissingCredentials);
        };

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("audience", self.conf.audience.as_str()),
        ];

        let resp = self
            .http
            .post(&self.conf.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ArduinoError::Authentication(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ArduinoError::Authentication(format!("{status}: {body}")));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| ArduinoError::Authentication(e.to_string()))?;

        let token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ArduinoError::Authentication("respuesta sin access_token".into()))?;

        debug!("[arduino] token obtained");
        Ok(BearerToken(token))
    }
}
