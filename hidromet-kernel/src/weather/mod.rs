/**
 * WEATHERCLOUD - Client de session pour app.weathercloud.net
 *
 * RÔLE :
 * Interroge les stations (METAR ou device) : valeurs courantes, profil,
 * informations, statistiques, vent, stations proches.
 *
 * FONCTIONNEMENT :
 * - Une session cookie par client (cookie store reqwest), redirections off
 * - session.rs    : login + sonde de session + reconnexion
 * - station_id.rs : classification de l'identifiant → préfixe d'URL
 * - compute.rs    : base des nuages, visibilité, proportions de vent
 * - Profil, info et statistiques exigent une session authentifiée
 * - Toute opération renvoie un Result ; la forme {"error": …} n'existe
 *   qu'à la frontière HTTP
 */

mod compute;
mod session;
mod station_id;

pub use compute::WindSummary;
pub use session::LoginOutcome;
pub use station_id::{check_id, StationKind};

use crate::config::{Secrets, WeathercloudConf};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("ID inválido")]
    InvalidId(String),
    #[error("Error de autenticación: {0}")]
    Authentication(String),
    #[error("Límite de peticiones alcanzado en Weathercloud")]
    RateLimited,
    #[error("Error en la solicitud (HTTP {status})")]
    Upstream { status: u16, message: String },
    #[error("Error al obtener datos: falta el campo '{0}'")]
    MissingField(&'static str),
    #[error("Respuesta inesperada de Weathercloud: {0}")]
    InvalidPayload(String),
    #[error("Error de red con Weathercloud: {0}")]
    Transport(#[from] reqwest::Error),
}

pub struct WeathercloudClient {
    http: reqwest::Client,
    conf: WeathercloudConf,
    email: Option<String>,
    password: Option<String>,
    /// Dernier état connu de la session ; le verrou sérialise les reconnexions
    authenticated: tokio::sync::Mutex<bool>,
}

impl WeathercloudClient {
    pub fn new(conf: &WeathercloudConf, secrets: &Secrets, timeout: Duration) -> Result<Self, WeatherError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded; charset=UTF-8"),
        );
        headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));

        let http = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            conf: conf.clone(),
            email: secrets.weathercloud_email.clone(),
            password: secrets.weathercloud_password.clone(),
            authenticated: tokio::sync::Mutex::new(false),
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.email.is_some() && self.password.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.conf.base_url.trim_end_matches('/'), path)
    }

    /// POST amont → JSON ; 429 et non-2xx deviennent des erreurs typées
    async fn post_json(
        &self,
        path: &str,
        query: &[(&str, &str)],
        form: Option<&[(&str, &str)]>,
    ) -> Result<Value, WeatherError> {
        let mut req = self.http.post(self.url(path)).query(query);
        if let Some(form) = form {
            req = req.form(form);
        }
        let resp = req.send().await?;
        let status = resp.status();
        debug!("[weather] POST {} -> {}", path, status);

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(WeatherError::RateLimited);
        }
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(WeatherError::Upstream {
                status: status.as_u16(),
                message: body.chars().take(300).collect(),
            });
        }
        serde_json::from_str(&body).map_err(|e| WeatherError::InvalidPayload(e.to_string()))
    }

    fn classify(id: &str) -> Result<StationKind, WeatherError> {
        check_id(id).ok_or_else(|| WeatherError::InvalidId(id.to_string()))
    }

    /// Valeurs courantes enrichies de `computed` et d'une visibilité corrigée
    pub async fn get_weather(&self, id: &str) -> Result<Value, WeatherError> {
        let kind = Self::classify(id)?;
        let data = self.post_json(&format!("/{kind}/values"), &[("code", id)], None).await?;
        compute::enrich_values(data)
    }

    pub async fn get_profile(&self, id: &str) -> Result<Value, WeatherError> {
        let kind = Self::classify(id)?;
        self.ensure_authenticated().await?;
        let data = self
            .post_json(&format!("/{kind}/ajaxprofile"), &[], Some(&[("d", id)]))
            .await?;
        if data.get("followers").is_none() {
            return Err(WeatherError::MissingField("followers"));
        }
        Ok(data)
    }

    pub async fn get_infos(&self, id: &str) -> Result<Value, WeatherError> {
        let kind = Self::classify(id)?;
        self.ensure_authenticated().await?;
        self.post_json(&format!("/{kind}/info/{id}"), &[], None).await
    }

    pub async fn get_statistics(&self, id: &str) -> Result<Value, WeatherError> {
        let kind = Self::classify(id)?;
        self.ensure_authenticated().await?;
        self.post_json(&format!("/{kind}/stats"), &[], Some(&[("code", id)])).await
    }

    pub async fn get_wind(&self, id: &str) -> Result<WindSummary, WeatherError> {
        let kind = Self::classify(id)?;
        let raw = self.post_json(&format!("/{kind}/wind"), &[("code", id)], None).await?;
        compute::wind_summary(raw)
    }

    /// Recherche déléguée entièrement à l'amont, aucun filtrage local
    pub async fn get_nearest(&self, lat: f64, lon: f64, radius: u32) -> Result<Value, WeatherError> {
        let path = format!("/page/coordinates/latitude/{lat}/longitude/{lon}/distance/{radius}");
        self.post_json(&path, &[], None).await
    }
}
