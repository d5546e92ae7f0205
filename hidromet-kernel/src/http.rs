/**
 * API REST HIDROMET - Serveur HTTP principal du kernel
 *
 * RÔLE :
 * Expose en JSON le débitmètre Arduino, les stations Weathercloud, le
 * compteur de visites et les informes mensuels.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, routes /api/weather, /api/arduino, /api/visitas, /api/informes
 * - Chaque handler délègue à un composant et convertit son erreur en
 *   ApiError ({"error", "details"} + statut HTTP)
 * - /health et /api/system/health pour la supervision
 */

use crate::arduino::ArduinoClient;
use crate::clock::SharedClock;
use crate::config::KernelConfig;
use crate::error::ApiError;
use crate::flowmeter::{FlowmeterCache, FlowmeterService};
use crate::health::{HealthTracker, KernelHealth};
use crate::reports::ReportStore;
use crate::state::{new_state, Shared};
use crate::visits::VisitCounter;
use crate::weather::WeathercloudClient;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

type ApiResult = Result<Json<Value>, ApiError>;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Shared<KernelConfig>,
    pub flowmeter: Arc<FlowmeterService>,
    pub weather: Arc<WeathercloudClient>,
    pub reports: Arc<ReportStore>,
    pub visits: VisitCounter,
    pub health_tracker: HealthTracker,
}

impl AppState {
    /// Assemble les composants à partir de la config chargée
    pub fn build(cfg: KernelConfig, clock: SharedClock) -> anyhow::Result<Self> {
        let timeout = cfg.http_timeout();
        let arduino = ArduinoClient::new(&cfg.arduino, &cfg.secrets, timeout)?;
        let cache = FlowmeterCache::new(time::Duration::seconds(cfg.arduino.cache_ttl_secs), clock.clone());
        let weather = WeathercloudClient::new(&cfg.weathercloud, &cfg.secrets, timeout)?;
        let reports = ReportStore::new(cfg.reports_dir(), clock)?;
        let visits = VisitCounter::new(cfg.visits_path());

        Ok(Self {
            cfg: new_state(cfg),
            flowmeter: Arc::new(FlowmeterService::new(arduino, cache)),
            weather: Arc::new(weather),
            reports: Arc::new(reports),
            visits,
            health_tracker: HealthTracker::new(),
        })
    }
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/system/health", get(get_system_health))
        .route("/api/weather", get(get_default_weather))
        .route("/api/weather/nearest", get(get_nearest))
        .route("/api/weather/{station_id}", get(get_weather))
        .route("/api/weather/profile/{station_id}", get(get_profile))
        .route("/api/weather/statistics/{station_id}", get(get_statistics))
        .route("/api/weather/info/{station_id}", get(get_info))
        .route("/api/weather/wind/{station_id}", get(get_wind))
        .route("/api/arduino/flowmeter", get(get_flowmeter))
        .route("/api/arduino/things", get(list_things))
        .route("/api/visitas", get(get_visits).post(add_visit))
        .route("/api/informes", get(list_reports))
        .route("/api/informes/generar", post(generate_report))
        .route("/api/informes/{id}", get(get_report).delete(delete_report))
        .with_state(app_state)
}

// GET /api/system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    let visits = app.visits.current().await.ok();
    Json(app.health_tracker.snapshot(
        app.flowmeter.cache().state(),
        app.reports.count().await,
        visits,
        app.weather.has_credentials(),
    ))
}

// GET /api/weather (station par défaut, sinon mode d'emploi)
async fn get_default_weather(State(app): State<AppState>) -> ApiResult {
    let device_id = app.cfg.lock().secrets.weathercloud_device_id.clone();
    let Some(id) = device_id else {
        return Ok(Json(json!({
            "message": "Por favor, especifica una estación o coordenadas",
            "endpoints": {
                "/api/weather/<station_id>": "Obtener datos de una estación específica",
                "/api/weather/nearest": "Obtener estaciones cercanas (requiere lat, lon, radius)",
                "/api/weather/profile/<station_id>": "Obtener perfil de una estación",
                "/api/weather/statistics/<station_id>": "Obtener estadísticas de una estación",
                "/api/weather/info/<station_id>": "Obtener información general de una estación",
                "/api/weather/wind/<station_id>": "Obtener distribución del viento de una estación"
            }
        })));
    };
    Ok(Json(app.weather.get_weather(&id).await?))
}

// GET /api/weather/{station_id}
async fn get_weather(State(app): State<AppState>, Path(station_id): Path<String>) -> ApiResult {
    Ok(Json(app.weather.get_weather(&station_id).await?))
}

// GET /api/weather/profile/{station_id}
async fn get_profile(State(app): State<AppState>, Path(station_id): Path<String>) -> ApiResult {
    Ok(Json(app.weather.get_profile(&station_id).await?))
}

// GET /api/weather/statistics/{station_id}
async fn get_statistics(State(app): State<AppState>, Path(station_id): Path<String>) -> ApiResult {
    Ok(Json(app.weather.get_statistics(&station_id).await?))
}

// GET /api/weather/info/{station_id}
async fn get_info(State(app): State<AppState>, Path(station_id): Path<String>) -> ApiResult {
    Ok(Json(app.weather.get_infos(&station_id).await?))
}

// GET /api/weather/wind/{station_id}
async fn get_wind(State(app): State<AppState>, Path(station_id): Path<String>) -> ApiResult {
    let wind = app.weather.get_wind(&station_id).await?;
    Ok(Json(json!(wind)))
}

/// Paramètre de query optionnel avec valeur par défaut ; illisible → 400
fn query_param<T: FromStr>(params: &HashMap<String, String>, key: &str, default: T) -> Result<T, ApiError> {
    match params.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ApiError::Validation(format!("Parámetro '{key}' inválido: {raw}"))),
    }
}

// GET /api/weather/nearest?lat=&lon=&radius=
async fn get_nearest(State(app): State<AppState>, Query(params): Query<HashMap<String, String>>) -> ApiResult {
    let lat: f64 = query_param(&params, "lat", 0.0)?;
    let lon: f64 = query_param(&params, "lon", 0.0)?;
    let radius: u32 = query_param(&params, "radius", 10)?;
    Ok(Json(app.weather.get_nearest(lat, lon, radius).await?))
}

// GET /api/arduino/flowmeter
async fn get_flowmeter(State(app): State<AppState>) -> ApiResult {
    let reading = app.flowmeter.read().await?;
    let mut body = json!({ "success": true, "data": reading.data, "cached": reading.cached });
    if let (Some(obj), Some(warning)) = (body.as_object_mut(), reading.warning) {
        obj.insert("warning".into(), Value::String(warning));
    }
    Ok(Json(body))
}

// GET /api/arduino/things
async fn list_things(State(app): State<AppState>) -> ApiResult {
    let client = app.flowmeter.source();
    let token = client.fetch_token().await?;
    let things = client.list_things(&token).await?;
    Ok(Json(json!({ "success": true, "target": client.thing_name(), "things": things })))
}

// GET /api/visitas
async fn get_visits(State(app): State<AppState>) -> ApiResult {
    Ok(Json(json!({ "num_visitas": app.visits.current().await? })))
}

// POST /api/visitas
async fn add_visit(State(app): State<AppState>) -> ApiResult {
    Ok(Json(json!({ "num_visitas": app.visits.increment().await? })))
}

// GET /api/informes
async fn list_reports(State(app): State<AppState>) -> ApiResult {
    let informes = app.reports.list().await?;
    Ok(Json(json!({ "success": true, "informes": informes })))
}

// POST /api/informes/generar
async fn generate_report(State(app): State<AppState>) -> ApiResult {
    let (id, informe) = app.reports.generate(&app.flowmeter).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Informe generado correctamente",
        "id": id,
        "informe": informe,
    })))
}

// GET /api/informes/{id}
async fn get_report(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let informe = app.reports.get(&id).await?;
    Ok(Json(json!({ "success": true, "id": id, "informe": informe })))
}

// DELETE /api/informes/{id}
async fn delete_report(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult {
    app.reports.delete(&id).await?;
    Ok(Json(json!({ "success": true, "message": format!("Informe {id} eliminado") })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arduino::fake::FakeArduino;
    use crate::clock::manual::ManualClock;
    use crate::config::Secrets;
    use crate::testing::spawn_upstream;
    use crate::weather::fake::{FakeWeathercloud, EMAIL, PASSWORD};
    use reqwest::StatusCode;
    use std::sync::atomic::Ordering;
    use time::macros::datetime;

    struct TestApp {
        base: String,
        http: reqwest::Client,
        arduino: Arc<FakeArduino>,
        weather: Arc<FakeWeathercloud>,
        _dir: tempfile::TempDir,
    }

    impl TestApp {
        async fn get(&self, path: &str) -> (StatusCode, Value) {
            let resp = self.http.get(format!("{}{}", self.base, path)).send().await.unwrap();
            (resp.status(), resp.json().await.unwrap())
        }

        async fn post(&self, path: &str) -> (StatusCode, Value) {
            let resp = self.http.post(format!("{}{}", self.base, path)).send().await.unwrap();
            (resp.status(), resp.json().await.unwrap())
        }

        async fn delete(&self, path: &str) -> (StatusCode, Value) {
            let resp = self.http.delete(format!("{}{}", self.base, path)).send().await.unwrap();
            (resp.status(), resp.json().await.unwrap())
        }
    }

    async fn spawn_app(secrets: impl FnOnce(&mut Secrets)) -> TestApp {
        let arduino = FakeArduino::new();
        let arduino_base = spawn_upstream(arduino.router()).await;
        let weather = FakeWeathercloud::new();
        let weather_base = spawn_upstream(weather.router()).await;
        let dir = tempfile::tempdir().unwrap();

        let mut cfg = KernelConfig { data_dir: dir.path().to_path_buf(), http_timeout_secs: 5, ..KernelConfig::default() };
        cfg.arduino.token_url = format!("{arduino_base}/v1/clients/token");
        cfg.arduino.api_base = arduino_base;
        cfg.weathercloud.base_url = weather_base;
        cfg.secrets = Secrets {
            client_id: Some("id".into()),
            client_secret: Some("s3cret".into()),
            weathercloud_email: Some(EMAIL.into()),
            weathercloud_password: Some(PASSWORD.into()),
            weathercloud_device_id: None,
        };
        secrets(&mut cfg.secrets);

        let clock = ManualClock::new(datetime!(2026-10-19 12:00 UTC));
        let state = AppState::build(cfg, clock).unwrap();
        let base = spawn_upstream(build_router(state)).await;
        TestApp { base, http: reqwest::Client::new(), arduino, weather, _dir: dir }
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let app = spawn_app(|_| {}).await;
        let resp = app.http.get(format!("{}/health", app.base)).send().await.unwrap();
        assert_eq!(resp.text().await.unwrap(), "ok");

        let (status, body) = app.get("/api/system/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["flowmeter_cache"], "empty");
        assert_eq!(body["informes_stored"], 0);
        assert_eq!(body["num_visitas"], 0);
    }

    #[tokio::test]
    async fn test_flowmeter_endpoint_uses_cache() {
        let app = spawn_app(|_| {}).await;

        let (status, first) = app.get("/api/arduino/flowmeter").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["success"], true);
        assert_eq!(first["cached"], false);
        assert_eq!(first["data"]["instflow"]["value"], 12.5);
        assert!(first.get("warning").is_none());

        let (_, second) = app.get("/api/arduino/flowmeter").await;
        assert_eq!(second["cached"], true);
        assert_eq!(second["data"], first["data"]);
        assert_eq!(app.arduino.upstream_calls(), 3);
    }

    #[tokio::test]
    async fn test_flowmeter_errors_map_to_status() {
        let app = spawn_app(|s| s.client_secret = None).await;
        let (status, body) = app.get("/api/arduino/flowmeter").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "CLIENT_ID o CLIENT_SECRET no configurados");

        let app = spawn_app(|_| {}).await;
        *app.arduino.things_status.lock() = Some(429);
        let (status, _) = app.get("/api/arduino/flowmeter").await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_things_listing() {
        let app = spawn_app(|_| {}).await;
        let (status, body) = app.get("/api/arduino/things").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["target"], "Medidor de Flujo");
        assert_eq!(body["things"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_default_weather() {
        let app = spawn_app(|_| {}).await;
        let (status, usage) = app.get("/api/weather").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(usage["message"], "Por favor, especifica una estación o coordenadas");

        let app = spawn_app(|s| s.weathercloud_device_id = Some("d1234567890".into())).await;
        let (status, data) = app.get("/api/weather").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(data["vis"], 500.0);
        assert_eq!(*app.weather.last_path.lock(), "/device/values?code=d1234567890");
    }

    #[tokio::test]
    async fn test_weather_validation() {
        let app = spawn_app(|_| {}).await;
        let (status, body) = app.get("/api/weather/abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "ID inválido");

        let (status, _) = app.get("/api/weather/nearest?lat=norte").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(app.weather.data_calls.load(Ordering::SeqCst), 0);

        let (status, body) = app.get("/api/weather/nearest").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["radius"], "10");
    }

    #[tokio::test]
    async fn test_weather_auth_routes() {
        let app = spawn_app(|_| {}).await;
        let (status, profile) = app.get("/api/weather/profile/LEMD").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(profile["followers"], 12);

        let (status, wind) = app.get("/api/weather/wind/LEMD").await;
        assert_eq!(status, StatusCode::OK);
        assert!(wind["calm"].as_f64().unwrap() > 0.0);

        let app = spawn_app(|s| s.weathercloud_password = None).await;
        let (status, body) = app.get("/api/weather/statistics/LEMD").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].as_str().unwrap().contains("WEATHERCLOUD_EMAIL"));
    }

    #[tokio::test]
    async fn test_visits() {
        let app = spawn_app(|_| {}).await;
        assert_eq!(app.post("/api/visitas").await.1["num_visitas"], 1);
        assert_eq!(app.post("/api/visitas").await.1["num_visitas"], 2);
        assert_eq!(app.get("/api/visitas").await.1["num_visitas"], 2);
    }

    #[tokio::test]
    async fn test_report_lifecycle() {
        let app = spawn_app(|_| {}).await;

        let (status, created) = app.post("/api/informes/generar").await;
        assert_eq!(status, StatusCode::OK);
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(id, "informe_20261019_120000");
        assert_eq!(created["informe"]["datos"]["flujo_acumulado"], 3400.0);

        let (_, list) = app.get("/api/informes").await;
        assert_eq!(list["informes"].as_array().unwrap().len(), 1);
        assert_eq!(list["informes"][0]["id"], id.as_str());

        let (status, dup) = app.post("/api/informes/generar").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(dup["details"]["existing_report_id"], id.as_str());
        assert!(dup["details"]["days_remaining"].as_i64().unwrap() > 0);

        let (status, got) = app.get(&format!("/api/informes/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(got["informe"]["mes_anio"], "septiembre 2026");

        assert_eq!(app.delete(&format!("/api/informes/{id}")).await.0, StatusCode::OK);
        assert_eq!(app.get(&format!("/api/informes/{id}")).await.0, StatusCode::NOT_FOUND);
        assert_eq!(app.delete(&format!("/api/informes/{id}")).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_report_without_data_is_unavailable() {
        let app = spawn_app(|_| {}).await;
        *app.arduino.things_status.lock() = Some(500);
        let (status, body) = app.post("/api/informes/generar").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().starts_with("Datos insuficientes"));
    }
}
