use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};
use tokio::fs;

pub const ARDUINO_TOKEN_URL: &str = "https://api2.arduino.cc/iot/v1/clients/token";
pub const ARDUINO_AUDIENCE: &str = "https://api2.arduino.cc/iot";
pub const ARDUINO_API_BASE: &str = "https://api2.arduino.cc/iot";
pub const WEATHERCLOUD_BASE_URL: &str = "https://app.weathercloud.net";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub host: String,
    pub port: u16,
    /// Dossier racine : visitas.json, visitas.json.lock, informes/
    pub data_dir: PathBuf,
    pub log_level: String,
    /// Timeout appliqué à chaque appel sortant
    pub http_timeout_secs: u64,
    pub arduino: ArduinoConf,
    pub weathercloud: WeathercloudConf,
    /// Lu uniquement depuis l'environnement, jamais depuis le YAML
    #[serde(skip)]
    pub secrets: Secrets,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ArduinoConf {
    pub token_url: String,
    pub audience: String,
    pub api_base: String,
    pub thing_name: String,
    pub cache_ttl_secs: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WeathercloudConf {
    pub base_url: String,
    pub probe_path: String,
}

#[derive(Clone, Default)]
pub struct Secrets {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub weathercloud_email: Option<String>,
    pub weathercloud_password: Option<String>,
    pub weathercloud_device_id: Option<String>,
}

// Jamais de mot de passe dans les logs
impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Secrets")
            .field("client_id", &mask(&self.client_id))
            .field("client_secret", &mask(&self.client_secret))
            .field("weathercloud_email", &mask(&self.weathercloud_email))
            .field("weathercloud_password", &mask(&self.weathercloud_password))
            .field("weathercloud_device_id", &self.weathercloud_device_id)
            .finish()
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
            data_dir: PathBuf::from("./data"),
            log_level: "info".into(),
            http_timeout_secs: 15,
            arduino: ArduinoConf::default(),
            weathercloud: WeathercloudConf::default(),
            secrets: Secrets::default(),
        }
    }
}

impl Default for ArduinoConf {
    fn default() -> Self {
        Self {
            token_url: ARDUINO_TOKEN_URL.into(),
            audience: ARDUINO_AUDIENCE.into(),
            api_base: ARDUINO_API_BASE.into(),
            thing_name: "Medidor de Flujo".into(),
            cache_ttl_secs: 8,
        }
    }
}

impl Default for WeathercloudConf {
    fn default() -> Self {
        Self {
            base_url: WEATHERCLOUD_BASE_URL.into(),
            probe_path: "/account".into(),
        }
    }
}

impl Secrets {
    /// Une variable vide compte comme absente
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            client_id: get("CLIENT_ID"),
            client_secret: get("CLIENT_SECRET"),
            weathercloud_email: get("WEATHERCLOUD_EMAIL"),
            weathercloud_password: get("WEATHERCLOUD_PASSWORD"),
            weathercloud_device_id: get("WEATHERCLOUD_DEVICEID"),
        }
    }
}

impl KernelConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn visits_path(&self) -> PathBuf {
        self.data_dir.join("visitas.json")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("informes")
    }

    /// Surcharges d'environnement : secrets + PORT
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("PORT") {
            match port.trim().parse::<u16>() {
                Ok(p) => self.port = p,
                Err(_) => eprintln!("[kernel] PORT invalide ignoré: {port}"),
            }
        }
        self.secrets = Secrets::from_lookup(lookup);
    }
}

fn parse_config(txt: &str) -> Result<KernelConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt)
}

/// Appelé avant l'init du logging, d'où eprintln!
pub async fn load_config() -> KernelConfig {
    let path = std::env::var("HIDROMET_CONFIG").unwrap_or_else(|_| "hidromet.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt).unwrap_or_else(|e| {
            eprintln!("[kernel] config invalide: {e}");
            KernelConfig::default()
        })
    } else {
        eprintln!("[kernel] pas de {path}, usage config par défaut");
        KernelConfig::default()
    };
    cfg.apply_env(|key| std::env::var(key).ok());
    cfg
}
