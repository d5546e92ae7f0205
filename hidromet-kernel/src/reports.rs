/**
 * INFORMES - Informes mensuels de débit persistés en JSON
 *
 * RÔLE :
 * Génère, liste, lit et supprime les informes (un fichier JSON par informe)
 * dans `<data_dir>/informes`.
 *
 * FONCTIONNEMENT :
 * - Identifiant = nom de fichier sans extension : informe_YYYYMMDD_HHMMSS
 * - Garde : un informe déjà généré ce mois-ci bloque tant que le nombre de
 *   jours écoulés reste inférieur au nombre de jours du mois courant
 * - Période couverte : 1er jour du mois précédent → maintenant
 * - Données : cache du débitmètre si présent, sinon lecture live
 * - Aucun verrou : deux générations simultanées peuvent toutes deux passer
 *   la garde et écrire deux fichiers distincts
 */

use crate::arduino::FlowmeterReading;
use crate::clock::SharedClock;
use crate::flowmeter::{FlowmeterService, ReadingSource};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::macros::format_description;
use time::{Date, Month, OffsetDateTime, UtcOffset};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const MESES: [&str; 12] = [
    "enero", "febrero", "marzo", "abril", "mayo", "junio",
    "julio", "agosto", "septiembre", "octubre", "noviembre", "diciembre",
];

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Ya existe un informe generado este mes ({existing_report_id})")]
    Duplicate { days_remaining: i64, existing_report_id: String },
    #[error("Informe {0} no encontrado")]
    NotFound(String),
    #[error("Datos insuficientes para generar el informe: {0}")]
    InsufficientData(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Date error: {0}")]
    Date(#[from] time::error::ComponentRange),
    #[error("Date format error: {0}")]
    Format(#[from] time::error::Format),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportData {
    pub flujo_instantaneo: f64,
    pub flujo_acumulado: f64,
    pub promedio_diario: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportStats {
    pub total_litros: f64,
    pub promedio_lmin: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub nombre: String,
    #[serde(with = "time::serde::rfc3339")]
    pub fecha_generacion: OffsetDateTime,
    pub periodo: String,
    pub fecha_inicio: String,
    pub fecha_fin: String,
    pub mes_anio: String,
    pub datos: ReportData,
    pub estadisticas: ReportStats,
}

/// Vue condensée renvoyée par GET /api/informes
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub id: String,
    pub nombre: String,
    #[serde(with = "time::serde::rfc3339")]
    pub fecha_generacion: OffsetDateTime,
    pub periodo: String,
    pub mes_anio: String,
}

pub struct ReportStore {
    dir: PathBuf,
    clock: SharedClock,
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn days_in_month(year: i32, month: Month) -> i64 {
    i64::from(time::util::days_in_year_month(year, month))
}

/// 1er jour du mois calendaire précédent
fn previous_month_start(today: Date) -> Result<Date, ReportError> {
    let (year, month) = match today.month() {
        Month::January => (today.year() - 1, Month::December),
        m => (today.year(), m.previous()),
    };
    Ok(Date::from_calendar_date(year, month, 1)?)
}

/// Construit l'informe ; promedio_diario vaut 0 si la période est vide
pub fn build_report(reading: &FlowmeterReading, now: OffsetDateTime) -> Result<Report, ReportError> {
    let date_fmt = format_description!("[year]-[month]-[day]");
    let inicio = previous_month_start(now.date())?;
    let fin = now.date();
    let days_in_period = (fin - inicio).whole_days();

    let instantaneo = reading.instflow.as_ref().and_then(|v| v.value).unwrap_or(0.0);
    let acumulado = reading.constflow.as_ref().and_then(|v| v.value).unwrap_or(0.0);
    let promedio_diario = if days_in_period <= 0 { 0.0 } else { instantaneo / days_in_period as f64 };

    let mes_anio = format!("{} {}", MESES[usize::from(u8::from(inicio.month())) - 1], inicio.year());
    let fecha_inicio = inicio.format(date_fmt)?;
    let fecha_fin = fin.format(date_fmt)?;

    Ok(Report {
        nombre: format!("Informe de flujo {mes_anio}"),
        fecha_generacion: now,
        periodo: format!("{fecha_inicio} - {fecha_fin}"),
        fecha_inicio,
        fecha_fin,
        mes_anio,
        datos: ReportData {
            flujo_instantaneo: instantaneo,
            flujo_acumulado: acumulado,
            promedio_diario,
        },
        estadisticas: ReportStats {
            total_litros: acumulado,
            promedio_lmin: instantaneo,
        },
    })
}

impl ReportStore {
    pub fn new<P: Into<PathBuf>>(dir: P, clock: SharedClock) -> Result<Self, ReportError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        info!("[informes] store initialized at {:?}", dir);
        Ok(Self { dir, clock })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Charge tous les informes lisibles ; un fichier invalide est ignoré
    async fn load_all(&self) -> Result<Vec<(String, Report)>, ReportError> {
        let mut reports = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let parsed = match fs::read_to_string(&path).await {
                Ok(content) => serde_json::from_str::<Report>(&content).ok(),
                Err(_) => None,
            };
            match parsed {
                Some(report) => reports.push((id, report)),
                None => debug!("[informes] skipping unreadable file {:?}", path),
            }
        }
        Ok(reports)
    }

    /// Informes triés du plus récent au plus ancien (horodatage complet)
    pub async fn list(&self) -> Result<Vec<ReportSummary>, ReportError> {
        let mut reports = self.load_all().await?;
        reports.sort_by(|a, b| b.1.fecha_generacion.cmp(&a.1.fecha_generacion));
        Ok(reports
            .into_iter()
            .map(|(id, r)| ReportSummary {
                id,
                nombre: r.nombre,
                fecha_generacion: r.fecha_generacion,
                periodo: r.periodo,
                mes_anio: r.mes_anio,
            })
            .collect())
    }

    pub async fn count(&self) -> usize {
        self.load_all().await.map(|r| r.len()).unwrap_or(0)
    }

    /// Heuristique en jours écoulés, pas une vraie frontière de mois
    pub async fn check_guard(&self, now: OffsetDateTime) -> Result<(), ReportError> {
        let month_len = days_in_month(now.year(), now.month());
        for (id, report) in self.load_all().await? {
            let generated = report.fecha_generacion.to_offset(UtcOffset::UTC);
            if generated.year() != now.year() || generated.month() != now.month() {
                continue;
            }
            let elapsed = (now - generated).whole_days();
            if elapsed < month_len {
                return Err(ReportError::Duplicate {
                    days_remaining: month_len - elapsed,
                    existing_report_id: id,
                });
            }
        }
        Ok(())
    }

    /// Écrit un nouvel informe ; un fichier existant n'est jamais écrasé
    pub async fn create(&self, reading: &FlowmeterReading, now: OffsetDateTime) -> Result<(String, Report), ReportError> {
        let report = build_report(reading, now)?;
        let id = format!(
            "informe_{}",
            now.format(format_description!("[year][month][day]_[hour][minute][second]"))?
        );
        let json = serde_json::to_string_pretty(&report)?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path_for(&id))
            .await?;
        file.write_all(json.as_bytes()).await?;
        file.flush().await?;

        info!("[informes] written {}", id);
        Ok((id, report))
    }

    pub async fn get(&self, id: &str) -> Result<Report, ReportError> {
        if !is_valid_id(id) {
            return Err(ReportError::NotFound(id.to_string()));
        }
        let content = match fs::read_to_string(self.path_for(id)).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ReportError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    pub async fn delete(&self, id: &str) -> Result<(), ReportError> {
        if !is_valid_id(id) {
            return Err(ReportError::NotFound(id.to_string()));
        }
        match fs::remove_file(self.path_for(id)).await {
            Ok(()) => {
                info!("[informes] deleted {}", id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ReportError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Garde mensuelle, puis données (cache sinon live), puis écriture
    pub async fn generate<S: ReadingSource>(
        &self,
        flowmeter: &FlowmeterService<S>,
    ) -> Result<(String, Report), ReportError> {
        let now = self.clock.now();
        self.check_guard(now).await?;

        let reading = match flowmeter.cache().latest() {
            Some(entry) => entry.reading,
            None => flowmeter
                .fetch_live()
                .await
                .map_err(|e| ReportError::InsufficientData(e.to_string()))?,
        };
        self.create(&reading, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arduino::ArduinoError;
    use crate::clock::manual::ManualClock;
    use crate::clock::Clock;
    use crate::flowmeter::fake::{reading, ScriptedSource};
    use crate::flowmeter::FlowmeterCache;
    use std::sync::Arc;
    use time::macros::{date, datetime};
    use time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        clock: Arc<ManualClock>,
        store: ReportStore,
        flowmeter: FlowmeterService<ScriptedSource>,
    }

    fn fixture(start: OffsetDateTime) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(start);
        let store = ReportStore::new(dir.path().join("informes"), clock.clone()).unwrap();
        let cache = FlowmeterCache::new(Duration::seconds(8), clock.clone());
        let flowmeter = FlowmeterService::new(ScriptedSource::default(), cache);
        Fixture { _dir: dir, clock, store, flowmeter }
    }

    #[test]
    fn test_build_report_period_and_average() {
        let report = build_report(&reading(12.0, 900.0), datetime!(2026-10-19 08:30 UTC)).unwrap();
        assert_eq!(report.fecha_inicio, "2026-09-01");
        assert_eq!(report.fecha_fin, "2026-10-19");
        assert_eq!(report.mes_anio, "septiembre 2026");
        // 48 jours entre le 1er septembre et le 19 octobre
        assert!((report.datos.promedio_diario - 0.25).abs() < 1e-9);
        assert_eq!(report.estadisticas.total_litros, 900.0);
    }

    #[test]
    fn test_january_rolls_back_to_december() {
        assert_eq!(previous_month_start(date!(2026 - 01 - 10)).unwrap(), date!(2025 - 12 - 01));
        let report = build_report(&reading(1.0, 1.0), datetime!(2026-01-10 00:00 UTC)).unwrap();
        assert_eq!(report.mes_anio, "diciembre 2025");
    }

    #[tokio::test]
    async fn test_generate_then_duplicate() {
        let fx = fixture(datetime!(2026-10-19 12:00 UTC));
        fx.flowmeter.cache().store(reading(5.0, 50.0));

        let (id, report) = fx.store.generate(&fx.flowmeter).await.unwrap();
        assert_eq!(id, "informe_20261019_120000");
        assert_eq!(report.datos.flujo_acumulado, 50.0);

        let list = fx.store.list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, id);

        fx.clock.advance(Duration::minutes(1));
        match fx.store.generate(&fx.flowmeter).await {
            Err(ReportError::Duplicate { days_remaining, existing_report_id }) => {
                assert!(days_remaining > 0);
                assert_eq!(existing_report_id, id);
            }
            other => panic!("unexpected: {other:?}"),
        }
        // la source live n'est jamais sollicitée quand le cache a une entrée
        assert_eq!(fx.flowmeter.source().calls(), 0);
    }

    #[tokio::test]
    async fn test_new_month_passes_guard() {
        let fx = fixture(datetime!(2026-09-30 23:00 UTC));
        fx.flowmeter.cache().store(reading(5.0, 50.0));
        fx.store.generate(&fx.flowmeter).await.unwrap();

        fx.clock.set(datetime!(2026-10-01 01:00 UTC));
        fx.store.generate(&fx.flowmeter).await.unwrap();

        let list = fx.store.list().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "informe_20261001_010000");
        assert_eq!(list[1].id, "informe_20260930_230000");
    }

    #[tokio::test]
    async fn test_generate_without_cache_reads_live() {
        let fx = fixture(datetime!(2026-10-19 12:00 UTC));
        fx.flowmeter.source().push(Ok(reading(7.0, 70.0)));

        let (_, report) = fx.store.generate(&fx.flowmeter).await.unwrap();
        assert_eq!(report.datos.flujo_instantaneo, 7.0);
        assert_eq!(fx.flowmeter.source().calls(), 1);
        assert!(fx.flowmeter.cache().latest().is_some());
    }

    #[tokio::test]
    async fn test_generate_without_any_data_fails() {
        let fx = fixture(datetime!(2026-10-19 12:00 UTC));
        fx.flowmeter.source().push(Err(ArduinoError::RateLimited));

        let err = fx.store.generate(&fx.flowmeter).await.unwrap_err();
        assert!(matches!(err, ReportError::InsufficientData(_)));
        assert!(fx.store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_skips_garbage_and_sorts_by_full_timestamp() {
        let fx = fixture(datetime!(2026-08-05 09:00:00 UTC));
        fx.store.create(&reading(1.0, 1.0), datetime!(2026-08-05 09:00:00 UTC)).await.unwrap();
        fx.store.create(&reading(1.0, 1.0), datetime!(2026-08-05 09:00:30 UTC)).await.unwrap();
        std::fs::write(fx.store.dir.join("roto.json"), "{ not json").unwrap();
        std::fs::write(fx.store.dir.join("notas.txt"), "hola").unwrap();

        let list = fx.store.list().await.unwrap();
        let ids: Vec<&str> = list.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["informe_20260805_090030", "informe_20260805_090000"]);
    }

    #[tokio::test]
    async fn test_create_never_overwrites() {
        let fx = fixture(datetime!(2026-10-19 12:00 UTC));
        let now = datetime!(2026-10-19 12:00 UTC);
        fx.store.create(&reading(1.0, 1.0), now).await.unwrap();
        assert!(matches!(fx.store.create(&reading(2.0, 2.0), now).await, Err(ReportError::Io(_))));
        let kept = fx.store.get("informe_20261019_120000").await.unwrap();
        assert_eq!(kept.datos.flujo_instantaneo, 1.0);
    }

    #[tokio::test]
    async fn test_get_and_delete() {
        let fx = fixture(datetime!(2026-10-19 12:00 UTC));
        let (id, report) = fx.store.create(&reading(3.0, 30.0), fx.clock.now()).await.unwrap();
        assert_eq!(fx.store.get(&id).await.unwrap(), report);

        fx.store.delete(&id).await.unwrap();
        assert!(matches!(fx.store.get(&id).await, Err(ReportError::NotFound(_))));
        assert!(matches!(fx.store.delete(&id).await, Err(ReportError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_missing_and_malformed_ids_are_not_found() {
        let fx = fixture(datetime!(2026-10-19 12:00 UTC));
        assert!(matches!(fx.store.delete("informe_19990101_000000").await, Err(ReportError::NotFound(_))));
        assert!(matches!(fx.store.get("informe_19990101_000000").await, Err(ReportError::NotFound(_))));
        assert!(matches!(fx.store.get("../visitas").await, Err(ReportError::NotFound(_))));
    }
}
