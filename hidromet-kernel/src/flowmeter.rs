/**
 * FLOWMETER CACHE - Cache mono-entrée des lectures du débitmètre
 *
 * RÔLE :
 * Évite de re-solliciter Arduino IoT Cloud (quota agressif) et sert de
 * valeur de repli quand l'amont échoue ou limite le débit.
 *
 * FONCTIONNEMENT :
 * - Un seul slot (dernière écriture gagnante), horodaté par l'horloge injectée
 * - FRESH tant que now - fetched_at < TTL, STALE ensuite, jamais évincé
 * - Lecture FRESH → réponse immédiate cached=true, aucun appel amont
 * - Sinon lecture live ; en cas d'échec, repli sur l'entrée existante
 *   (même périmée) avec un avertissement, sinon propagation de l'erreur
 */

use crate::arduino::{ArduinoClient, ArduinoError, FlowmeterReading};
use crate::clock::SharedClock;
use crate::state::{new_state, Shared};
use serde::Serialize;
use std::future::Future;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

/// Source live d'une lecture (Arduino en production, factice en test)
pub trait ReadingSource: Send + Sync {
    fn fetch(&self) -> impl Future<Output = Result<FlowmeterReading, ArduinoError>> + Send;
}

impl ReadingSource for ArduinoClient {
    async fn fetch(&self) -> Result<FlowmeterReading, ArduinoError> {
        let token = self.fetch_token().await?;
        self.resolve_flowmeter(&token).await
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub reading: FlowmeterReading,
    pub fetched_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    Empty,
    Fresh,
    Stale,
}

pub struct FlowmeterCache {
    slot: Shared<Option<CacheEntry>>,
    ttl: Duration,
    clock: SharedClock,
}

impl FlowmeterCache {
    pub fn new(ttl: Duration, clock: SharedClock) -> Self {
        Self { slot: new_state(None), ttl, clock }
    }

    pub fn state(&self) -> CacheState {
        match &*self.slot.lock() {
            None => CacheState::Empty,
            Some(entry) if self.is_fresh(entry) => CacheState::Fresh,
            Some(_) => CacheState::Stale,
        }
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        self.clock.now() - entry.fetched_at < self.ttl
    }

    /// Entrée encore dans le TTL
    pub fn fresh(&self) -> Option<FlowmeterReading> {
        let slot = self.slot.lock();
        slot.as_ref().filter(|e| self.is_fresh(e)).map(|e| e.reading.clone())
    }

    /// Dernière entrée connue, fraîche ou périmée
    pub fn latest(&self) -> Option<CacheEntry> {
        self.slot.lock().clone()
    }

    pub fn store(&self, reading: FlowmeterReading) {
        let entry = CacheEntry { reading, fetched_at: self.clock.now() };
        *self.slot.lock() = Some(entry);
    }
}

/// Réponse de lecture telle qu'exposée par /api/arduino/flowmeter
#[derive(Debug, Clone, Serialize)]
pub struct FlowmeterResponse {
    pub data: FlowmeterReading,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

pub struct FlowmeterService<S = ArduinoClient> {
    source: S,
    cache: FlowmeterCache,
}

impl<S: ReadingSource> FlowmeterService<S> {
    pub fn new(source: S, cache: FlowmeterCache) -> Self {
        Self { source, cache }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn cache(&self) -> &FlowmeterCache {
        &self.cache
    }

    /// Lecture live sans passer par le TTL ; alimente le cache en cas de succès
    pub async fn fetch_live(&self) -> Result<FlowmeterReading, ArduinoError> {
        let reading = self.source.fetch().await?;
        self.cache.store(reading.clone());
        Ok(reading)
    }

    pub async fn read(&self) -> Result<FlowmeterResponse, ArduinoError> {
        if let Some(reading) = self.cache.fresh() {
            return Ok(FlowmeterResponse { data: reading, cached: true, warning: None });
        }

        match self.fetch_live().await {
            Ok(reading) => {
                info!("[flowmeter] live reading stored for {}", reading.thing_id);
                Ok(FlowmeterResponse { data: reading, cached: false, warning: None })
            }
            Err(err) => {
                let Some(entry) = self.cache.latest() else {
                    warn!("[flowmeter] live read failed with empty cache: {err}");
                    return Err(err);
                };
                let warning = match err {
                    ArduinoError::RateLimited => {
                        "Límite de peticiones alcanzado; se devuelve la última lectura disponible".to_string()
                    }
                    ref other => format!("Error al consultar Arduino IoT Cloud ({other}); se devuelve la última lectura disponible"),
                };
                warn!("[flowmeter] serving cached reading from {}: {err}", entry.fetched_at);
                Ok(FlowmeterResponse { data: entry.reading, cached: true, warning: Some(warning) })
            }
        }
    }
}
