use super::WeatherError;
use serde::Serialize;
use serde_json::{json, Map, Value};

const CLOUD_FACTOR: f64 = 124.69;
/// En dessous, la formule point de rosée → base des nuages n'a plus de sens
const MIN_VALID_TEMP: f64 = -40.0;
const WIND_EPSILON: f64 = 0.0001;

/// Base des nuages estimée en mètres, `None` hors domaine de validité
pub fn clouds_height(temp: Option<f64>, dew: Option<f64>) -> Option<f64> {
    let (temp, dew) = (temp?, dew?);
    if temp > MIN_VALID_TEMP && dew > MIN_VALID_TEMP {
        Some((CLOUD_FACTOR * (temp - dew)).max(0.0))
    } else {
        None
    }
}

fn number(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    obj.get(key).filter(|v| v.is_number()).and_then(Value::as_f64)
}

/// Enrichit une réponse /values : `computed` + visibilité ×100
pub fn enrich_values(mut data: Value) -> Result<Value, WeatherError> {
    let obj = data
        .as_object_mut()
        .ok_or_else(|| WeatherError::InvalidPayload("se esperaba un objeto".into()))?;

    let height = clouds_height(number(obj, "temp"), number(obj, "dew"));
    obj.insert(
        "computed".into(),
        json!({ "cloudsHeight": height, "feel": null, "weatherAvg": null }),
    );

    if let Some(vis) = number(obj, "vis") {
        obj.insert("vis".into(), json!(vis * 100.0));
    }
    Ok(data)
}

#[derive(Debug, Clone, Serialize)]
pub struct WindSummary {
    pub date: Value,
    pub wdirproportions: Vec<f64>,
    pub calm: f64,
    pub raw: Value,
}

/// Répartition des directions ; le premier seau représente le calme
pub fn wind_summary(raw: Value) -> Result<WindSummary, WeatherError> {
    let buckets = raw
        .as_array()
        .ok_or_else(|| WeatherError::InvalidPayload("se esperaba una lista".into()))?;

    let magnitudes = buckets
        .iter()
        .map(|item| {
            item.pointer("/values/scale")
                .and_then(Value::as_array)
                .map(|scale| scale.iter().filter_map(Value::as_f64).sum::<f64>())
                .ok_or(WeatherError::MissingField("values.scale"))
        })
        .collect::<Result<Vec<f64>, _>>()?;

    let total = magnitudes.iter().sum::<f64>() + WIND_EPSILON;
    let calm = magnitudes.first().map(|m| m / total * 100.0).unwrap_or(0.0);
    let date = buckets.first().and_then(|b| b.get("date")).cloned().unwrap_or(Value::Null);

    Ok(WindSummary {
        date,
        wdirproportions: magnitudes.iter().map(|m| m / total * 100.0).collect(),
        calm,
        raw,
    })
}
