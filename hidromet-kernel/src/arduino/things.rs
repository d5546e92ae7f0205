use super::{check_status, ArduinoClient, ArduinoError, BearerToken, FlowValue, FlowmeterReading, Property, Thing};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

const INSTFLOW: &str = "instflow";
const CONSTFLOW: &str = "constflow";

impl ArduinoClient {
    async fn get_json<T: DeserializeOwned>(&self, path: &str, token: &BearerToken) -> Result<T, ArduinoError> {
        let resp = self
            .http
            .get(self.api_url(path))
            .bearer_auth(token.as_str())
            .send()
            .await?;
        Ok(check_status(resp).await?.json().await?)
    }

    /// GET /v2/things
    pub async fn list_things(&self, token: &BearerToken) -> Result<Vec<Thing>, ArduinoError> {
        self.get_json("/v2/things", token).await
    }

    /// GET /v2/things/{id}/properties
    pub async fn list_properties(&self, token: &BearerToken, thing_id: &str) -> Result<Vec<Property>, ArduinoError> {
        self.get_json(&format!("/v2/things/{thing_id}/properties"), token).await
    }

    /// Résout le thing cible par nom exact puis construit la lecture
    pub async fn resolve_flowmeter(&self, token: &BearerToken) -> Result<FlowmeterReading, ArduinoError> {
        let things = self.list_things(token).await?;
        let Some(thing) = things.iter().find(|t| t.name == self.conf.thing_name) else {
            let available: Vec<String> = things.iter().map(|t| t.name.clone()).collect();
            warn!("[arduino] thing '{}' not found among {:?}", self.conf.thing_name, available);
            return Err(ArduinoError::ThingNotFound {
                name: self.conf.thing_name.clone(),
                available,
            });
        };

        let properties = self.list_properties(token, &thing.id).await?;
        debug!("[arduino] {} properties for thing {}", properties.len(), thing.id);
        Ok(build_reading(thing, &properties))
    }
}

fn find_property<'a>(properties: &'a [Property], needle: &str) -> Option<&'a Property> {
    properties.iter().find(|p| p.name.to_lowercase().contains(needle))
}

fn to_flow_value(property: &Property) -> FlowValue {
    FlowValue {
        value: property.last_value.as_f64(),
        updated_at: property.value_updated_at.clone(),
    }
}

/// Propriété absente → null, jamais une erreur
pub fn build_reading(thing: &Thing, properties: &[Property]) -> FlowmeterReading {
    FlowmeterReading {
        thing_name: thing.name.clone(),
        thing_id: thing.id.clone(),
        instflow: find_property(properties, INSTFLOW).map(to_flow_value),
        constflow: find_property(properties, CONSTFLOW).map(to_flow_value),
    }
}
