// CLIP v2 resource endpoints
//
// Inherent methods on `BridgeSession` for the resource collections huectl
// tracks. Collection reads skip (and log) elements that fail validation so
// one odd resource cannot hide the rest.

use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::Error;
use crate::models::{
    Group, GroupedLight, Light, LightUpdate, Resource, ResourceIdentifier, ResourceType, Scene,
    SceneRecall,
};
use crate::session::BridgeSession;

impl BridgeSession {
    async fn fetch<T: DeserializeOwned>(&self, rtype: ResourceType) -> Result<Vec<T>, Error> {
        let data = self.request(Method::GET, &rtype.path(), None).await?;
        Ok(data
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<T>(value) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(resource_type = %rtype, error = %e, "skipping invalid resource");
                    None
                }
            })
            .collect())
    }

    /// Fetch every resource of one type as the tagged [`Resource`] union.
    pub async fn list(&self, rtype: ResourceType) -> Result<Vec<Resource>, Error> {
        self.fetch(rtype).await
    }

    pub async fn get_lights(&self) -> Result<Vec<Light>, Error> {
        self.fetch(ResourceType::Light).await
    }

    pub async fn get_grouped_lights(&self) -> Result<Vec<GroupedLight>, Error> {
        self.fetch(ResourceType::GroupedLight).await
    }

    pub async fn get_rooms(&self) -> Result<Vec<Group>, Error> {
        self.fetch(ResourceType::Room).await
    }

    pub async fn get_zones(&self) -> Result<Vec<Group>, Error> {
        self.fetch(ResourceType::Zone).await
    }

    pub async fn get_scenes(&self) -> Result<Vec<Scene>, Error> {
        self.fetch(ResourceType::Scene).await
    }

    /// `PUT /resource/{rtype}/{id}` with an arbitrary JSON body.
    pub async fn update(
        &self,
        rtype: ResourceType,
        id: &str,
        body: &serde_json::Value,
    ) -> Result<Vec<ResourceIdentifier>, Error> {
        self.request_as(Method::PUT, &rtype.item_path(id), Some(body))
            .await
    }

    pub async fn update_light(
        &self,
        id: &str,
        update: &LightUpdate,
    ) -> Result<Vec<ResourceIdentifier>, Error> {
        self.update(ResourceType::Light, id, &to_body(update)?).await
    }

    pub async fn update_grouped_light(
        &self,
        id: &str,
        update: &LightUpdate,
    ) -> Result<Vec<ResourceIdentifier>, Error> {
        self.update(ResourceType::GroupedLight, id, &to_body(update)?)
            .await
    }

    pub async fn recall_scene(&self, id: &str) -> Result<Vec<ResourceIdentifier>, Error> {
        self.update(ResourceType::Scene, id, &to_body(&SceneRecall::default())?)
            .await
    }
}

fn to_body(value: &impl serde::Serialize) -> Result<serde_json::Value, Error> {
    serde_json::to_value(value).map_err(|e| Error::Deserialization {
        message: format!("failed to encode request body: {e}"),
        body: String::new(),
    })
}
