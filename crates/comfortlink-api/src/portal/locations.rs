// Inventory and per-device detail endpoints

use chrono::Utc;
use reqwest::Method;
use tracing::debug;

use crate::error::Error;
use crate::portal::client::{RequestBody, SessionClient};
use crate::portal::models::{DeviceDetail, LocationRecord};

/// Inventory endpoint, relative to the portal root.
pub const LOCATIONS_PATH: &str = "Location/GetLocationListData?page=1&filter=";

/// Detail endpoint prefix; the device id is appended.
pub const DEVICE_DETAIL_PATH: &str = "Device/CheckDataSession/";

impl SessionClient {
    /// Fetch every location of the account with its device list.
    pub async fn list_locations(&self) -> Result<Vec<LocationRecord>, Error> {
        let locations: Vec<LocationRecord> = self
            .request(Method::POST, LOCATIONS_PATH, RequestBody::Empty)
            .await?;
        debug!(count = locations.len(), "fetched location list");
        Ok(locations)
    }

    /// Fetch the current operating data of one device.
    pub async fn device_detail(&self, device_id: u64) -> Result<DeviceDetail, Error> {
        // The portal caches aggressively; the timestamp defeats it.
        let path = format!(
            "{DEVICE_DETAIL_PATH}{device_id}?_={}",
            Utc::now().timestamp_millis()
        );
        self.request(Method::GET, &path, RequestBody::Empty).await
    }
}
