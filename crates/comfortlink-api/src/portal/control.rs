// Device control submission

use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use crate::error::Error;
use crate::portal::client::{RequestBody, SessionClient};
use crate::portal::models::ControlChange;

/// Control endpoint, relative to the portal root.
pub const CONTROL_PATH: &str = "Device/SubmitControlScreenChanges";

impl SessionClient {
    /// Submit a control change (mode, setpoints, fan).
    ///
    /// Goes through the same session check and classification as every
    /// other data request; a `success: 0` reply is [`Error::ApiRejected`].
    pub async fn submit_control(&self, change: &ControlChange) -> Result<(), Error> {
        let body = serde_json::to_value(change).map_err(|e| Error::MalformedResponse {
            message: format!("could not encode control change: {e}"),
            body: String::new(),
        })?;
        debug!(device_id = change.device_id, "submitting control change");
        let _: Value = self
            .request(Method::POST, CONTROL_PATH, RequestBody::Json(body))
            .await?;
        Ok(())
    }
}
