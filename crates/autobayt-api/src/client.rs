//! Autobayt REST client

use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult};
use crate::models::Device;

pub const DEFAULT_BASE_URL: &str = "https://api.autobayt.com/v1";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a device detail request
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceLookup {
    Found(Device),
    /// 404, or an empty/`null` body: the device no longer exists
    Deleted,
    /// The body was JSON but not an object
    Unexpected,
}

#[derive(Debug, Clone)]
pub struct AutobaytClient {
    base_url: String,
    client: Client,
}

impl AutobaytClient {
    pub fn new(base_url: impl Into<String>) -> ApiResult<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        Ok(Self { base_url, client })
    }

    /// Client for `https://api.autobayt.com/v1`
    pub fn production() -> ApiResult<Self> {
        Self::new(DEFAULT_BASE_URL)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> ApiResult<Url> {
        let raw = format!("{}/{}", self.base_url, path);
        let parsed = if query.is_empty() {
            Url::parse(&raw)
        } else {
            Url::parse_with_params(&raw, query)
        };
        parsed.map_err(|e| ApiError::InvalidUrl(format!("{}: {}", raw, e)))
    }

    /// Read the body of a 2xx response, or turn the status into an error
    async fn body(response: reqwest::Response) -> ApiResult<String> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    fn parse(body: &str) -> ApiResult<Value> {
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(body)?)
    }

    /// All devices of a user
    ///
    /// A body that is not a JSON list reads as no devices.
    pub async fn user_devices(&self, user_id: &str) -> ApiResult<Vec<Device>> {
        let url = self.url("user/get-things", &[("user_id", user_id)])?;
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        let body = Self::body(response).await?;

        let Value::Array(items) = Self::parse(&body)? else {
            warn!("Device list for user is not a list, treating as empty");
            return Ok(Vec::new());
        };

        let devices: Vec<Device> = items
            .into_iter()
            .filter(Value::is_object)
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()?;
        debug!("User has {} devices", devices.len());
        Ok(devices)
    }

    /// Detail of one device
    pub async fn device_detail(&self, device_id: &str) -> ApiResult<DeviceLookup> {
        let url = self.url("device", &[("device_id", device_id)])?;
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Device {} not found", device_id);
            return Ok(DeviceLookup::Deleted);
        }
        let body = Self::body(response).await?;
        debug!("API response for device {}: {}", device_id, body);

        match Self::parse(&body)? {
            Value::Null => Ok(DeviceLookup::Deleted),
            Value::Object(map) if map.is_empty() => Ok(DeviceLookup::Deleted),
            value @ Value::Object(_) => Ok(DeviceLookup::Found(serde_json::from_value(value)?)),
            other => {
                warn!("Unexpected data type for device {}: {}", device_id, other);
                Ok(DeviceLookup::Unexpected)
            }
        }
    }

    /// Switch one relay button on or off
    pub async fn trigger(&self, device_id: &str, button_id: i64, state: bool) -> ApiResult<()> {
        let url = self.url("device/trigger", &[])?;
        let payload = json!({
            "btnStates": [state],
            "btnIds": [button_id],
            "device_id": device_id,
        });
        debug!("POST {} {}", url, payload);

        let response = self.client.post(url).json(&payload).send().await?;
        Self::body(response).await?;

        debug!(
            "Set switch state for device {} button {} to {}",
            device_id, button_id, state
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    #[tokio::test]
    async fn test_user_devices() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/user/get-things")
            .match_query(Matcher::UrlEncoded(
                "user_id".into(),
                "65a1b2c3d4e5f60718293a4b".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!([
                    {"device_id": "A0B1C2D3E4F5", "name": "Kitchen", "model_name": "SW200LV1"},
                    {"device_id": "B0B1C2D3E4F5", "name": "Hallway"}
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let client = AutobaytClient::new(server.url()).unwrap();
        let devices = client
            .user_devices("65a1b2c3d4e5f60718293a4b")
            .await
            .unwrap();

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name.as_deref(), Some("Kitchen"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_user_devices_non_list_is_empty() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/user/get-things")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!({"message": "no things"}).to_string())
            .create_async()
            .await;

        let client = AutobaytClient::new(server.url()).unwrap();
        assert!(client.user_devices("u").await.unwrap().is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_user_devices_server_error() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/user/get-things")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("upstream down")
            .create_async()
            .await;

        let client = AutobaytClient::new(server.url()).unwrap();
        let result = client.user_devices("u").await;
        assert!(matches!(
            result,
            Err(ApiError::Status { status: 500, ref body }) if body == "upstream down"
        ));
    }

    #[tokio::test]
    async fn test_device_detail_found() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/device")
            .match_query(Matcher::UrlEncoded("device_id".into(), "A0B1C2D3E4F5".into()))
            .with_status(200)
            .with_body(json!({"device_id": "A0B1C2D3E4F5", "firmware_version": "1.0.3"}).to_string())
            .create_async()
            .await;

        let client = AutobaytClient::new(server.url()).unwrap();
        let DeviceLookup::Found(device) = client.device_detail("A0B1C2D3E4F5").await.unwrap() else {
            panic!("expected a device");
        };
        assert_eq!(device.firmware_version.as_deref(), Some("1.0.3"));
    }

    #[tokio::test]
    async fn test_device_detail_deleted_and_unexpected() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/device")
            .match_query(Matcher::UrlEncoded("device_id".into(), "gone".into()))
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/device")
            .match_query(Matcher::UrlEncoded("device_id".into(), "empty".into()))
            .with_status(200)
            .with_body("")
            .create_async()
            .await;
        server
            .mock("GET", "/device")
            .match_query(Matcher::UrlEncoded("device_id".into(), "blank".into()))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        server
            .mock("GET", "/device")
            .match_query(Matcher::UrlEncoded("device_id".into(), "list".into()))
            .with_status(200)
            .with_body("[1, 2]")
            .create_async()
            .await;

        let client = AutobaytClient::new(server.url()).unwrap();
        assert_eq!(client.device_detail("gone").await.unwrap(), DeviceLookup::Deleted);
        assert_eq!(client.device_detail("empty").await.unwrap(), DeviceLookup::Deleted);
        assert_eq!(client.device_detail("blank").await.unwrap(), DeviceLookup::Deleted);
        assert_eq!(client.device_detail("list").await.unwrap(), DeviceLookup::Unexpected);
    }

    #[tokio::test]
    async fn test_trigger_payload() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/device/trigger")
            .match_body(Matcher::Json(json!({
                "btnStates": [true],
                "btnIds": [2],
                "device_id": "A0B1C2D3E4F5"
            })))
            .with_status(200)
            .create_async()
            .await;

        let client = AutobaytClient::new(server.url()).unwrap();
        client.trigger("A0B1C2D3E4F5", 2, true).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_refused_is_http_error() {
        let client = AutobaytClient::new("http://127.0.0.1:9").unwrap();
        let result = client.user_devices("u").await;
        assert!(matches!(result, Err(ApiError::Http(_))));
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            AutobaytClient::new("not a url"),
            Err(ApiError::InvalidUrl(_))
        ));
    }
}
