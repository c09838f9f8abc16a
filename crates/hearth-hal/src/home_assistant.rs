//! [`HomeAssistantGateway`] – Home Assistant REST client.
//!
//! | Operation | Request |
//! |---|---|
//! | `list_devices` | `GET /api/states` |
//! | `get_device` | `GET /api/states/{entity_id}` |
//! | `call_service` | `POST /api/services/{domain}/{service}` with `{"entity_id": ..., ...params}` |
//! | `test_connection` | `GET /api/` |
//!
//! Every request carries `Authorization: Bearer <token>` and the fixed
//! timeout given at construction.  There is no automatic retry.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hearth_types::{Device, DeviceType, Parameters};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::gateway::{Gateway, GatewayError};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One entry of the `/api/states` response.
#[derive(Debug, Deserialize)]
struct EntityState {
    entity_id: String,
    state: String,
    #[serde(default)]
    attributes: serde_json::Map<String, Value>,
    #[serde(default)]
    last_updated: Option<String>,
}

impl From<EntityState> for Device {
    fn from(entity: EntityState) -> Self {
        let domain = entity
            .entity_id
            .split_once('.')
            .map(|(d, _)| d)
            .unwrap_or(entity.entity_id.as_str())
            .to_string();
        let name = entity
            .attributes
            .get("friendly_name")
            .and_then(Value::as_str)
            .unwrap_or(entity.entity_id.as_str())
            .to_string();
        let last_updated = entity
            .last_updated
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        Device {
            device_type: DeviceType::from_domain(&domain),
            id: entity.entity_id,
            name,
            state: entity.state,
            attributes: entity.attributes,
            domain,
            last_updated,
        }
    }
}

/// REST client for a Home Assistant instance.
pub struct HomeAssistantGateway {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HomeAssistantGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HomeAssistantGateway")
            .field("base_url", &self.base_url)
            .field("token", if self.token.is_empty() { &"<not set>" } else { &"<redacted>" })
            .finish()
    }
}

impl HomeAssistantGateway {
    /// Build a client for `base_url` (e.g. `"http://homeassistant.local:8123"`)
    /// authenticating with a long-lived access `token`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Http`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn checked(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(GatewayError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Gateway for HomeAssistantGateway {
    async fn list_devices(&self) -> Result<Vec<Device>, GatewayError> {
        let response = self
            .client
            .get(self.url("/api/states"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let entities: Vec<EntityState> = Self::checked(response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::BadResponse(e.to_string()))?;
        debug!(count = entities.len(), "fetched entity states");
        Ok(entities.into_iter().map(Device::from).collect())
    }

    async fn get_device(&self, id: &str) -> Result<Device, GatewayError> {
        let response = self
            .client
            .get(self.url(&format!("/api/states/{id}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(id.to_string()));
        }
        let entity: EntityState = Self::checked(response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::BadResponse(e.to_string()))?;
        Ok(entity.into())
    }

    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        target_id: &str,
        params: &Parameters,
    ) -> Result<(), GatewayError> {
        let mut body = params.clone();
        body.insert("entity_id".into(), Value::String(target_id.to_string()));
        let response = self
            .client
            .post(self.url(&format!("/api/services/{domain}/{service}")))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        Self::checked(response).await?;
        debug!(domain, service, target_id, "service call accepted");
        Ok(())
    }

    async fn test_connection(&self) -> Result<(), GatewayError> {
        let response = self
            .client
            .get(self.url("/api/"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::checked(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    // ------------------------------------------------------------------
    // Canned single-request HTTP responder
    // ------------------------------------------------------------------

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= pos + 4 + len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request
        });
        (format!("http://{addr}"), handle)
    }

    // ------------------------------------------------------------------
    // Entity conversion
    // ------------------------------------------------------------------

    #[test]
    fn entity_converts_to_device() {
        let entity: EntityState = serde_json::from_str(
            r#"{"entity_id":"light.bedroom","state":"on",
                "attributes":{"friendly_name":"Bedroom Light","brightness":200},
                "last_updated":"2024-05-01T10:00:00+00:00"}"#,
        )
        .unwrap();
        let device = Device::from(entity);
        assert_eq!(device.id, "light.bedroom");
        assert_eq!(device.name, "Bedroom Light");
        assert_eq!(device.domain, "light");
        assert_eq!(device.device_type, DeviceType::Light);
        assert_eq!(device.attributes["brightness"], 200);
        assert_eq!(device.last_updated.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn entity_without_friendly_name_uses_id() {
        let entity: EntityState =
            serde_json::from_str(r#"{"entity_id":"binary_sensor.door","state":"off"}"#).unwrap();
        let device = Device::from(entity);
        assert_eq!(device.name, "binary_sensor.door");
        assert_eq!(device.device_type, DeviceType::Sensor);
    }

    #[test]
    fn debug_redacts_token() {
        let gw = HomeAssistantGateway::new("http://ha:8123/", "secret-token", DEFAULT_TIMEOUT)
            .unwrap();
        let debug = format!("{gw:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("http://ha:8123\""));
    }

    // ------------------------------------------------------------------
    // Wire behaviour
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn list_devices_sends_bearer_token() {
        let (url, server) = serve_once(
            "200 OK",
            r#"[{"entity_id":"switch.fan","state":"off","attributes":{}}]"#,
        )
        .await;
        let gw = HomeAssistantGateway::new(url, "tok123", DEFAULT_TIMEOUT).unwrap();
        let devices = gw.list_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_type, DeviceType::Switch);

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/states HTTP/1.1"));
        assert!(request.to_lowercase().contains("authorization: bearer tok123"));
    }

    #[tokio::test]
    async fn call_service_posts_entity_and_params() {
        let (url, server) = serve_once("200 OK", "[]").await;
        let gw = HomeAssistantGateway::new(url, "tok", DEFAULT_TIMEOUT).unwrap();
        let mut params = Parameters::new();
        params.insert("brightness".into(), 128.into());
        gw.call_service("light", "turn_on", "light.kitchen", &params)
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/services/light/turn_on HTTP/1.1"));
        let body = request.split("\r\n\r\n").nth(1).unwrap();
        let json: Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["entity_id"], "light.kitchen");
        assert_eq!(json["brightness"], 128);
    }

    #[tokio::test]
    async fn get_device_404_is_not_found() {
        let (url, _server) = serve_once("404 Not Found", r#"{"message":"Entity not found."}"#).await;
        let gw = HomeAssistantGateway::new(url, "tok", DEFAULT_TIMEOUT).unwrap();
        let err = gw.get_device("light.ghost").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(ref id) if id == "light.ghost"));
    }

    #[tokio::test]
    async fn server_error_is_status() {
        let (url, _server) = serve_once("500 Internal Server Error", r#"{"message":"boom"}"#).await;
        let gw = HomeAssistantGateway::new(url, "tok", DEFAULT_TIMEOUT).unwrap();
        let err = gw.test_connection().await.unwrap_err();
        assert!(matches!(err, GatewayError::Status { status: 500, .. }));
    }
}
