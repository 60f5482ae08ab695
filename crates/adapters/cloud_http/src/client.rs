//! Signed REST client implementing [`CloudApi`].

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};

use efbridge_app::ports::CloudApi;
use efbridge_domain::device::{DeviceInfo, DeviceSn};
use efbridge_domain::error::BridgeError;
use efbridge_domain::payload::RawMessage;

use crate::config::CloudConfig;
use crate::error::CloudError;
use crate::signing;

const DEFAULT_PRODUCT_NAME: &str = "EcoFlowDevice";

/// MQTT broker access issued by `/certification`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certification {
    pub account: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub protocol: String,
}

impl Certification {
    /// Whether the broker expects a TLS connection.
    #[must_use]
    pub fn tls(&self) -> bool {
        matches!(self.protocol.as_str(), "mqtts" | "ssl")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CertificationDto {
    certificate_account: String,
    certificate_password: String,
    url: String,
    port: PortDto,
    #[serde(default)]
    protocol: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortDto {
    Number(u16),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceDto {
    sn: String,
    product_name: Option<String>,
    device_name: Option<String>,
    #[serde(default)]
    online: i64,
}

impl From<DeviceDto> for DeviceInfo {
    fn from(dto: DeviceDto) -> Self {
        let product_type = dto
            .product_name
            .unwrap_or_else(|| DEFAULT_PRODUCT_NAME.to_string());
        let display_name = dto
            .device_name
            .unwrap_or_else(|| format!("{product_type}-{}", dto.sn));
        Self {
            sn: DeviceSn::new(dto.sn),
            display_name,
            product_type,
            online: dto.online == 1,
        }
    }
}

/// Client for the vendor's signed public API.
#[derive(Debug, Clone)]
pub struct CloudClient {
    http: reqwest::Client,
    base_url: String,
    access_key: String,
    secret_key: String,
}

impl CloudClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &CloudConfig) -> Result<Self, CloudError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(CloudError::Http)?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
        })
    }

    /// Request MQTT credentials for this account.
    ///
    /// # Errors
    ///
    /// Returns a [`CloudError`] when the call fails or the answer lacks the
    /// certificate fields.
    pub async fn certification(&self) -> Result<Certification, CloudError> {
        tracing::info!("requesting MQTT credentials");
        let mut body = self.get("/certification", &[]).await?;
        let data = body.remove("data").ok_or(CloudError::Shape("data"))?;
        let dto: CertificationDto = serde_json::from_value(data).map_err(CloudError::InvalidJson)?;

        let port = match dto.port {
            PortDto::Number(port) => port,
            PortDto::Text(text) => text.trim().parse().map_err(|_| CloudError::Shape("data.port"))?,
        };
        Ok(Certification {
            account: dto.certificate_account,
            password: dto.certificate_password,
            host: dto.url,
            port,
            protocol: dto.protocol,
        })
    }

    /// Every device registered to the account.
    ///
    /// # Errors
    ///
    /// Returns a [`CloudError`] when the call fails or `data` is not a list
    /// of devices.
    pub async fn device_list(&self) -> Result<Vec<DeviceInfo>, CloudError> {
        let mut body = self.get("/device/list", &[]).await?;
        let data = body.remove("data").ok_or(CloudError::Shape("data"))?;
        let devices: Vec<DeviceDto> =
            serde_json::from_value(data).map_err(CloudError::InvalidJson)?;
        tracing::debug!(count = devices.len(), "fetched device list");
        Ok(devices.into_iter().map(DeviceInfo::from).collect())
    }

    /// Full `{code, message, data}` quota answer for one device.
    ///
    /// # Errors
    ///
    /// Returns a [`CloudError`] when the call fails.
    pub async fn quota_all(&self, sn: &DeviceSn) -> Result<RawMessage, CloudError> {
        self.get("/device/quota/all", &[("sn", sn.as_str())]).await
    }

    async fn get(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<Map<String, Value>, CloudError> {
        let query = signing::canonical_query(params);
        let signature = signing::sign_now(&self.access_key, &self.secret_key, &query)?;

        let mut url = format!("{}{endpoint}", self.base_url);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }

        let response = self
            .http
            .get(&url)
            .header("accessKey", &self.access_key)
            .header("nonce", &signature.nonce)
            .header("timestamp", &signature.timestamp)
            .header("sign", &signature.sign)
            .send()
            .await
            .map_err(CloudError::Http)?;

        let status = response.status();
        let text = response.text().await.map_err(CloudError::Http)?;
        tracing::debug!(endpoint, %status, bytes = text.len(), "cloud response");

        if status != StatusCode::OK {
            return Err(CloudError::Status {
                status: status.as_u16(),
            });
        }

        let body = serde_json::from_str::<Value>(&text).map_err(CloudError::InvalidJson)?;
        let Value::Object(body) = body else {
            return Err(CloudError::Shape("$"));
        };
        check_code(&body)?;
        Ok(body)
    }
}

/// Reject answers whose `code` is present and not `"0"`.
fn check_code(body: &Map<String, Value>) -> Result<(), CloudError> {
    let code = match body.get("code") {
        None => return Ok(()),
        Some(Value::String(code)) => code.clone(),
        Some(other) => other.to_string(),
    };
    if code == "0" {
        return Ok(());
    }
    Err(CloudError::Api {
        code,
        message: body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

impl CloudApi for CloudClient {
    fn fetch_all_devices(
        &self,
    ) -> impl Future<Output = Result<Vec<DeviceInfo>, BridgeError>> + Send {
        async move { Ok(self.device_list().await?) }
    }

    fn fetch_quota_all(
        &self,
        sn: &DeviceSn,
    ) -> impl Future<Output = Result<RawMessage, BridgeError>> + Send {
        async move { Ok(self.quota_all(sn).await?) }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> CloudClient {
        CloudClient::new(&CloudConfig {
            base_url: server.uri(),
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            ..CloudConfig::default()
        })
        .unwrap()
    }

    async fn mount(server: &MockServer, endpoint: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn should_send_signature_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/device/list"))
            .and(header("accessKey", "ak"))
            .and(header_exists("nonce"))
            .and(header_exists("timestamp"))
            .and(header_exists("sign"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"code": "0", "data": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let devices = client(&server).device_list().await.unwrap();
        assert!(devices.is_empty());
    }

    #[tokio::test]
    async fn should_parse_certification_with_string_port() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/certification",
            ResponseTemplate::new(200).set_body_json(json!({
                "code": "0",
                "message": "Success",
                "data": {
                    "certificateAccount": "open-abc",
                    "certificatePassword": "pw",
                    "url": "mqtt-e.ecoflow.com",
                    "port": "8883",
                    "protocol": "mqtts"
                }
            })),
        )
        .await;

        let cert = client(&server).certification().await.unwrap();
        assert_eq!(cert.account, "open-abc");
        assert_eq!(cert.host, "mqtt-e.ecoflow.com");
        assert_eq!(cert.port, 8883);
        assert!(cert.tls());
    }

    #[tokio::test]
    async fn should_default_missing_device_names() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/device/list",
            ResponseTemplate::new(200).set_body_json(json!({
                "code": "0",
                "data": [
                    {"sn": "HJ31", "productName": "PowerOcean", "deviceName": "Home", "online": 1},
                    {"sn": "R331", "online": 0}
                ]
            })),
        )
        .await;

        let devices = client(&server).device_list().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].display_name, "Home");
        assert!(devices[0].online);
        assert_eq!(devices[1].product_type, "EcoFlowDevice");
        assert_eq!(devices[1].display_name, "EcoFlowDevice-R331");
        assert!(!devices[1].online);
    }

    #[tokio::test]
    async fn should_pass_serial_as_query_for_quota() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/device/quota/all"))
            .and(query_param("sn", "HJ31"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "0",
                "message": "Success",
                "data": {"bpSoc": 80}
            })))
            .mount(&server)
            .await;

        let quota = client(&server)
            .fetch_quota_all(&DeviceSn::new("HJ31"))
            .await
            .unwrap();
        assert_eq!(quota["data"]["bpSoc"], json!(80));
    }

    #[tokio::test]
    async fn should_fail_on_non_200_status() {
        let server = MockServer::start().await;
        mount(&server, "/device/list", ResponseTemplate::new(502)).await;

        let err = client(&server).device_list().await.unwrap_err();
        assert!(matches!(err, CloudError::Status { status: 502 }));
    }

    #[tokio::test]
    async fn should_fail_on_non_json_body() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/device/list",
            ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"),
        )
        .await;

        let err = client(&server).device_list().await.unwrap_err();
        assert!(matches!(err, CloudError::InvalidJson(_)));
    }

    #[tokio::test]
    async fn should_surface_vendor_error_code() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/device/list",
            ResponseTemplate::new(200)
                .set_body_json(json!({"code": "8521", "message": "signature is wrong"})),
        )
        .await;

        let err = client(&server).fetch_all_devices().await.unwrap_err();
        let BridgeError::Transport(source) = err else {
            panic!("expected a transport error");
        };
        assert_eq!(
            source.to_string(),
            "cloud rejected request with code 8521: signature is wrong"
        );
    }
}
