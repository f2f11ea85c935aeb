//! REST client for the central service

use async_trait::async_trait;
use drivewatch_api::{
    DriverPayload, EventBatch, SessionRecord, TelemetryRecord, VehiclePayload, WIRE_VERSION,
};
use drivewatch_config::CloudConfig;
use drivewatch_host_api::{CloudClient, HostError, HostResult};
use drivewatch_util::{DriverId, NetworkError, VehicleId};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Header carrying the payload format version on every request
pub const WIRE_VERSION_HEADER: &str = "X-Drivewatch-Wire-Version";

/// [`CloudClient`] over HTTP with JSON bodies and a bearer token
pub struct HttpCloudClient {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpCloudClient {
    pub fn new(config: &CloudConfig) -> HostResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .user_agent(concat!("drivewatchd/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HostError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header(WIRE_VERSION_HEADER, WIRE_VERSION.to_string());
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, path: &str) -> HostResult<Response> {
        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        if status.is_success() {
            debug!(path, status = status.as_u16(), "Request succeeded");
            Ok(response)
        } else {
            warn!(path, status = status.as_u16(), "Remote rejected request");
            Err(HostError::Network(NetworkError::Http {
                status: status.as_u16(),
            }))
        }
    }

    async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> HostResult<()> {
        self.send(self.request(Method::POST, path).json(body), path)
            .await
            .map(|_| ())
    }

    /// GET a JSON document; 404 becomes [`HostError::NotFound`] naming `what`
    async fn get_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        path: &str,
        what: String,
    ) -> HostResult<T> {
        match self.send(builder, path).await {
            Ok(response) => response
                .json::<T>()
                .await
                .map_err(|e| HostError::Decode(format!("{}: {}", what, e))),
            Err(HostError::Network(NetworkError::Http { status }))
                if status == StatusCode::NOT_FOUND.as_u16() =>
            {
                Err(HostError::NotFound(what))
            }
            Err(e) => Err(e),
        }
    }
}

/// Map a transport failure onto the retry taxonomy
pub fn classify(err: reqwest::Error) -> HostError {
    let network = if err.is_timeout() {
        NetworkError::Timeout
    } else if let Some(status) = err.status() {
        NetworkError::Http {
            status: status.as_u16(),
        }
    } else if err.is_decode() {
        return HostError::Decode(err.to_string());
    } else {
        NetworkError::Connection(err.to_string())
    };
    HostError::Network(network)
}

#[async_trait]
impl CloudClient for HttpCloudClient {
    async fn post_events(&self, batch: &EventBatch) -> HostResult<()> {
        self.post_json("/events", batch).await
    }

    async fn post_telemetry(&self, record: &TelemetryRecord) -> HostResult<()> {
        self.post_json("/telemetry", record).await
    }

    async fn post_session(&self, record: &SessionRecord) -> HostResult<()> {
        self.post_json("/sessions", record).await
    }

    async fn fetch_vehicle_by_plate(&self, plate: &str) -> HostResult<VehiclePayload> {
        let path = "/vehicles/by-plate";
        let builder = self.request(Method::GET, path).query(&[("plate", plate)]);
        self.get_json(builder, path, format!("vehicle with plate {}", plate))
            .await
    }

    async fn fetch_vehicle_drivers(&self, vehicle: &VehicleId) -> HostResult<Vec<DriverPayload>> {
        let path = format!("/vehicles/{}/drivers", vehicle);
        let builder = self.request(Method::GET, &path);
        self.get_json(builder, &path, format!("vehicle {}", vehicle))
            .await
    }

    async fn fetch_driver(&self, id: &DriverId) -> HostResult<DriverPayload> {
        let path = format!("/drivers/{}", id);
        let builder = self.request(Method::GET, &path);
        self.get_json(builder, &path, format!("driver {}", id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::State;
    use axum::http::{HeaderMap, Method as HttpMethod, StatusCode as HttpStatus, Uri, header};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// One request as the test server saw it
    #[derive(Debug, Clone)]
    struct Seen {
        method: HttpMethod,
        uri: String,
        headers: HeaderMap,
        body: String,
    }

    struct Remote {
        status: HttpStatus,
        body: &'static str,
        stall: bool,
        seen: Mutex<Vec<Seen>>,
    }

    impl Remote {
        fn answering(status: HttpStatus, body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                status,
                body,
                stall: false,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn stalled() -> Arc<Self> {
            Arc::new(Self {
                status: HttpStatus::OK,
                body: "{}",
                stall: true,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn last(&self) -> Seen {
            self.seen.lock().unwrap().last().cloned().unwrap()
        }
    }

    async fn answer(
        State(remote): State<Arc<Remote>>,
        method: HttpMethod,
        uri: Uri,
        headers: HeaderMap,
        body: String,
    ) -> (HttpStatus, [(header::HeaderName, &'static str); 1], &'static str) {
        remote.seen.lock().unwrap().push(Seen {
            method,
            uri: uri.to_string(),
            headers,
            body,
        });
        if remote.stall {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        (
            remote.status,
            [(header::CONTENT_TYPE, "application/json")],
            remote.body,
        )
    }

    /// Serve `remote` on an ephemeral port and return a client pointed at it
    async fn client_for(remote: Arc<Remote>) -> HttpCloudClient {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().fallback(answer).with_state(remote);
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        HttpCloudClient::new(&config(format!("http://{}", addr))).unwrap()
    }

    fn config(base_url: String) -> CloudConfig {
        CloudConfig {
            base_url,
            auth_token: Some("secret-token".into()),
            timeout: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn test_post_sends_auth_and_version() {
        let remote = Remote::answering(HttpStatus::OK, "{}");
        let client = client_for(remote.clone()).await;

        client.post_events(&EventBatch { events: vec![] }).await.unwrap();

        let seen = remote.last();
        assert_eq!(seen.method, HttpMethod::POST);
        assert_eq!(seen.uri, "/events");
        assert_eq!(seen.headers["authorization"], "Bearer secret-token");
        assert_eq!(seen.headers["x-drivewatch-wire-version"], WIRE_VERSION.to_string().as_str());
        let body: serde_json::Value = serde_json::from_str(&seen.body).unwrap();
        assert_eq!(body, serde_json::json!({ "events": [] }));
    }

    #[tokio::test]
    async fn test_server_error_is_http_status() {
        let client = client_for(Remote::answering(HttpStatus::INTERNAL_SERVER_ERROR, "{}")).await;

        let err = client
            .post_events(&EventBatch { events: vec![] })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HostError::Network(NetworkError::Http { status: 500 })
        ));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_unknown_driver_is_not_found() {
        let client = client_for(Remote::answering(HttpStatus::NOT_FOUND, "{}")).await;

        let err = client.fetch_driver(&DriverId::new()).await.unwrap_err();
        assert!(matches!(err, HostError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fetch_driver_decodes_payload() {
        let body = r#"{"id":"6f1c2d3e-4b5a-4c7d-8e9f-a0b1c2d3e4f5","display_name":"Ana Ruiz","badge_hash":"h1","active":true,"embedding":"[0.1, 0.2]"}"#;
        let remote = Remote::answering(HttpStatus::OK, body);
        let client = client_for(remote.clone()).await;

        let id = DriverId::parse("6f1c2d3e-4b5a-4c7d-8e9f-a0b1c2d3e4f5").unwrap();
        let payload = client.fetch_driver(&id).await.unwrap();
        assert_eq!(payload.id, id);
        assert_eq!(payload.display_name.as_deref(), Some("Ana Ruiz"));
        assert_eq!(payload.embedding, Some(vec![0.1, 0.2]));

        let seen = remote.last();
        assert_eq!(seen.method, HttpMethod::GET);
        assert_eq!(seen.uri, format!("/drivers/{}", id));
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let client = client_for(Remote::answering(HttpStatus::OK, r#"{"plate":42}"#)).await;

        let err = client.fetch_vehicle_by_plate("ABC-123").await.unwrap_err();
        assert!(matches!(err, HostError::Decode(_)));
    }

    #[tokio::test]
    async fn test_vehicle_lookup_uses_plate_query() {
        let body = r#"{"id":"0a1b2c3d-4e5f-4a6b-8c7d-9e0f1a2b3c4d","plate":"ABC-123"}"#;
        let remote = Remote::answering(HttpStatus::OK, body);
        let client = client_for(remote.clone()).await;

        let vehicle = client.fetch_vehicle_by_plate("ABC-123").await.unwrap();
        assert_eq!(vehicle.plate, "ABC-123");
        assert!(vehicle.internal_number.is_none());

        assert_eq!(remote.last().uri, "/vehicles/by-plate?plate=ABC-123");
    }

    #[tokio::test]
    async fn test_refused_connection_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpCloudClient::new(&config(format!("http://{}", addr))).unwrap();
        let err = client
            .post_session(&SessionRecord {
                session_id: drivewatch_util::SessionId::new(),
                driver_id: DriverId::new(),
                vehicle_id: VehicleId::new(),
                started_at: drivewatch_util::now(),
                ended_at: None,
                state: drivewatch_api::SessionState::Active,
                assignment_kind: "badge-scan".into(),
                duration_seconds: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HostError::Network(NetworkError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let client = client_for(Remote::stalled()).await;

        let err = client.fetch_driver(&DriverId::new()).await.unwrap_err();
        assert!(matches!(err, HostError::Network(NetworkError::Timeout)));
    }
}
