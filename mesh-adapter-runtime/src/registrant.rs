//! Reliable registration of capability definitions with a remote registry.
//!
//! Each definition is read from disk, wrapped with the adapter's [`HostMetadata`] and
//! POSTed to the registry. Transient failures (transport errors, 5xx, 408, 429) are
//! retried with exponential backoff until the elapsed-time budget of the
//! [`RetryPolicy`] would be exceeded; everything else fails immediately.
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use backon::{BackoffBuilder, ExponentialBuilder};
use bytes::Bytes;
use http::{header::CONTENT_TYPE, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use mesh_adapter_core::{CapabilityRegistration, Diagnose, Diagnosis, HostMetadata};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tower::{BoxError, Service, ServiceExt};
use tracing::{debug, info, warn};

/// The default transport: HTTP/1 over rustls with the platform's root certificates.
pub type HttpsClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Errors from [`Registrant::register`].
#[derive(Error, Debug)]
pub enum Error {
    /// A definition or schema file could not be read.
    #[error("failed to read {path:?}: {source}")]
    Read {
        /// The file.
        path: PathBuf,
        /// The read error.
        #[source]
        source: std::io::Error,
    },

    /// A definition or schema file was not valid JSON.
    #[error("failed to decode {path:?}: {source}")]
    Decode {
        /// The file.
        path: PathBuf,
        /// The decode error.
        #[source]
        source: serde_json::Error,
    },

    /// The registration payload could not be serialized.
    #[error("failed to encode registration: {0}")]
    Encode(#[source] serde_json::Error),

    /// The registry address is not a URI.
    #[error("invalid registry url: {0}")]
    Url(#[source] http::uri::InvalidUri),

    /// The request could not be assembled.
    #[error("failed to build registration request: {0}")]
    Request(#[source] http::Error),

    /// The platform root certificates could not be loaded.
    #[error("failed to load native root certificates: {0}")]
    Tls(#[source] std::io::Error),

    /// The request did not produce a response.
    #[error("registry request failed: {0}")]
    Transport(#[source] BoxError),

    /// The registry answered with something other than 200, 201 or 202.
    #[error("registry responded with {status}: {body}")]
    Status {
        /// The response status.
        status: StatusCode,
        /// The response body, lossily decoded.
        body: String,
    },

    /// Retrying did not succeed within the policy's budget.
    #[error("registration failed after {attempts} attempts in {elapsed:?}: {last}")]
    Exhausted {
        /// Requests sent.
        attempts: usize,
        /// Time spent.
        elapsed: Duration,
        /// The final failure.
        #[source]
        last: Box<Error>,
    },

    /// Walking the definition directory failed.
    #[error("failed to walk definition directory: {0}")]
    Walk(#[source] walkdir::Error),
}

impl Error {
    /// Whether sending the same request again could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

impl Diagnose for Error {
    fn diagnosis(&self) -> Diagnosis {
        match self {
            Self::Read { .. } | Self::Decode { .. } | Self::Walk(_) => Diagnosis::new(
                "1030",
                "a capability definition shipped with the adapter is missing or malformed",
                "reinstall the adapter or regenerate its component definitions",
            ),
            Self::Encode(_) | Self::Url(_) | Self::Request(_) => Diagnosis::new(
                "1031",
                "the registration request could not be built",
                "check the configured registry url",
            ),
            Self::Tls(_) => Diagnosis::new(
                "1032",
                "no root certificates are available to reach the registry over TLS",
                "install the system CA bundle in the adapter image",
            ),
            Self::Transport(_) | Self::Status { .. } => Diagnosis::new(
                "1033",
                "the registry rejected the capability registration",
                "check the registry logs and that the adapter version is supported",
            ),
            Self::Exhausted { .. } => Diagnosis::new(
                "1034",
                "the registry was unreachable for the whole retry window",
                "make sure the orchestration plane is running and reachable from the adapter",
            ),
        }
    }
}

/// A definition file and its optional schema.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DefinitionPath {
    /// JSON definition document.
    pub definition: PathBuf,
    /// JSON schema accompanying the definition.
    pub schema: Option<PathBuf>,
}

impl DefinitionPath {
    /// A definition without a schema.
    pub fn new(definition: impl Into<PathBuf>) -> Self {
        Self {
            definition: definition.into(),
            schema: None,
        }
    }

    /// Attach a schema file.
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<PathBuf>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}

/// Exponential backoff bounded by total elapsed time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f32,
    /// Upper bound of a single delay.
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Stop once the next delay would end past this much time since the first attempt.
    #[serde(with = "millis")]
    pub max_elapsed: Duration,
    /// Randomize delays.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            multiplier: 1.5,
            max_delay: Duration::from_secs(60),
            max_elapsed: Duration::from_secs(10 * 60),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> impl Iterator<Item = Duration> {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.multiplier)
            .without_max_times();
        if self.jitter {
            builder.with_jitter().build()
        } else {
            builder.build()
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Registers capability definitions with a registry.
#[derive(Clone, Debug)]
pub struct Registrant<S = HttpsClient> {
    registry_url: Uri,
    host: HostMetadata,
    policy: RetryPolicy,
    service: S,
}

impl Registrant<HttpsClient> {
    /// Register with `registry_url` over the default transport.
    pub fn new(registry_url: &str, host: HostMetadata) -> Result<Self, Error> {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(Error::Tls)?
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(https);
        Self::with_service(registry_url, host, client)
    }
}

impl<S, B> Registrant<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<B>> + Clone,
    S::Error: Into<BoxError>,
    B: http_body::Body,
{
    /// Register with `registry_url` through `service`.
    pub fn with_service(registry_url: &str, host: HostMetadata, service: S) -> Result<Self, Error> {
        Ok(Self {
            registry_url: registry_url.parse().map_err(Error::Url)?,
            host,
            policy: RetryPolicy::default(),
            service,
        })
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The registry this registrant posts to.
    pub fn registry_url(&self) -> &Uri {
        &self.registry_url
    }

    /// Register every definition in `paths`, in order.
    ///
    /// Stops at the first definition that cannot be registered; earlier definitions
    /// stay registered.
    pub async fn register(&self, paths: &[DefinitionPath]) -> Result<(), Error> {
        for path in paths {
            self.register_one(path).await?;
        }
        info!(count = paths.len(), registry = %self.registry_url, "registered capabilities");
        Ok(())
    }

    async fn register_one(&self, path: &DefinitionPath) -> Result<(), Error> {
        let payload = self.payload(path)?;
        let start = Instant::now();
        let mut backoff = self.policy.backoff();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let err = match self.post(payload.clone()).await {
                Ok(()) => {
                    debug!(definition = ?path.definition, attempts, "registered definition");
                    return Ok(());
                }
                Err(err) if err.is_retryable() => err,
                Err(err) => return Err(err),
            };

            let elapsed = start.elapsed();
            match backoff.next() {
                Some(delay) if elapsed + delay <= self.policy.max_elapsed => {
                    warn!(error = %err, attempts, ?delay, "registration failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                _ => {
                    return Err(Error::Exhausted {
                        attempts,
                        elapsed,
                        last: Box::new(err),
                    })
                }
            }
        }
    }

    fn payload(&self, path: &DefinitionPath) -> Result<Bytes, Error> {
        let definition = read_json(&path.definition)?.1;
        let schema = match &path.schema {
            Some(schema) => Some(read_json(schema)?.0),
            None => None,
        };
        let registration = CapabilityRegistration::new(definition, schema, &self.host);
        serde_json::to_vec(&registration)
            .map(Bytes::from)
            .map_err(Error::Encode)
    }

    async fn post(&self, body: Bytes) -> Result<(), Error> {
        let req = Request::post(self.registry_url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(body))
            .map_err(Error::Request)?;
        let res = self
            .service
            .clone()
            .oneshot(req)
            .await
            .map_err(|err| Error::Transport(err.into()))?;

        let status = res.status();
        if matches!(status, StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED) {
            return Ok(());
        }
        let body = match res.into_body().collect().await {
            Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
            Err(_) => String::new(),
        };
        Err(Error::Status { status, body })
    }
}

/// Read a JSON file, returning both its text and its decoded value.
fn read_json(path: &Path) -> Result<(String, serde_json::Value), Error> {
    let text = fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_owned(),
        source,
    })?;
    let value = serde_json::from_str(&text).map_err(|source| Error::Decode {
        path: path.to_owned(),
        source,
    })?;
    Ok((text, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    type RegistryHandle = tower_test::mock::Handle<Request<Full<Bytes>>, Response<Full<Bytes>>>;

    const REGISTRY: &str = "http://meshery:9081/api/meshmodel/components/register";

    fn testcontext() -> (Registrant<tower_test::mock::Mock<Request<Full<Bytes>>, Response<Full<Bytes>>>>, RegistryHandle) {
        let (service, handle) = tower_test::mock::pair::<Request<Full<Bytes>>, Response<Full<Bytes>>>();
        let host = HostMetadata {
            host: "sample-adapter:10000".into(),
            ..HostMetadata::default()
        };
        let registrant = Registrant::with_service(REGISTRY, host, service).unwrap();
        (registrant, handle)
    }

    fn definitions(count: usize) -> (TempDir, Vec<DefinitionPath>) {
        let dir = tempfile::tempdir().unwrap();
        let paths = (0..count)
            .map(|i| {
                let path = dir.path().join(format!("c{i}_component_definition.json"));
                fs::write(&path, json!({"kind": "Component", "name": format!("c{i}")}).to_string()).unwrap();
                DefinitionPath::new(path)
            })
            .collect();
        (dir, paths)
    }

    fn respond(status: u16) -> Response<Full<Bytes>> {
        Response::builder()
            .status(status)
            .body(Full::new(Bytes::from_static(b"{}")))
            .unwrap()
    }

    /// Answer every request with the next status of `statuses`, repeating the last one,
    /// until the registrant is dropped. Returns the number of requests seen.
    fn serve(mut handle: RegistryHandle, statuses: Vec<u16>) -> tokio::task::JoinHandle<usize> {
        tokio::spawn(async move {
            let mut seen = 0;
            while let Some((_req, send)) = handle.next_request().await {
                let status = statuses.get(seen).or(statuses.last()).copied().unwrap();
                seen += 1;
                send.send_response(respond(status));
            }
            seen
        })
    }

    #[tokio::test]
    async fn posts_wrapped_definition() {
        let (registrant, mut handle) = testcontext();
        let (_dir, paths) = definitions(1);
        let server = tokio::spawn(async move {
            let (req, send) = handle.next_request().await.unwrap();
            assert_eq!(req.method(), http::Method::POST);
            assert_eq!(req.uri().to_string(), REGISTRY);
            assert_eq!(req.headers()[CONTENT_TYPE], "application/json");
            let body = req.into_body().collect().await.unwrap().to_bytes();
            let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(payload["definition"]["name"], "c0");
            assert_eq!(payload["host"], "sample-adapter:10000");
            assert!(payload.get("schema").is_none());
            send.send_response(respond(201));
        });

        registrant.register(&paths).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let (registrant, handle) = testcontext();
        let (_dir, paths) = definitions(1);
        let server = serve(handle, vec![500, 503, 429, 201]);

        registrant.register(&paths).await.unwrap();
        drop(registrant);
        assert_eq!(server.await.unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_are_retried() {
        let (registrant, mut handle) = testcontext();
        let (_dir, paths) = definitions(1);
        let server = tokio::spawn(async move {
            let (_req, send) = handle.next_request().await.unwrap();
            send.send_error(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"));
            let (req, send) = handle.next_request().await.unwrap();
            assert_eq!(req.uri().to_string(), REGISTRY);
            send.send_response(respond(201));
            assert!(handle.next_request().await.is_none());
        });

        registrant.register(&paths).await.unwrap();
        drop(registrant);
        server.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_budget_is_spent() {
        let (registrant, handle) = testcontext();
        let registrant = registrant.retry_policy(RetryPolicy {
            max_elapsed: Duration::from_secs(5),
            max_delay: Duration::from_secs(1),
            ..RetryPolicy::default()
        });
        let (_dir, paths) = definitions(1);
        let server = serve(handle, vec![500]);

        let start = Instant::now();
        let err = registrant.register(&paths).await.unwrap_err();
        let elapsed = start.elapsed();
        drop(registrant);

        let Error::Exhausted { attempts, last, .. } = &err else {
            panic!("unexpected error {err:?}");
        };
        assert!(matches!(**last, Error::Status { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR));
        assert!(*attempts > 1);
        assert_eq!(server.await.unwrap(), *attempts);
        assert!(elapsed <= Duration::from_secs(5), "{elapsed:?}");
        assert!(elapsed >= Duration::from_secs(3), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_permanent() {
        let (registrant, handle) = testcontext();
        let (_dir, paths) = definitions(2);
        let server = serve(handle, vec![400]);

        let err = registrant.register(&paths).await.unwrap_err();
        drop(registrant);
        assert!(matches!(err, Error::Status { status, .. } if status == StatusCode::BAD_REQUEST));
        assert!(!err.is_retryable());
        assert_eq!(server.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn earlier_definitions_stay_registered() {
        let (registrant, handle) = testcontext();
        let (_dir, paths) = definitions(3);
        let server = serve(handle, vec![201, 404]);

        let err = registrant.register(&paths).await.unwrap_err();
        drop(registrant);
        assert!(matches!(err, Error::Status { status, .. } if status == StatusCode::NOT_FOUND));
        assert_eq!(server.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unreadable_definitions_send_nothing() {
        let (registrant, handle) = testcontext();
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("broken_component_definition.json");
        fs::write(&garbage, "{not json").unwrap();
        let server = serve(handle, vec![201]);

        let err = registrant
            .register(&[DefinitionPath::new(dir.path().join("missing.json"))])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Read { .. }), "{err:?}");
        let err = registrant
            .register(&[DefinitionPath::new(&garbage)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode { .. }), "{err:?}");

        drop(registrant);
        assert_eq!(server.await.unwrap(), 0);
    }

    #[test]
    fn retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(policy.max_elapsed, Duration::from_secs(600));

        let parsed: RetryPolicy = serde_json::from_value(json!({"max_elapsed": 1000})).unwrap();
        assert_eq!(parsed.max_elapsed, Duration::from_secs(1));
        assert_eq!(parsed.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn retryable_statuses() {
        let status = |code: u16| Error::Status {
            status: StatusCode::from_u16(code).unwrap(),
            body: String::new(),
        };
        for code in [500, 502, 503, 408, 429] {
            assert!(status(code).is_retryable(), "{code}");
        }
        for code in [400, 401, 403, 404, 409, 422] {
            assert!(!status(code).is_retryable(), "{code}");
        }
    }
}
