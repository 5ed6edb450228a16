//! In-memory fakes shared by unit tests.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use http::{Method, Request, Response};
use http_body_util::BodyExt;
use k8s_openapi::{ByteString, api::core::v1::Secret};
use kube::{api::ListParams, client::Body, core::ObjectMeta};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use tokio::task::JoinHandle;

use crate::{
    Error, Result, argo,
    client::EventSourceClient,
    event_source::{EventSource, EventSourceSpec},
    kubernetes::constants::FINALIZER_MANAGED_RESOURCE,
    managed::{Managed, ProviderConfigReference},
    metrics::Metrics,
    provider_config::{ProviderConfig, ProviderConfigReader, ProviderConfigSpec, ProviderCredentials},
    usage::Tracker,
};

pub const KUBECONFIG: &str = r"
apiVersion: v1
kind: Config
clusters:
- name: argo
  cluster:
    server: https://argo.example.com:6443
contexts:
- name: argo
  context:
    cluster: argo
    user: argo
current-context: argo
users:
- name: argo
  user:
    token: secret-token
";

pub fn api_error(code: u16) -> kube::Error {
    let reason = match code {
        404 => "NotFound",
        409 => "AlreadyExists",
        _ => "InternalError",
    };
    kube::Error::Api(
        serde_json::from_value(serde_json::json!({
            "status": "Failure",
            "message": format!("fake {reason}"),
            "reason": reason,
            "code": code,
        }))
        .unwrap(),
    )
}

/*
 * ============================================================================
 * Fixtures
 * ============================================================================
 */
pub fn managed_event_source(name: &str) -> EventSource {
    let mut mg = EventSource::new(
        name,
        EventSourceSpec {
            provider_config_ref: Some(ProviderConfigReference::default()),
            ..Default::default()
        },
    );
    mg.metadata.uid = Some(format!("{name}-uid"));
    mg
}

/// A managed `EventSource` that has been reconciled before: it carries the
/// finalizer, an external name and a resource version.
pub fn initialized_event_source(name: &str) -> EventSource {
    let mut mg = managed_event_source(name);
    mg.metadata.finalizers = Some(vec![FINALIZER_MANAGED_RESOURCE.into()]);
    mg.metadata.resource_version = Some("1".into());
    mg.set_external_name(name);
    mg
}

pub fn argo_event_source(
    name: &str,
    spec: serde_json::Map<String, serde_json::Value>,
) -> argo::EventSource {
    let mut object = argo::EventSource::new(name, argo::EventSourceSpec { fields: spec });
    object.metadata.namespace = Some("argo-events".into());
    object
}

pub fn provider_config(
    name: &str,
    namespace: &str,
    credentials: ProviderCredentials,
) -> ProviderConfig {
    ProviderConfig::new(
        name,
        ProviderConfigSpec {
            namespace: namespace.into(),
            credentials,
        },
    )
}

pub fn kubeconfig_secret(name: &str, namespace: &str, key: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            key.to_string(),
            ByteString(KUBECONFIG.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

pub fn metrics() -> Metrics {
    Metrics::new(&SdkMeterProvider::builder().build())
}

/*
 * ============================================================================
 * Api Server
 * ============================================================================
 */
type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

/// A request the API server expects next.
pub struct Expect {
    method: Method,
    path: String,
    prefix: bool,
    response: Option<serde_json::Value>,
}

impl Expect {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.into(),
            prefix: false,
            response: None,
        }
    }

    /// An event published through the events API, in any namespace.
    pub fn event() -> Self {
        Self {
            prefix: true,
            ..Self::new(Method::POST, "/apis/events.k8s.io/v1/namespaces/")
        }
    }

    /// Answers with `response` instead of echoing the request body.
    pub fn respond(mut self, response: serde_json::Value) -> Self {
        self.response = Some(response);
        self
    }
}

pub struct ApiServerVerifier(ApiServerHandle);

pub fn mock_client() -> (kube::Client, ApiServerVerifier) {
    let (service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
    (
        kube::Client::new(service, "default"),
        ApiServerVerifier(handle),
    )
}

impl ApiServerVerifier {
    /// Answers `expected` in order and returns the request bodies. Any request
    /// after the last expected one fails with a closed service error.
    pub fn run(mut self, expected: Vec<Expect>) -> JoinHandle<Vec<serde_json::Value>> {
        tokio::spawn(async move {
            let mut bodies = Vec::new();

            for expect in expected {
                let (request, send) = self.0.next_request().await.expect("service not called");

                let path = request.uri().path().to_string();
                assert_eq!(&expect.method, request.method(), "method of {path}");
                if expect.prefix {
                    assert!(path.starts_with(&expect.path), "{path}");
                } else {
                    assert_eq!(expect.path, path);
                }

                let bytes = request.into_body().collect().await.unwrap().to_bytes();
                let body = if bytes.is_empty() {
                    serde_json::Value::Null
                } else {
                    serde_json::from_slice(&bytes).unwrap()
                };

                let response = expect.response.unwrap_or_else(|| body.clone());
                send.send_response(
                    Response::builder()
                        .body(Body::from(serde_json::to_vec(&response).unwrap()))
                        .unwrap(),
                );

                bodies.push(body);
            }

            bodies
        })
    }
}

pub async fn verified(handle: JoinHandle<Vec<serde_json::Value>>) -> Vec<serde_json::Value> {
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("timeout on mock apiserver")
        .expect("scenario succeeded")
}

/// `(status, reason)` of condition `type_` in a status patch.
pub fn patched_condition<'a>(body: &'a serde_json::Value, type_: &str) -> (&'a str, &'a str) {
    body["status"]["conditions"]
        .as_array()
        .and_then(|conditions| conditions.iter().find(|c| c["type"] == type_))
        .map(|c| {
            (
                c["status"].as_str().unwrap_or_default(),
                c["reason"].as_str().unwrap_or_default(),
            )
        })
        .unwrap_or_else(|| panic!("no {type_} condition in {body}"))
}

/*
 * ============================================================================
 * Event Source Client
 * ============================================================================
 */
/// Namespace-scoped store of Argo `EventSource`s. Clones share state.
#[derive(Clone, Default)]
pub struct FakeEventSourceClient {
    state: Arc<Mutex<FakeEventSourceState>>,
}

#[derive(Default)]
struct FakeEventSourceState {
    calls: Vec<&'static str>,
    failure: Option<u16>,
    objects: BTreeMap<String, argo::EventSource>,
    resource_version: u64,
}

impl FakeEventSourceState {
    fn call(&mut self, verb: &'static str) -> Result<(), kube::Error> {
        self.calls.push(verb);
        match self.failure {
            Some(code) => Err(api_error(code)),
            None => Ok(()),
        }
    }

    fn store(&mut self, mut object: argo::EventSource) -> argo::EventSource {
        self.resource_version += 1;
        let name = object.metadata.name.clone().unwrap_or_default();
        object.metadata.uid.get_or_insert_with(|| format!("uid-{name}"));
        object.metadata.resource_version = Some(self.resource_version.to_string());
        self.objects.insert(name, object.clone());
        object
    }
}

impl FakeEventSourceClient {
    pub fn with_object(self, object: argo::EventSource) -> Self {
        self.state.lock().unwrap().store(object);
        self
    }

    /// Every call fails with an API error of `code`.
    pub fn failing_with(self, code: u16) -> Self {
        self.state.lock().unwrap().failure = Some(code);
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn object(&self, name: &str) -> Option<argo::EventSource> {
        self.state.lock().unwrap().objects.get(name).cloned()
    }
}

#[async_trait]
impl EventSourceClient for FakeEventSourceClient {
    async fn list(&self, params: &ListParams) -> Result<Vec<argo::EventSource>, kube::Error> {
        let mut state = self.state.lock().unwrap();
        state.call("list")?;

        let name = params
            .field_selector
            .as_deref()
            .and_then(|selector| selector.strip_prefix("metadata.name="));

        Ok(state
            .objects
            .values()
            .filter(|object| name.is_none() || object.metadata.name.as_deref() == name)
            .cloned()
            .collect())
    }

    async fn get(&self, name: &str) -> Result<argo::EventSource, kube::Error> {
        let mut state = self.state.lock().unwrap();
        state.call("get")?;

        state.objects.get(name).cloned().ok_or_else(|| api_error(404))
    }

    async fn create(&self, object: &argo::EventSource) -> Result<argo::EventSource, kube::Error> {
        let mut state = self.state.lock().unwrap();
        state.call("create")?;

        let name = object.metadata.name.clone().unwrap_or_default();
        if state.objects.contains_key(&name) {
            return Err(api_error(409));
        }

        Ok(state.store(object.clone()))
    }

    async fn replace(
        &self,
        object: &argo::EventSource,
    ) -> Result<argo::EventSource, kube::Error> {
        let mut state = self.state.lock().unwrap();
        state.call("replace")?;

        let name = object.metadata.name.clone().unwrap_or_default();
        if !state.objects.contains_key(&name) {
            return Err(api_error(404));
        }

        Ok(state.store(object.clone()))
    }

    async fn delete(&self, name: &str) -> Result<(), kube::Error> {
        let mut state = self.state.lock().unwrap();
        state.call("delete")?;

        state
            .objects
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| api_error(404))
    }
}

/*
 * ============================================================================
 * Provider Config Reader
 * ============================================================================
 */
#[derive(Default)]
pub struct FakeProviderConfigReader {
    provider_configs: Vec<ProviderConfig>,
    requests: Mutex<Vec<String>>,
    secrets: Vec<Secret>,
}

impl FakeProviderConfigReader {
    pub fn with_provider_config(mut self, provider_config: ProviderConfig) -> Self {
        self.provider_configs.push(provider_config);
        self
    }

    pub fn with_secret(mut self, secret: Secret) -> Self {
        self.secrets.push(secret);
        self
    }

    /// Names of the provider configs requested so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderConfigReader for FakeProviderConfigReader {
    async fn get_provider_config(&self, name: &str) -> Result<ProviderConfig> {
        self.requests.lock().unwrap().push(name.to_string());

        self.provider_configs
            .iter()
            .find(|provider_config| provider_config.metadata.name.as_deref() == Some(name))
            .cloned()
            .ok_or_else(|| Error::GetProviderConfig(api_error(404)))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        self.secrets
            .iter()
            .find(|secret| {
                secret.metadata.namespace.as_deref() == Some(namespace)
                    && secret.metadata.name.as_deref() == Some(name)
            })
            .cloned()
            .ok_or_else(|| Error::Credentials(Box::new(api_error(404))))
    }
}

/*
 * ============================================================================
 * Tracker
 * ============================================================================
 */
#[derive(Default)]
pub struct FakeTracker {
    calls: Mutex<usize>,
    fail: bool,
}

impl FakeTracker {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl<M: Managed> Tracker<M> for FakeTracker {
    async fn track(&self, _: &M) -> Result<()> {
        *self.calls.lock().unwrap() += 1;
        if self.fail {
            return Err(Error::Kube(api_error(500)));
        }
        Ok(())
    }
}
