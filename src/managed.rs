use std::{collections::BTreeMap, fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::{
    ByteString,
    api::core::v1::Secret,
    apimachinery::pkg::apis::meta::v1::Condition,
};
use kube::{
    Client, ResourceExt,
    core::ObjectMeta,
    runtime::{
        Controller, Predicate, WatchStreamExt,
        controller::{self, Action},
        events::{Event, EventType, Recorder, Reporter},
        predicates, reflector,
        watcher::{Config as WatcherConfig, watcher},
    },
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Error, Result,
    kubernetes::{
        self, Api, ConditionsExt, Object, Resource as _, creating, deleting, error_policy,
        reconcile_error, reconcile_paused, reconcile_success,
        constants::{
            APP_KUBERNETES_IO_MANAGED_BY_KEY, APP_KUBERNETES_IO_MANAGED_BY_VALUE,
            CONNECTION_CROSSPLANE_IO_SECRET_TYPE, CROSSPLANE_IO_EXTERNAL_NAME_KEY,
            CROSSPLANE_IO_PAUSED_KEY, FINALIZER_MANAGED_RESOURCE,
        },
    },
    metrics::Metrics,
};

/*
 * ============================================================================
 * Managed Resource
 * ============================================================================
 */
/// Reference to the `ProviderConfig` a managed resource is connected with.
#[derive(JsonSchema, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfigReference {
    /// Name of the referenced `ProviderConfig`.
    pub name: String,
}

impl Default for ProviderConfigReference {
    fn default() -> Self {
        Self {
            name: "default".into(),
        }
    }
}

/// What happens to the external resource when the managed resource is
/// deleted.
#[derive(JsonSchema, Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// The external resource is deleted.
    #[default]
    Delete,

    /// The external resource is left behind.
    Orphan,
}

/// Namespaced name of the secret connection details are written to.
#[derive(JsonSchema, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SecretReference {
    pub name: String,
    pub namespace: String,
}

pub type ConnectionDetails = BTreeMap<String, Vec<u8>>;

/// A cluster resource whose desired state lives in an external system.
pub trait Managed:
    Object + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn provider_config_reference(&self) -> Option<&ProviderConfigReference>;

    fn deletion_policy(&self) -> DeletionPolicy;

    fn write_connection_secret_to_reference(&self) -> Option<&SecretReference>;

    fn conditions(&self) -> &[Condition];

    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions().iter().find(|c| c.type_ == type_)
    }

    fn set_conditions(&mut self, conditions: Vec<Condition>) {
        let merged = self.conditions().to_vec().merge_from(&conditions);
        *self.conditions_mut() = merged;
    }

    /// Name of the external resource, unset until first reconciled.
    fn external_name(&self) -> Option<&str> {
        self.meta()
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(CROSSPLANE_IO_EXTERNAL_NAME_KEY))
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    fn set_external_name(&mut self, name: &str) {
        self.meta_mut()
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(CROSSPLANE_IO_EXTERNAL_NAME_KEY.into(), name.into());
    }

    fn is_paused(&self) -> bool {
        self.meta()
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(CROSSPLANE_IO_PAUSED_KEY))
            .is_some_and(|paused| paused == "true")
    }
}

/*
 * ============================================================================
 * External
 * ============================================================================
 */
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExternalObservation {
    pub resource_exists: bool,
    pub resource_up_to_date: bool,
    pub connection_details: ConnectionDetails,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExternalCreation {
    pub connection_details: ConnectionDetails,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExternalUpdate {
    pub connection_details: ConnectionDetails,
}

/// Produces an [`ExternalClient`] for a managed resource.
#[async_trait]
pub trait ExternalConnecter<M: Managed>: Send + Sync {
    async fn connect(&self, mg: &M) -> Result<Box<dyn ExternalClient<M>>>;
}

/// Observes and drives the external resource of a managed resource.
#[async_trait]
pub trait ExternalClient<M: Managed>: Send + Sync {
    async fn observe(&self, mg: &mut M) -> Result<ExternalObservation>;

    async fn create(&self, mg: &mut M) -> Result<ExternalCreation>;

    async fn update(&self, mg: &mut M) -> Result<ExternalUpdate>;

    async fn delete(&self, mg: &mut M) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Observe,
    Create,
    Update,
    Delete,
}

impl Operation {
    /// Reason of the warning event emitted when the operation fails.
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            Operation::Connect => "CannotConnectToProvider",
            Operation::Observe => "CannotObserveExternalResource",
            Operation::Create => "CannotCreateExternalResource",
            Operation::Update => "CannotUpdateExternalResource",
            Operation::Delete => "CannotDeleteExternalResource",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Connect => write!(f, "connect"),
            Operation::Observe => write!(f, "observe"),
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug)]
pub struct Failure {
    pub operation: Operation,
    pub error: Error,
}

impl Operation {
    /// Wraps an error into a [`Failure`] of this operation.
    fn failed(self) -> impl FnOnce(Error) -> Failure {
        move |error| Failure {
            operation: self,
            error,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Created(ConnectionDetails),
    Updated(ConnectionDetails),
    UpToDate(ConnectionDetails),
}

#[derive(Debug, PartialEq, Eq)]
pub enum Deletion {
    InProgress,
    Gone,
}

/// Observes the external resource, then creates or updates it as needed.
///
/// # Errors
///
/// Will return `Err` naming the operation that failed.
pub async fn sync_external<M: Managed>(
    external: &dyn ExternalClient<M>,
    mg: &mut M,
) -> Result<Outcome, Failure> {
    let observation = external
        .observe(mg)
        .await
        .map_err(Operation::Observe.failed())?;

    if !observation.resource_exists {
        let creation = external
            .create(mg)
            .await
            .map_err(Operation::Create.failed())?;
        return Ok(Outcome::Created(creation.connection_details));
    }

    if !observation.resource_up_to_date {
        let update = external
            .update(mg)
            .await
            .map_err(Operation::Update.failed())?;
        let mut connection_details = observation.connection_details;
        connection_details.extend(update.connection_details);
        return Ok(Outcome::Updated(connection_details));
    }

    Ok(Outcome::UpToDate(observation.connection_details))
}

/// Deletes the external resource if it still exists.
///
/// # Errors
///
/// Will return `Err` naming the operation that failed.
pub async fn delete_external<M: Managed>(
    external: &dyn ExternalClient<M>,
    mg: &mut M,
) -> Result<Deletion, Failure> {
    let observation = external
        .observe(mg)
        .await
        .map_err(Operation::Observe.failed())?;

    if !observation.resource_exists {
        return Ok(Deletion::Gone);
    }

    external
        .delete(mg)
        .await
        .map_err(Operation::Delete.failed())?;

    Ok(Deletion::InProgress)
}

/*
 * ============================================================================
 * Config
 * ============================================================================
 */
pub struct Config {
    /// Interval an up to date managed resource is observed again after.
    pub poll_interval: Duration,

    /// Maximum number of concurrent reconciliations.
    pub max_reconcile_rate: u16,

    /// Instance reported on events.
    pub pod_name: Option<String>,
}

const SHORT_WAIT: Duration = Duration::from_secs(5);

/*
 * ============================================================================
 * Controller
 * ============================================================================
 */
pub async fn run_controller<M>(
    client: Client,
    connecter: Box<dyn ExternalConnecter<M>>,
    config: Config,
    metrics: Metrics,
) where
    M: Managed,
{
    metrics.kubernetes_api_usage_count::<M>("watch");

    // Status writes do not pass the filter. Drift is picked up by requeues.
    let (reader, writer) = reflector::store();
    let stream = watcher(kube::Api::<M>::all(client.clone()), WatcherConfig::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .predicate_filter(desired_state::<M>());

    Controller::for_stream(stream, reader)
        .with_config(controller::Config::default().concurrency(config.max_reconcile_rate))
        .shutdown_on_signal()
        .run(
            reconcile::<M>,
            error_policy::<M, Context<M>>,
            Arc::new(Context {
                recorder: Recorder::new(
                    client.clone(),
                    Reporter {
                        controller: APP_KUBERNETES_IO_MANAGED_BY_VALUE.into(),
                        instance: config.pod_name.clone(),
                    },
                ),
                client,
                connecter,
                config,
                metrics,
            }),
        )
        .for_each(|_| async {})
        .await;
}

/// Hashes what a managed resource asks for: its spec through the generation,
/// plus annotations such as the external name and pause flag.
fn desired_state<M: Managed>() -> impl Predicate<M> + Send + 'static {
    predicates::generation.combine(predicates::annotations)
}

/*
 * ============================================================================
 * Context
 * ============================================================================
 */
struct Context<M: Managed> {
    client: Client,
    connecter: Box<dyn ExternalConnecter<M>>,
    config: Config,
    metrics: Metrics,
    recorder: Recorder,
}

impl<M: Managed> kubernetes::Context for Context<M> {
    fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/*
 * ============================================================================
 * Reconciler
 * ============================================================================
 */
#[tracing::instrument(skip(object, ctx), fields(name = %object.name_any()))]
async fn reconcile<M: Managed>(object: Arc<M>, ctx: Arc<Context<M>>) -> Result<Action> {
    let _timer = ctx
        .metrics
        .count_and_measure(M::APP_KUBERNETES_IO_COMPONENT_VALUE);
    tracing::info!("reconciling");

    let api = Api::<M>::new(kube::Api::all(ctx.client.clone()), &ctx.metrics);

    let action = if object.is_paused() {
        reconcile_paused_object(&api, &object).await?
    } else if object.is_deleting() {
        reconcile_delete(&api, &object, &ctx).await?
    } else {
        reconcile_apply(&api, &object, &ctx).await?
    };

    tracing::info!("reconciled");

    Ok(action)
}

async fn reconcile_paused_object<M: Managed>(api: &Api<M>, object: &M) -> Result<Action> {
    let mut working = object.clone();
    working.set_conditions(vec![reconcile_paused()]);
    update_status(api, object, &working).await?;

    Ok(Action::await_change())
}

async fn reconcile_delete<M: Managed>(
    api: &Api<M>,
    object: &M,
    ctx: &Context<M>,
) -> Result<Action> {
    if !object.has_finalizer(FINALIZER_MANAGED_RESOURCE) {
        return Ok(Action::await_change());
    }

    let mut working = object.clone();
    working.set_conditions(vec![deleting()]);

    if object.deletion_policy() == DeletionPolicy::Delete && object.external_name().is_some() {
        let deletion = match ctx.connecter.connect(&working).await {
            Ok(external) => delete_external(external.as_ref(), &mut working).await,
            Err(error) => Err(Operation::Connect.failed()(error)),
        };

        match deletion {
            Ok(Deletion::InProgress) => {
                working.set_conditions(vec![deleting(), reconcile_success()]);
                record(
                    ctx,
                    &working,
                    EventType::Normal,
                    "DeletedExternalResource",
                    "Successfully requested deletion of external resource".into(),
                )
                .await;
                update_status(api, object, &working).await?;
                return Ok(Action::requeue(SHORT_WAIT));
            }
            Ok(Deletion::Gone) => {}
            Err(failure) => return fail(api, object, working, ctx, failure).await,
        }
    }

    unpublish_connection_details(ctx, object).await?;

    let finalizers: Vec<_> = object
        .finalizers()
        .iter()
        .filter(|finalizer| *finalizer != FINALIZER_MANAGED_RESOURCE)
        .cloned()
        .collect();
    api.patch_metadata(
        &object.try_name()?,
        serde_json::json!({
            "finalizers": finalizers,
            "resourceVersion": object.meta().resource_version,
        }),
    )
    .await?;

    Ok(Action::await_change())
}

async fn reconcile_apply<M: Managed>(
    api: &Api<M>,
    object: &M,
    ctx: &Context<M>,
) -> Result<Action> {
    let mut working = object.clone();
    initialize(api, &mut working).await?;

    let external = match ctx.connecter.connect(&working).await {
        Ok(external) => external,
        Err(error) => {
            return fail(api, object, working, ctx, Operation::Connect.failed()(error)).await;
        }
    };

    match sync_external(external.as_ref(), &mut working).await {
        Ok(Outcome::Created(connection_details)) => {
            working.set_conditions(vec![creating(), reconcile_success()]);
            publish_connection_details(ctx, &working, connection_details).await?;
            record(
                ctx,
                &working,
                EventType::Normal,
                "CreatedExternalResource",
                "Successfully requested creation of external resource".into(),
            )
            .await;
            update_status(api, object, &working).await?;
            Ok(Action::requeue(SHORT_WAIT))
        }
        Ok(Outcome::Updated(connection_details)) => {
            working.set_conditions(vec![reconcile_success()]);
            publish_connection_details(ctx, &working, connection_details).await?;
            record(
                ctx,
                &working,
                EventType::Normal,
                "UpdatedExternalResource",
                "Successfully requested update of external resource".into(),
            )
            .await;
            update_status(api, object, &working).await?;
            Ok(Action::requeue(ctx.config.poll_interval))
        }
        Ok(Outcome::UpToDate(connection_details)) => {
            working.set_conditions(vec![reconcile_success()]);
            publish_connection_details(ctx, &working, connection_details).await?;
            update_status(api, object, &working).await?;
            Ok(Action::requeue(ctx.config.poll_interval))
        }
        Err(failure) => fail(api, object, working, ctx, failure).await,
    }
}

/// Adds the finalizer and defaults the external name in a single patch.
async fn initialize<M: Managed>(api: &Api<M>, working: &mut M) -> Result<()> {
    let needs_finalizer = !working.has_finalizer(FINALIZER_MANAGED_RESOURCE);
    let needs_external_name = working.external_name().is_none();

    if !needs_finalizer && !needs_external_name {
        return Ok(());
    }

    let name = working.try_name()?;

    let mut metadata = serde_json::Map::new();
    metadata.insert(
        "resourceVersion".into(),
        serde_json::json!(working.meta().resource_version),
    );
    if needs_finalizer {
        let mut finalizers = working.finalizers().to_vec();
        finalizers.push(FINALIZER_MANAGED_RESOURCE.into());
        metadata.insert("finalizers".into(), serde_json::json!(finalizers));
    }
    if needs_external_name {
        metadata.insert(
            "annotations".into(),
            serde_json::json!({ CROSSPLANE_IO_EXTERNAL_NAME_KEY: name.to_string() }),
        );
    }

    let patched = api
        .patch_metadata(&name, serde_json::Value::Object(metadata))
        .await?;
    *working.meta_mut() = patched.meta().clone();

    Ok(())
}

async fn fail<M: Managed>(
    api: &Api<M>,
    object: &M,
    mut working: M,
    ctx: &Context<M>,
    failure: Failure,
) -> Result<Action> {
    record(
        ctx,
        &working,
        EventType::Warning,
        failure.operation.reason(),
        failure.error.to_string(),
    )
    .await;

    working.set_conditions(vec![reconcile_error(&failure.error)]);
    if let Err(error) = update_status(api, object, &working).await {
        tracing::warn!(error =% error, "failed to update status");
    }

    Err(failure.error)
}

async fn update_status<M: Managed>(api: &Api<M>, object: &M, working: &M) -> Result<()> {
    api.update_status(object, working.status().cloned().unwrap_or_default())
        .await
}

async fn record<M: Managed>(
    ctx: &Context<M>,
    mg: &M,
    type_: EventType,
    reason: &str,
    note: String,
) {
    ctx.metrics
        .kubernetes_api_usage_count::<k8s_openapi::api::events::v1::Event>("create");
    let event = Event {
        type_,
        reason: reason.into(),
        note: Some(note),
        action: "Reconcile".into(),
        secondary: None,
    };
    if let Err(error) = ctx.recorder.publish(&event, &mg.object_ref(&())).await {
        tracing::warn!(error =% error, reason, "failed to publish event");
    }
}

/*
 * ============================================================================
 * Connection Details
 * ============================================================================
 */
async fn publish_connection_details<M: Managed>(
    ctx: &Context<M>,
    mg: &M,
    connection_details: ConnectionDetails,
) -> Result<()> {
    let Some(reference) = mg.write_connection_secret_to_reference() else {
        return Ok(());
    };

    let secret = generate_connection_secret(mg, reference, connection_details)?;

    Api::<Secret>::new(
        kube::Api::namespaced(ctx.client.clone(), &reference.namespace),
        &ctx.metrics,
    )
    .apply(&secret)
    .await?;

    Ok(())
}

async fn unpublish_connection_details<M: Managed>(ctx: &Context<M>, mg: &M) -> Result<()> {
    let Some(reference) = mg.write_connection_secret_to_reference() else {
        return Ok(());
    };

    Api::<Secret>::new(
        kube::Api::namespaced(ctx.client.clone(), &reference.namespace),
        &ctx.metrics,
    )
    .delete(&reference.name)
    .await
}

fn generate_connection_secret<M: Managed>(
    mg: &M,
    reference: &SecretReference,
    connection_details: ConnectionDetails,
) -> Result<Secret> {
    let owner_reference = mg
        .controller_owner_ref(&())
        .ok_or(Error::MissingObjectKey(".metadata.uid"))?;

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(reference.name.clone()),
            namespace: Some(reference.namespace.clone()),
            labels: Some(BTreeMap::from([(
                APP_KUBERNETES_IO_MANAGED_BY_KEY.into(),
                APP_KUBERNETES_IO_MANAGED_BY_VALUE.into(),
            )])),
            owner_references: Some(vec![owner_reference]),
            ..Default::default()
        },
        data: Some(
            connection_details
                .into_iter()
                .map(|(key, value)| (key, ByteString(value)))
                .collect(),
        ),
        type_: Some(CONNECTION_CROSSPLANE_IO_SECRET_TYPE.into()),
        ..Default::default()
    })
}
