use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{Protocol, WithExportConfig as _};
use opentelemetry_sdk::{
    logs::SdkLoggerProvider, metrics::SdkMeterProvider, trace::SdkTracerProvider,
};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{
    EnvFilter, Layer as _, layer::SubscriberExt as _, util::SubscriberInitExt as _,
};

use crate::cli::{CliArgs, CliArgsOtelExporter, CliArgsOtelExporterProtocol};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub struct Provider {
    logger: SdkLoggerProvider,
    meter: SdkMeterProvider,
    service_name: String,
    tracer: SdkTracerProvider,
}

impl Provider {
    /// # Errors
    ///
    /// Will return `Err` if an OTLP exporter is enabled without an endpoint
    /// and protocol, or could not be built.
    pub fn new(cli: &CliArgs) -> Result<Self, BoxError> {
        Ok(Self {
            logger: logger_provider(cli)?,
            meter: meter_provider(cli)?,
            service_name: cli.otel_service_name.clone(),
            tracer: tracer_provider(cli)?,
        })
    }

    #[must_use]
    pub fn meter(&self) -> &SdkMeterProvider {
        &self.meter
    }

    /// # Errors
    ///
    /// Will return `Err` if a global subscriber is already installed.
    pub fn init_tracing_subscriber(&self) -> Result<(), BoxError> {
        let logger_layer =
            OpenTelemetryTracingBridge::new(&self.logger).with_filter(external_component_filter()?);

        let tracer_layer = OpenTelemetryLayer::new(self.tracer.tracer(self.service_name.clone()))
            .with_filter(external_component_filter()?);

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_thread_names(true)
            .with_filter(EnvFilter::from_default_env());

        tracing_subscriber::registry()
            .with(logger_layer)
            .with(tracer_layer)
            .with(fmt_layer)
            .try_init()?;

        Ok(())
    }

    /// # Errors
    ///
    /// Will return `Err` if open telemetry providers could not shutdown.
    pub fn shutdown(&self) -> Result<(), BoxError> {
        let mut shutdown_errors = Vec::new();
        if let Err(e) = self.tracer.shutdown() {
            shutdown_errors.push(format!("tracer provider: {e}"));
        }
        if let Err(e) = self.meter.shutdown() {
            shutdown_errors.push(format!("meter provider: {e}"));
        }
        if let Err(e) = self.logger.shutdown() {
            shutdown_errors.push(format!("logger provider: {e}"));
        }
        if !shutdown_errors.is_empty() {
            return Err(format!(
                "Failed to shutdown providers:{}",
                shutdown_errors.join("\n")
            )
            .into());
        }

        Ok(())
    }
}

/// Logs emitted by the OTLP transport itself would be exported again, so
/// `hyper`, `tonic`, `h2` and `reqwest` are switched off for the exporting
/// layers.
fn external_component_filter() -> Result<EnvFilter, BoxError> {
    Ok(EnvFilter::from_default_env()
        .add_directive("hyper=off".parse()?)
        .add_directive("tonic=off".parse()?)
        .add_directive("h2=off".parse()?)
        .add_directive("reqwest=off".parse()?))
}

fn resource(cli: &CliArgs) -> opentelemetry_sdk::Resource {
    opentelemetry_sdk::Resource::builder()
        .with_service_name(cli.otel_service_name.clone())
        .build()
}

/*
 * ============================================================================
 * Signals
 * ============================================================================
 */
#[derive(Clone, Copy)]
enum Signal {
    Logs,
    Metrics,
    Traces,
}

impl Signal {
    fn path(self) -> &'static str {
        match self {
            Signal::Logs => "logs",
            Signal::Metrics => "metrics",
            Signal::Traces => "traces",
        }
    }

    fn exporters(self, cli: &CliArgs) -> &[CliArgsOtelExporter] {
        match self {
            Signal::Logs => cli.otel_logs_exporter.as_deref(),
            Signal::Metrics => cli.otel_metrics_exporter.as_deref(),
            Signal::Traces => cli.otel_traces_exporter.as_deref(),
        }
        .unwrap_or_default()
    }

    fn endpoint(self, cli: &CliArgs) -> Option<&String> {
        match self {
            Signal::Logs => cli.otel_exporter_otlp_logs_endpoint.as_ref(),
            Signal::Metrics => cli.otel_exporter_otlp_metrics_endpoint.as_ref(),
            Signal::Traces => cli.otel_exporter_otlp_traces_endpoint.as_ref(),
        }
    }

    fn protocol(self, cli: &CliArgs) -> Option<CliArgsOtelExporterProtocol> {
        match self {
            Signal::Logs => cli.otel_exporter_otlp_logs_protocol,
            Signal::Metrics => cli.otel_exporter_otlp_metrics_protocol,
            Signal::Traces => cli.otel_exporter_otlp_traces_protocol,
        }
    }

    fn timeout(self, cli: &CliArgs) -> Option<u64> {
        match self {
            Signal::Logs => cli.otel_exporter_otlp_logs_timeout,
            Signal::Metrics => cli.otel_exporter_otlp_metrics_timeout,
            Signal::Traces => cli.otel_exporter_otlp_traces_timeout,
        }
    }
}

struct Otlp {
    endpoint: String,
    protocol: Protocol,
    timeout: Duration,
}

fn otlp(cli: &CliArgs, signal: Signal) -> Result<Otlp, BoxError> {
    let variable = signal.path().to_uppercase();

    let protocol: Protocol = signal
        .protocol(cli)
        .or(cli.otel_exporter_otlp_protocol)
        .ok_or_else(|| {
            format!("OTEL_EXPORTER_OTLP_{variable}_PROTOCOL or OTEL_EXPORTER_OTLP_PROTOCOL must be set")
        })?
        .into();

    let endpoint = match (signal.endpoint(cli), &cli.otel_exporter_otlp_endpoint) {
        (Some(endpoint), _) => endpoint.clone(),
        (None, Some(endpoint)) => match protocol {
            Protocol::Grpc => endpoint.clone(),
            Protocol::HttpBinary | Protocol::HttpJson => {
                format!("{endpoint}/v1/{}", signal.path())
            }
        },
        (None, None) => {
            return Err(format!(
                "OTEL_EXPORTER_OTLP_{variable}_ENDPOINT or OTEL_EXPORTER_OTLP_ENDPOINT must be set"
            )
            .into());
        }
    };

    let timeout = Duration::from_millis(
        signal
            .timeout(cli)
            .unwrap_or(cli.otel_exporter_otlp_timeout),
    );

    Ok(Otlp {
        endpoint,
        protocol,
        timeout,
    })
}

/// Builds an OTLP exporter over gRPC or HTTP depending on the protocol.
macro_rules! otlp_exporter {
    ($exporter:ty, $otlp:expr) => {{
        let otlp = $otlp;
        match otlp.protocol {
            Protocol::Grpc => <$exporter>::builder()
                .with_tonic()
                .with_endpoint(otlp.endpoint)
                .with_protocol(Protocol::Grpc)
                .with_timeout(otlp.timeout)
                .build()?,
            protocol @ (Protocol::HttpBinary | Protocol::HttpJson) => <$exporter>::builder()
                .with_http()
                .with_endpoint(otlp.endpoint)
                .with_protocol(protocol)
                .with_timeout(otlp.timeout)
                .build()?,
        }
    }};
}

/*
 * ============================================================================
 * Providers
 * ============================================================================
 */
fn logger_provider(cli: &CliArgs) -> Result<SdkLoggerProvider, BoxError> {
    let mut provider_builder = SdkLoggerProvider::builder().with_resource(resource(cli));
    let exporters = Signal::Logs.exporters(cli);

    if exporters.contains(&CliArgsOtelExporter::Console) {
        provider_builder =
            provider_builder.with_simple_exporter(opentelemetry_stdout::LogExporter::default());
    }

    if exporters.contains(&CliArgsOtelExporter::Otlp) {
        let exporter = otlp_exporter!(opentelemetry_otlp::LogExporter, otlp(cli, Signal::Logs)?);
        provider_builder = provider_builder.with_batch_exporter(exporter);
    }

    Ok(provider_builder.build())
}

fn meter_provider(cli: &CliArgs) -> Result<SdkMeterProvider, BoxError> {
    let mut provider_builder = SdkMeterProvider::builder().with_resource(resource(cli));
    let exporters = Signal::Metrics.exporters(cli);

    if exporters.contains(&CliArgsOtelExporter::Console) {
        provider_builder = provider_builder
            .with_periodic_exporter(opentelemetry_stdout::MetricExporterBuilder::default().build());
    }

    if exporters.contains(&CliArgsOtelExporter::Otlp) {
        let exporter = otlp_exporter!(
            opentelemetry_otlp::MetricExporter,
            otlp(cli, Signal::Metrics)?
        );
        provider_builder = provider_builder.with_periodic_exporter(exporter);
    }

    Ok(provider_builder.build())
}

fn tracer_provider(cli: &CliArgs) -> Result<SdkTracerProvider, BoxError> {
    let mut provider_builder = SdkTracerProvider::builder().with_resource(resource(cli));
    let exporters = Signal::Traces.exporters(cli);

    if exporters.contains(&CliArgsOtelExporter::Console) {
        provider_builder =
            provider_builder.with_simple_exporter(opentelemetry_stdout::SpanExporter::default());
    }

    if exporters.contains(&CliArgsOtelExporter::Otlp) {
        let exporter = otlp_exporter!(
            opentelemetry_otlp::SpanExporter,
            otlp(cli, Signal::Traces)?
        );
        provider_builder = provider_builder.with_batch_exporter(exporter);
    }

    Ok(provider_builder.build())
}
