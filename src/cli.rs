use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/*
 * ============================================================================
 * Cli
 * ============================================================================
 */
#[allow(clippy::module_name_repetitions)]
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: CliCommands,

    /// Exporters used for logs.
    #[arg(long, env = "OTEL_LOGS_EXPORTER", global = true, value_delimiter = ',')]
    pub otel_logs_exporter: Option<Vec<CliArgsOtelExporter>>,

    /// Exporters used for metrics.
    #[arg(long, env = "OTEL_METRICS_EXPORTER", global = true, value_delimiter = ',')]
    pub otel_metrics_exporter: Option<Vec<CliArgsOtelExporter>>,

    /// Exporters used for traces.
    #[arg(long, env = "OTEL_TRACES_EXPORTER", global = true, value_delimiter = ',')]
    pub otel_traces_exporter: Option<Vec<CliArgsOtelExporter>>,

    /// Base endpoint for all signals.
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT", global = true)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    #[arg(long, env = "OTEL_EXPORTER_OTLP_LOGS_ENDPOINT", global = true)]
    pub otel_exporter_otlp_logs_endpoint: Option<String>,

    #[arg(long, env = "OTEL_EXPORTER_OTLP_METRICS_ENDPOINT", global = true)]
    pub otel_exporter_otlp_metrics_endpoint: Option<String>,

    #[arg(long, env = "OTEL_EXPORTER_OTLP_TRACES_ENDPOINT", global = true)]
    pub otel_exporter_otlp_traces_endpoint: Option<String>,

    /// Transport protocol for all signals.
    #[arg(long, env = "OTEL_EXPORTER_OTLP_PROTOCOL", global = true, value_enum)]
    pub otel_exporter_otlp_protocol: Option<CliArgsOtelExporterProtocol>,

    #[arg(long, env = "OTEL_EXPORTER_OTLP_LOGS_PROTOCOL", global = true, value_enum)]
    pub otel_exporter_otlp_logs_protocol: Option<CliArgsOtelExporterProtocol>,

    #[arg(long, env = "OTEL_EXPORTER_OTLP_METRICS_PROTOCOL", global = true, value_enum)]
    pub otel_exporter_otlp_metrics_protocol: Option<CliArgsOtelExporterProtocol>,

    #[arg(long, env = "OTEL_EXPORTER_OTLP_TRACES_PROTOCOL", global = true, value_enum)]
    pub otel_exporter_otlp_traces_protocol: Option<CliArgsOtelExporterProtocol>,

    /// Export timeout in milliseconds for all signals.
    #[arg(long, env = "OTEL_EXPORTER_OTLP_TIMEOUT", global = true, default_value_t = 10000)]
    pub otel_exporter_otlp_timeout: u64,

    #[arg(long, env = "OTEL_EXPORTER_OTLP_LOGS_TIMEOUT", global = true)]
    pub otel_exporter_otlp_logs_timeout: Option<u64>,

    #[arg(long, env = "OTEL_EXPORTER_OTLP_METRICS_TIMEOUT", global = true)]
    pub otel_exporter_otlp_metrics_timeout: Option<u64>,

    #[arg(long, env = "OTEL_EXPORTER_OTLP_TRACES_TIMEOUT", global = true)]
    pub otel_exporter_otlp_traces_timeout: Option<u64>,

    #[arg(
        long,
        env = "OTEL_SERVICE_NAME",
        global = true,
        default_value = "provider-argo-events"
    )]
    pub otel_service_name: String,
}

#[must_use]
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[allow(clippy::module_name_repetitions)]
#[derive(Subcommand, Debug)]
pub enum CliCommands {
    /// Controller
    Controller(ControllerArgs),

    /// Custom Resource Definition
    Crd(CrdArgs),

    /// Markdown
    Markdown(MarkdownArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliArgsOtelExporter {
    Console,
    Otlp,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliArgsOtelExporterProtocol {
    #[value(name = "grpc")]
    Grpc,

    #[value(name = "http/protobuf")]
    HttpBinary,

    #[value(name = "http/json")]
    HttpJson,
}

impl From<CliArgsOtelExporterProtocol> for opentelemetry_otlp::Protocol {
    fn from(value: CliArgsOtelExporterProtocol) -> Self {
        match value {
            CliArgsOtelExporterProtocol::Grpc => opentelemetry_otlp::Protocol::Grpc,
            CliArgsOtelExporterProtocol::HttpBinary => opentelemetry_otlp::Protocol::HttpBinary,
            CliArgsOtelExporterProtocol::HttpJson => opentelemetry_otlp::Protocol::HttpJson,
        }
    }
}

/*
 * ============================================================================
 * Controller
 * ============================================================================
 */
#[derive(Args, Debug)]
pub struct ControllerArgs {
    #[command(subcommand)]
    pub command: ControllerCommands,
}

#[derive(Subcommand, Debug)]
pub enum ControllerCommands {
    /// Run
    Run(ControllerRunArgs),
}

#[derive(Args, Debug)]
pub struct ControllerRunArgs {
    /// Host the health server listens on.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Maximum number of managed resources reconciled concurrently.
    #[arg(long, env, default_value_t = 10)]
    pub max_reconcile_rate: u16,

    /// Name of the pod running the controller, reported on events.
    #[arg(long, env)]
    pub pod_name: Option<String>,

    /// Seconds between observations of an up to date managed resource.
    #[arg(long, env, default_value_t = 60)]
    pub poll_interval: u64,

    /// Port the health server listens on.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
}

/*
 * ============================================================================
 * Custom Resource Definition
 * ============================================================================
 */
#[derive(Args, Debug)]
pub struct CrdArgs {
    #[command(subcommand)]
    pub command: CrdCommands,
}

#[derive(Subcommand, Debug)]
pub enum CrdCommands {
    /// Generate
    Generate(CrdGenerateArgs),
}

#[derive(Args, Debug)]
pub struct CrdGenerateArgs {
    #[arg(long, value_enum, default_value_t = CrdGenerateArgsFormat::Yaml)]
    pub format: CrdGenerateArgsFormat,

    #[arg(long, value_hint = clap::ValueHint::DirPath)]
    pub output: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone)]
pub enum CrdGenerateArgsFormat {
    Json,
    Yaml,
}

/*
 * ============================================================================
 * Markdown
 * ============================================================================
 */
#[derive(Args, Debug)]
pub struct MarkdownArgs {
    #[command(subcommand)]
    pub command: MarkdownCommands,
}

#[derive(Subcommand, Debug)]
pub enum MarkdownCommands {
    /// Generate
    Generate(MarkdownGenerateArgs),
}

#[derive(Args, Debug)]
pub struct MarkdownGenerateArgs {
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}
