use std::{fs::File, io::Write, net::SocketAddr, sync::Arc, time::Duration};

use provider_argo_events::{
    cli::{
        CliArgs, CliCommands, ControllerArgs, ControllerCommands, ControllerRunArgs, CrdArgs,
        CrdCommands, CrdGenerateArgs, CrdGenerateArgsFormat, MarkdownArgs, MarkdownCommands,
        MarkdownGenerateArgs, parse,
    },
    client::new_event_source_client,
    event_source::{self, Connector, EventSource, NewClientFn},
    http_server, managed,
    metrics::Metrics,
    otel, provider_config,
    provider_config::KubeProviderConfigReader,
    usage::{self, ProviderConfigUsageTracker},
};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = &parse();

    match &cli.command {
        CliCommands::Controller(controller) => match &controller.command {
            ControllerCommands::Run(run) => controller_run(cli, controller, run).await,
        },
        CliCommands::Crd(crd) => match &crd.command {
            CrdCommands::Generate(generate) => crd_generate(cli, crd, generate),
        },
        CliCommands::Markdown(markdown) => match &markdown.command {
            MarkdownCommands::Generate(generate) => markdown_generate(cli, markdown, generate),
        },
    }
}

async fn controller_run(
    cli: &CliArgs,
    _controller: &ControllerArgs,
    run: &ControllerRunArgs,
) -> Result<(), BoxError> {
    let provider = otel::Provider::new(cli)?;
    provider.init_tracing_subscriber()?;

    let metrics = Metrics::new(provider.meter());

    let addr: SocketAddr = format!("{}:{}", run.host, run.port).parse()?;

    let client = kube::Client::try_default().await?;

    let new_client: NewClientFn = {
        let metrics = metrics.clone();
        Arc::new(move |options| new_event_source_client(options, &metrics))
    };

    let connector = Connector::new(
        Arc::new(KubeProviderConfigReader::new(client.clone(), &metrics)),
        Arc::new(ProviderConfigUsageTracker::new(client.clone(), &metrics)),
        new_client,
    );

    let http_server = http_server::run(addr);

    let event_source_controller = managed::run_controller::<EventSource>(
        client.clone(),
        Box::new(connector),
        managed::Config {
            poll_interval: Duration::from_secs(run.poll_interval),
            max_reconcile_rate: run.max_reconcile_rate,
            pod_name: run.pod_name.clone(),
        },
        metrics.clone(),
    );

    let provider_config_controller = provider_config::run_controller(client, metrics);

    tokio::select! {
        result = http_server => result?,
        () = event_source_controller => {},
        () = provider_config_controller => {},
    }

    provider.shutdown()
}

fn crd_generate(
    _cli: &CliArgs,
    _crd: &CrdArgs,
    generate: &CrdGenerateArgs,
) -> Result<(), BoxError> {
    let crds = [
        ("eventsource", event_source::generate_custom_resource_definition()),
        ("providerconfig", provider_config::generate_custom_resource_definition()),
        ("providerconfigusage", usage::generate_custom_resource_definition()),
    ];

    for (name, crd) in crds {
        let content = match generate.format {
            CrdGenerateArgsFormat::Json => serde_json::to_string_pretty(&crd)?,
            CrdGenerateArgsFormat::Yaml => serde_yaml::to_string(&crd)?,
        };

        if let Some(output) = &generate.output {
            let path = match generate.format {
                CrdGenerateArgsFormat::Json => output.join(format!("{name}.json")),
                CrdGenerateArgsFormat::Yaml => output.join(format!("{name}.yaml")),
            };

            File::create(path)?.write_all(content.as_bytes())?;
        } else {
            match generate.format {
                CrdGenerateArgsFormat::Json => println!("{content}"),
                CrdGenerateArgsFormat::Yaml => print!("---\n{content}"),
            }
        }
    }

    Ok(())
}

fn markdown_generate(
    _cli: &CliArgs,
    _markdown: &MarkdownArgs,
    generate: &MarkdownGenerateArgs,
) -> Result<(), BoxError> {
    let markdown = clap_markdown::help_markdown::<CliArgs>();

    if let Some(output) = &generate.output {
        File::create(output)?.write_all(markdown.as_bytes())?;
    } else {
        print!("{markdown}");
    }

    Ok(())
}
