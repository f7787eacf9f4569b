use anyhow::{bail, Context, Result};
use broker_relay::topics::{entity_topics, ConfigEntry};
use broker_relay::{
    init_tracing, BrokerContext, EventKind, EventRouter, FlowEvent, LogFormat, OrgUsrNode,
    Settings, TracingConfig,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "broker-relay")]
#[command(about = "Kafka topic provisioning, producing and per-entity consumption", long_about = None)]
struct Cli {
    /// Settings file (YAML); BROKER_* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Topic administration
    #[command(subcommand)]
    Topics(TopicsCommand),

    /// Workflow output topics
    #[command(subcommand)]
    Flow(FlowCommand),

    /// Send one payload
    Produce {
        topic: String,
        payload: String,
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Provision an entity's topics and print its events as JSON lines
    Watch { entity: String },

    /// Serve the flow monitor over HTTP
    #[cfg(feature = "service")]
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: std::net::SocketAddr,
    },
}

#[derive(Subcommand)]
enum TopicsCommand {
    /// List user topics
    List,
    /// Create the detections and associations topics of an entity
    Ensure { entity: String },
    /// Delete one topic
    Delete { name: String },
    /// Set retention.ms on every topic
    Retention { ms: i64 },
}

#[derive(Subcommand)]
enum FlowCommand {
    /// List output topics, optionally of one organization-user-workflow key
    List { node: Option<String> },
    /// Create the output topic of a key
    Create {
        node: String,
        #[arg(long, default_value = "1")]
        partitions: i32,
        #[arg(long, default_value = "1")]
        replication_factor: i32,
    },
    /// Replay and follow output topics
    Watch { node: Option<String> },
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings> {
    let settings = match path {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    Ok(settings.with_env_overrides()?)
}

fn parse_node(node: Option<&str>) -> Result<Option<OrgUsrNode>> {
    node.map(OrgUsrNode::parse)
        .transpose()
        .context("Invalid organization-user-workflow key")
}

fn print_event(event: &FlowEvent) -> Result<()> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(TracingConfig {
        default_directive: if cli.debug { "debug" } else { "info" }.to_string(),
        format: cli.log_format,
    })?;

    let settings = load_settings(cli.config.as_ref())?;
    let context = BrokerContext::kafka(settings)?;

    let outcome = run(&context, cli.command).await;
    context.shutdown().await;
    outcome
}

async fn run(context: &BrokerContext, command: Command) -> Result<()> {
    match command {
        Command::Topics(TopicsCommand::List) => {
            for topic in context.admin().list_topics().await? {
                println!("{}", topic);
            }
        }
        Command::Topics(TopicsCommand::Ensure { entity }) => {
            let template = &context.settings().entity_topics;
            let specs: Vec<_> = entity_topics(&entity)
                .into_iter()
                .map(|name| template.spec(name))
                .collect();
            let report = context.admin().ensure_topics(&specs).await?;
            if report.created_any() {
                println!("created: {}", report.requested.join(", "));
            } else {
                println!("all topics already exist");
            }
        }
        Command::Topics(TopicsCommand::Delete { name }) => {
            if !context.admin().delete_topic(&name).await {
                bail!("Failed to delete topic {}", name);
            }
        }
        Command::Topics(TopicsCommand::Retention { ms }) => {
            if !context
                .admin()
                .alter_retention(&[ConfigEntry::new("retention.ms", ms)])
                .await
            {
                bail!("Retention was not applied to every topic");
            }
        }
        Command::Flow(FlowCommand::List { node }) => {
            let node = parse_node(node.as_deref())?;
            for topic in context.admin().flow_topics(node.as_ref()).await? {
                println!("{}", topic);
            }
        }
        Command::Flow(FlowCommand::Create {
            node,
            partitions,
            replication_factor,
        }) => {
            let node = OrgUsrNode::parse(&node)?;
            if !context
                .admin()
                .create_flow_topic(&node, partitions, replication_factor)
                .await
            {
                bail!("Failed to create {}", node.topic_name());
            }
            println!("{}", node.topic_name());
        }
        Command::Flow(FlowCommand::Watch { node }) => {
            let node = parse_node(node.as_deref())?;
            let router = EventRouter::new();
            router.on(EventKind::FlowOutput, print_event);
            let session = context.flow_session(node.as_ref(), router).await?;
            tokio::signal::ctrl_c().await?;
            session.stop().await;
        }
        Command::Produce {
            topic,
            payload,
            key,
        } => {
            let delivery = context
                .producer()
                .send(payload.into_bytes(), &topic, key.map(|k| k.into_bytes().into()))
                .await?;
            info!(
                topic = %topic,
                partition = delivery.partition,
                offset = delivery.offset,
                "Delivered"
            );
        }
        Command::Watch { entity } => {
            let router = EventRouter::new();
            router.on(EventKind::Detection, print_event);
            router.on(EventKind::Association, print_event);

            let factory = context.consumer_factory();
            let session = factory.acquire_with(&entity, router).await?;
            tokio::signal::ctrl_c().await?;
            factory.release(session).await;
        }
        #[cfg(feature = "service")]
        Command::Serve { addr } => {
            let monitor = broker_relay::FlowMonitor::new();
            let router = EventRouter::new();
            monitor.attach(&router);

            let session = match context.flow_session(None, router).await {
                Ok(session) => Some(session),
                Err(e) => {
                    tracing::warn!(error = %e, "Serving without workflow outputs");
                    None
                }
            };

            let service =
                broker_relay::service::RelayService::new(monitor, context.metrics().clone());
            let outcome = tokio::select! {
                served = service.serve(addr) => served.map_err(|e| anyhow::anyhow!(e)),
                signal = tokio::signal::ctrl_c() => signal.map_err(Into::into),
            };
            if let Some(session) = session {
                session.stop().await;
            }
            outcome?;
        }
    }
    Ok(())
}
