use queue_dispatch_worker::handler::{JsonHandler, LogHandler};
use queue_dispatch_worker::{QueueStoreClient, Subscriber, SubscriberConfig};
use queue_dispatch_store::RedisStoreClient;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "qd-worker")]
#[command(about = "Queue dispatch worker", long_about = None)]
struct Args {
    /// Queue store URL
    #[arg(short, long)]
    url: Option<String>,

    /// Store username
    #[arg(long)]
    username: Option<String>,

    /// Store password
    #[arg(long)]
    password: Option<String>,

    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,

    /// Queue whose messages are logged (repeatable)
    #[arg(short, long = "queue")]
    queues: Vec<String>,

    /// Queue whose messages are parsed as JSON (repeatable)
    #[arg(long = "json-queue")]
    json_queues: Vec<String>,

    /// Push QUEUE=MESSAGE and exit instead of consuming (repeatable)
    #[arg(long, value_parser = parse_push)]
    push: Vec<(String, String)>,
}

fn parse_push(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(queue, message)| (queue.to_string(), message.to_string()))
        .ok_or_else(|| format!("expected QUEUE=MESSAGE, got '{}'", raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        SubscriberConfig::from_file(config_path)?
    } else {
        SubscriberConfig::default()
    };

    // Override with CLI args
    if let Some(url) = args.url {
        config.store_url = url;
    }
    if args.username.is_some() {
        config.username = args.username;
    }
    if args.password.is_some() {
        config.password = args.password;
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if !args.push.is_empty() {
        let client = RedisStoreClient::new(config.connect_timeout());
        let connection = client.connect(&config.target()).await?;
        for (queue, message) in &args.push {
            connection.push(queue, message).await?;
            tracing::info!(queue = %queue, "Pushed message");
        }
        connection.close().await;
        return Ok(());
    }

    let subscriber = Subscriber::redis(config);

    for queue in &args.queues {
        subscriber.subscribe(queue.as_str()).handle(LogHandler::new(queue.as_str()))?;
    }
    for queue in &args.json_queues {
        subscriber.subscribe(queue.as_str()).handle(JsonHandler::new(queue.as_str()))?;
    }

    if subscriber.registry().is_empty() {
        anyhow::bail!("no queues given; pass --queue or --json-queue");
    }

    tracing::info!("Registered queues: {:?}", subscriber.registry().queue_names());

    subscriber
        .run_until(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}
