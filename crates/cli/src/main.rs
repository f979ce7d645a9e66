use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};

use gitplane_core::{document, GroupVersionKind, Selector, WatchOptions};
use gitplane_store::{Options, Store};

#[derive(Parser, Debug)]
#[command(name = "gitplanectl", version, about = "Git-backed object store CLI")]
struct Cli {
    /// Remote git URL holding the object tree
    #[arg(long = "url")]
    url: String,

    /// Branch to pull from and push to (default: remote HEAD)
    #[arg(long = "branch", default_value = "")]
    branch: String,

    /// Subdirectory in the repo to operate on
    #[arg(long = "subdir", default_value = "")]
    subdir: String,

    /// How often to poll git, in seconds
    #[arg(long = "interval", default_value_t = 15)]
    interval: u64,

    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace to scope reads to (default: all namespaces)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List objects for a group/version/kind key
    Ls {
        /// GVK key, e.g. "v1/ConfigMap" or "example.com/v1/Widget"
        gvk: String,
        /// Label selector, e.g. "app=web,env in (dev,staging)"
        #[arg(long = "selector", default_value = "")]
        selector: String,
    },
    /// Print one object as YAML
    Get {
        /// GVK key, e.g. "example.com/v1/Widget"
        gvk: String,
        /// Object name
        name: String,
    },
    /// Stream change events for a GVK until interrupted
    Watch {
        /// GVK key, e.g. "example.com/v1/Widget"
        gvk: String,
        /// Label selector filtering events
        #[arg(long = "selector", default_value = "")]
        selector: String,
        /// Resource version to resume after (default: replay everything)
        #[arg(long = "from", default_value = "")]
        from: String,
    },
    /// Create or update an object from a YAML file
    Apply {
        /// Path to a single-document YAML file
        file: std::path::PathBuf,
    },
    /// Delete an object
    Delete {
        /// GVK key, e.g. "example.com/v1/Widget"
        gvk: String,
        /// Object name
        name: String,
    },
}

fn init_tracing() {
    let env = std::env::var("GITPLANE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("GITPLANE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid GITPLANE_METRICS_ADDR; expected host:port");
        }
    }
}

fn parse_gvk(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<&str> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] => Ok(GroupVersionKind::new("", *version, *kind)),
        [group, version, kind] => Ok(GroupVersionKind::new(*group, *version, *kind)),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let mut options = Options::new(&cli.url);
    options.branch = cli.branch.clone();
    options.sub_directory = cli.subdir.clone();
    options.interval = Duration::from_secs(cli.interval.max(1));

    info!(url = %cli.url, "opening store");
    let store = Store::open(options).await.context("opening store")?;
    let ns = cli.namespace.clone().unwrap_or_default();

    let result = run(&cli, &store, &ns).await;
    if let Err(err) = store.close().await {
        error!(error = %err, "closing store");
    }
    result
}

async fn run(cli: &Cli, store: &Store, ns: &str) -> Result<()> {
    match &cli.command {
        Commands::Ls { gvk, selector } => {
            let gvk = parse_gvk(gvk)?;
            let selector = Selector::parse(selector)?;
            let list = store.list(&gvk, ns, &selector).await?;
            match cli.output {
                Output::Human => {
                    println!("{:<16} {:<24} {:<8} {}", "NAMESPACE", "NAME", "REVISION", "UID");
                    for item in list["items"].as_array().map(Vec::as_slice).unwrap_or_default() {
                        println!(
                            "{:<16} {:<24} {:<8} {}",
                            or_dash(document::namespace(item)),
                            document::name(item),
                            document::resource_version(item),
                            document::uid(item),
                        );
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&list)?),
            }
        }
        Commands::Get { gvk, name } => {
            let gvk = parse_gvk(gvk)?;
            let doc = store.get(&gvk, ns, name).await?;
            match cli.output {
                Output::Human => print!("{}", serde_yaml::to_string(&doc)?),
                Output::Json => println!("{}", serde_json::to_string_pretty(&doc)?),
            }
        }
        Commands::Watch { gvk, selector, from } => {
            let gvk = parse_gvk(gvk)?;
            let opts = WatchOptions {
                resource_version: from.clone(),
                label_selector: selector.clone(),
            };
            let mut watcher = store.watch(&gvk, opts).await?;
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("interrupted; stopping watch");
                        break;
                    }
                    event = watcher.recv() => {
                        let Some(event) = event else { break };
                        print_event(cli.output, &event)?;
                    }
                }
            }
            watcher.stop();
        }
        Commands::Apply { file } => {
            let raw = tokio::fs::read(file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let mut doc: serde_json::Value =
                serde_yaml::from_slice(&raw).context("decoding YAML document")?;
            let gvk = document::gvk(&doc);
            if gvk.kind.is_empty() || gvk.version.is_empty() {
                return Err(anyhow!("document is missing apiVersion or kind"));
            }

            let namespace = document::namespace(&doc).to_string();
            let name = document::name(&doc).to_string();
            let applied = match store.get(&gvk, &namespace, &name).await {
                Ok(existing) => {
                    // Replace whatever is stored; the live resourceVersion is
                    // the concurrency token.
                    document::set_resource_version(&mut doc, document::resource_version(&existing));
                    store.update(&gvk, doc, true).await?
                }
                Err(err) if err.is_not_found() => store.create(&gvk, doc).await?,
                Err(err) => return Err(err.into()),
            };
            match cli.output {
                Output::Human => println!(
                    "{} {}/{} at revision {}",
                    gvk,
                    or_dash(document::namespace(&applied)),
                    document::name(&applied),
                    document::resource_version(&applied),
                ),
                Output::Json => println!("{}", serde_json::to_string_pretty(&applied)?),
            }
        }
        Commands::Delete { gvk, name } => {
            let gvk = parse_gvk(gvk)?;
            store.delete(&gvk, ns, name, None).await?;
            if cli.output == Output::Human {
                println!("deleted {} {}/{}", gvk, or_dash(ns), name);
            }
        }
    }
    Ok(())
}

fn print_event(output: Output, event: &gitplane_core::Event) -> Result<()> {
    use gitplane_core::Event;
    match event {
        Event::Added(doc) | Event::Modified(doc) | Event::Deleted(doc) => match output {
            Output::Human => println!(
                "{:<9} {}/{} rv={}",
                event.type_name(),
                or_dash(document::namespace(doc)),
                document::name(doc),
                document::resource_version(doc),
            ),
            Output::Json => println!(
                "{}",
                serde_json::json!({"type": event.type_name(), "object": doc})
            ),
        },
        Event::Error(status) => match output {
            Output::Human => println!("{:<9} {}", event.type_name(), status.message),
            Output::Json => println!(
                "{}",
                serde_json::json!({"type": event.type_name(), "status": status})
            ),
        },
    }
    Ok(())
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}
