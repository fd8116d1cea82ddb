use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use labsync_api::{ControlPlane, NotificationDirective, Notifier, NotifyError, NotifyLevel, Selector};
use labsync_core::{Classification, Resource, ResourceKind, ResourceList};
use labsync_kubehub::KubeControlPlane;
use labsync_session::{NotificationPolicy, PolicyConfig, Scope, Session, SessionConfig, SessionUpdate};
use serde::Serialize;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "labsyncctl", version, about = "Follow lab resources live")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace to list/watch (default: all)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    /// Label selector forwarded to the API server, e.g. "crownlabs.polito.it/workspace=ws1"
    #[arg(short = 'l', long = "selector", global = true)]
    selector: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List resources once
    Ls {
        /// Kind alias (instance, template, tenant) or gvk key
        kind: String,
    },
    /// Follow resources and print classified changes and notifications
    Watch {
        /// Kind alias (instance, template, tenant) or gvk key
        #[arg(default_value = "instance")]
        kind: String,
        /// Viewer's own namespace; notifications are scoped to it
        #[arg(long = "viewer-ns", env = "LABSYNC_VIEWER_NS")]
        viewer_ns: Option<String>,
        /// Additional namespaces the viewer manages
        #[arg(long = "manage")]
        manage: Vec<String>,
        /// Notify for every namespace
        #[arg(long = "everyone", action = ArgAction::SetTrue)]
        everyone: bool,
        /// Notification policy (YAML); flags above are ignored when set
        #[arg(long = "policy")]
        policy: Option<PathBuf>,
        /// Also warn when an instance is stopped
        #[arg(long = "alert-on-stopped", action = ArgAction::SetTrue)]
        alert_on_stopped: bool,
    },
    /// Print the effective notification policy
    Policy {
        #[arg(long = "policy")]
        policy: Option<PathBuf>,
        #[arg(long = "viewer-ns", env = "LABSYNC_VIEWER_NS")]
        viewer_ns: Option<String>,
    },
}

fn init_tracing() {
    let env = std::env::var("LABSYNC_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("LABSYNC_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid LABSYNC_METRICS_ADDR; expected host:port");
        }
    }
}

/// Prints directives to stdout.
struct ConsoleNotifier {
    output: Output,
}

impl Notifier for ConsoleNotifier {
    fn notify(&self, d: &NotificationDirective) -> Result<(), NotifyError> {
        match self.output {
            Output::Human => {
                let tag = match d.level {
                    NotifyLevel::Success => "READY",
                    NotifyLevel::Warning => "WARN",
                    NotifyLevel::Error => "ERROR",
                };
                match &d.action_link {
                    Some(link) => println!("! [{}] {}: {} -> {}", tag, d.title, d.description, link),
                    None => println!("! [{}] {}: {}", tag, d.title, d.description),
                }
            }
            Output::Json => {
                let line = serde_json::to_string(&serde_json::json!({ "notification": d }))
                    .map_err(|e| NotifyError(e.to_string()))?;
                println!("{}", line);
            }
        }
        Ok(())
    }
}

fn policy_from(
    file: Option<&PathBuf>,
    viewer_ns: Option<String>,
    manage: Vec<String>,
    everyone: bool,
    alert_on_stopped: bool,
) -> Result<PolicyConfig> {
    let mut cfg = match file {
        Some(path) => PolicyConfig::from_yaml_file(path)?,
        None => {
            let scope = if everyone {
                Scope::Everyone
            } else if !manage.is_empty() {
                Scope::namespaces(manage.into_iter().chain(viewer_ns))
            } else {
                viewer_ns.map(Scope::OwnNamespace).unwrap_or_default()
            };
            PolicyConfig { scope, ..PolicyConfig::default() }
        }
    };
    cfg.alert_on_stopped |= alert_on_stopped;
    Ok(cfg)
}

#[derive(Serialize)]
struct Row<'a> {
    namespace: Option<&'a str>,
    name: &'a str,
    display: &'a str,
    phase: Option<&'a str>,
    url: Option<&'a str>,
}

impl<'a> From<&'a Resource> for Row<'a> {
    fn from(r: &'a Resource) -> Self {
        Row { namespace: r.namespace(), name: r.name(), display: r.display_name(), phase: r.phase(), url: r.url() }
    }
}

fn print_table(list: &ResourceList) {
    println!("{:<20} {:<24} {:<12} AGE", "NAMESPACE", "NAME", "PHASE");
    for r in list.iter() {
        let age = r.creation_ts().map(render_age).unwrap_or_else(|| "-".to_string());
        println!("{:<20} {:<24} {:<12} {}", r.namespace().unwrap_or("-"), r.name(), r.phase().unwrap_or("-"), age);
    }
}

fn print_update(output: Output, list: &ResourceList, update: &SessionUpdate) -> Result<()> {
    match output {
        Output::Json => {
            let line = match update {
                SessionUpdate::Event(out) => serde_json::json!({
                    "kind": out.kind.map(|k| k.as_str()),
                    "identity": out.identity.as_ref().map(|i| i.to_string()),
                    "classification": out.classification.as_str(),
                    "changed": out.changed,
                    "items": list.len(),
                }),
                SessionUpdate::Opened { items } => serde_json::json!({
                    "opened": items,
                    "rows": list.iter().map(Row::from).collect::<Vec<_>>(),
                }),
                SessionUpdate::Resynced { items, attempts } => serde_json::json!({ "resynced": items, "attempts": attempts }),
                SessionUpdate::Failed { reason } => serde_json::json!({ "failed": reason }),
            };
            println!("{}", serde_json::to_string(&line)?);
        }
        Output::Human => match update {
            SessionUpdate::Opened { .. } => print_table(list),
            SessionUpdate::Event(out) => {
                let who = out.identity.as_ref().map(|i| i.to_string()).unwrap_or_else(|| "(malformed)".to_string());
                match out.classification {
                    Classification::Addition => println!("+ {}", who),
                    Classification::Deletion => println!("- {}", who),
                    Classification::Drop => {}
                    c => println!("~ {} ({})", who, c),
                }
            }
            SessionUpdate::Resynced { items, attempts } => {
                println!("= resynced {} items after {} attempt(s)", items, attempts)
            }
            SessionUpdate::Failed { reason } => eprintln!("session failed: {}", reason),
        },
    }
    Ok(())
}

fn selector_for(cli: &Cli, kind: &str) -> Result<Selector> {
    let kind = ResourceKind::parse(kind, true).with_context(|| format!("parsing kind {:?}", kind))?;
    let mut sel = Selector::new(kind);
    if let Some(ns) = &cli.namespace {
        sel = sel.in_namespace(ns.clone());
    }
    if let Some(l) = &cli.selector {
        sel = sel.with_labels(l.clone());
    }
    Ok(sel)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let config = SessionConfig::from_env();

    match &cli.command {
        Commands::Ls { kind } => {
            let sel = selector_for(&cli, kind)?;
            info!(selector = %sel, "ls invoked");
            let cp = KubeControlPlane::try_default().await?;
            let list = cp.snapshot(&sel).await?.items;
            match cli.output {
                Output::Human => print_table(&list),
                Output::Json => {
                    let rows: Vec<_> = list.iter().map(Row::from).collect();
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
            }
        }
        Commands::Watch { kind, viewer_ns, manage, everyone, policy, alert_on_stopped } => {
            let sel = selector_for(&cli, kind)?;
            let cfg = policy_from(policy.as_ref(), viewer_ns.clone(), manage.clone(), *everyone, *alert_on_stopped)?;
            info!(selector = %sel, scope = ?cfg.scope, "watch invoked");
            let cp = KubeControlPlane::try_default().await?.with_queue_cap(config.queue_cap);
            let output = cli.output;
            let mut session = Session::new(sel, Arc::new(cp), Arc::new(ConsoleNotifier { output }))
                .with_policy(NotificationPolicy::new(cfg))
                .with_config(config);

            let (stop_tx, stop_rx) = oneshot::channel();
            tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    info!("Ctrl-C received; closing session");
                    let _ = stop_tx.send(());
                }
            });
            let res = session
                .run(stop_rx, |list, update| {
                    if let Err(e) = print_update(output, list, update) {
                        error!(error = %e, "failed to print update");
                    }
                })
                .await;
            if let Err(e) = res {
                error!(error = %e, "watch ended with error");
                return Err(e.into());
            }
            warn!("watch loop ended (graceful shutdown)");
        }
        Commands::Policy { policy, viewer_ns } => {
            let cfg = policy_from(policy.as_ref(), viewer_ns.clone(), Vec::new(), false, false)?;
            match cli.output {
                Output::Human => print!("{}", serde_yaml::to_string(&cfg)?),
                Output::Json => println!("{}", serde_json::to_string_pretty(&cfg)?),
            }
        }
    }

    Ok(())
}

fn render_age(creation_ts: i64) -> String {
    if creation_ts <= 0 { return "-".to_string(); }
    let now = chrono::Utc::now().timestamp();
    let mut secs = (now - creation_ts).max(0) as u64;
    let days = secs / 86_400; secs %= 86_400;
    let hours = secs / 3600; secs %= 3600;
    let mins = secs / 60; secs %= 60;
    if days > 0 { format!("{}d{}h", days, hours) }
    else if hours > 0 { format!("{}h{}m", hours, mins) }
    else if mins > 0 { format!("{}m", mins) }
    else { format!("{}s", secs) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_flags_build_policy() {
        let own = policy_from(None, Some("tenant-a".into()), Vec::new(), false, false).unwrap();
        assert!(own.scope.admits(Some("tenant-a")));
        assert!(!own.scope.admits(Some("ws-1")));

        let managed = policy_from(None, Some("tenant-a".into()), vec!["ws-1".into()], false, true).unwrap();
        assert!(managed.scope.admits(Some("ws-1")));
        assert!(managed.scope.admits(Some("tenant-a")));
        assert!(managed.alert_on_stopped);

        let nobody = policy_from(None, None, Vec::new(), false, false).unwrap();
        assert!(!nobody.scope.admits(Some("tenant-a")));
        assert!(policy_from(None, None, Vec::new(), true, false).unwrap().scope.admits(None));
    }

    #[test]
    fn age_rendering() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(render_age(0), "-");
        assert_eq!(render_age(now - 90), "1m");
        assert_eq!(render_age(now - 2 * 86_400 - 3 * 3600), "2d3h");
    }

    #[test]
    fn cli_parses_watch() {
        let cli = Cli::try_parse_from(["labsyncctl", "--ns", "ws", "watch", "--viewer-ns", "tenant-a", "--manage", "ws"]).unwrap();
        match cli.command {
            Commands::Watch { kind, viewer_ns, manage, .. } => {
                assert_eq!(kind, "instance");
                assert_eq!(viewer_ns.as_deref(), Some("tenant-a"));
                assert_eq!(manage, vec!["ws".to_string()]);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.namespace.as_deref(), Some("ws"));
    }
}
