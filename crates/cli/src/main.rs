use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use relay::agents::{AgentDirectory, AgentStatus};
use relay::client::{ChatClient, PollLoop, PollOutcome, PollSettings, ReplyAck, WorkerClient};
use relay::notifier::PushEvent;
use relay::relay::Submission;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

/// Pause before a dropped worker subscription reconnects.
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Placeholder ids the worker remembers as answered.
const ANSWERED_CAP: usize = 1024;

/// Recently answered placeholder ids, oldest evicted first. Forgetting an id is
/// harmless: a repeated reply comes back as `AlreadyResolved`.
#[derive(Default)]
struct Answered {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl Answered {
    fn contains(&self, msg_id: &str) -> bool {
        self.ids.contains(msg_id)
    }

    fn insert(&mut self, msg_id: &str) {
        if !self.ids.insert(msg_id.to_string()) {
            return;
        }
        self.order.push_back(msg_id.to_string());
        while self.order.len() > ANSWERED_CAP {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
    }

    /// Keep only ids the hub still lists as pending; everything else is settled.
    fn retain_pending(&mut self, pending: &HashSet<&str>) {
        self.order.retain(|id| pending.contains(id.as_str()));
        self.ids.retain(|id| pending.contains(id.as_str()));
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Relay CLI: hub gateway, chat client and reference worker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory with an empty config and agent registry.
    Init {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the hub gateway (chat endpoints, worker endpoints and push subscriptions).
    Gateway {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config or 15152)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Register the agent for a user and print its worker token (shown once).
    Register {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// User the agent belongs to.
        #[arg(long, short, value_name = "ID")]
        user: String,

        /// Display name of the agent.
        #[arg(long, short, default_value = "Agent")]
        name: String,
    },

    /// Chat with your agent through the hub (interactive).
    Chat {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run a reference worker that answers every message with an echo.
    Worker {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Text put in front of the echoed message.
        #[arg(long, default_value = "echo: ")]
        prefix: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("relay {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Register { config, user, name }) => {
            if let Err(e) = run_register(config, user, name).await {
                log::error!("register failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat { config }) => {
            if let Err(e) = run_chat(config).await {
                log::error!("chat failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Worker { config, prefix }) => {
            if let Err(e) = run_worker(config, prefix).await {
                log::error!("worker failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(relay::config::default_config_path);
    let dir = relay::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = relay::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    relay::gateway::run_gateway(config, path).await
}

async fn run_register(config_path: Option<PathBuf>, user: String, name: String) -> anyhow::Result<()> {
    let (config, path) = relay::config::load_config(config_path)?;
    let user = user.trim().to_string();
    if user.is_empty() {
        anyhow::bail!("user id must not be empty");
    }
    if !config.users.iter().any(|u| u.id == user) {
        log::warn!("user {} is not in the config; the agent cannot be reached until it is", user);
    }
    let registry = relay::config::resolve_registry_path(&config, &path);
    let agents = AgentDirectory::load(&registry).await;
    let (record, token) = agents.register(user, name).await?;
    println!("agent {} ({}) registered for user {}", record.id, record.name, record.user_id);
    println!("worker token (store it now, it is not shown again):");
    println!("{}", token);
    Ok(())
}

async fn run_chat(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let (config, _) = relay::config::load_config(config_path)?;
    let token = relay::config::resolve_session_token(&config)
        .ok_or_else(|| anyhow::anyhow!("no session token (set client.sessionToken or RELAY_SESSION_TOKEN)"))?;
    let client = ChatClient::new(relay::config::resolve_hub_url(&config), token);
    let settings = PollSettings::from_config(&config.relay);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }

        match client.send(input).await {
            Ok(Submission::Completed { agent_message, .. }) => {
                println!("< {}", agent_message.content.trim());
            }
            Ok(Submission::Pending { agent_msg_id, .. }) => {
                let outcome = PollLoop::new(&client, settings, config.relay.timeout_notice.as_str())
                    .run(&agent_msg_id)
                    .await;
                if let PollOutcome::TimedOut { attempts, .. } = &outcome {
                    log::debug!("gave up on {} after {} poll(s)", agent_msg_id, attempts);
                }
                println!("< {}", outcome.message().content.trim());
            }
            Err(e) => {
                eprintln!("chat error: {}", e);
            }
        }
    }

    Ok(())
}

async fn run_worker(config_path: Option<PathBuf>, prefix: String) -> anyhow::Result<()> {
    let (config, _) = relay::config::load_config(config_path)?;
    let token = relay::config::resolve_worker_token(&config)
        .ok_or_else(|| anyhow::anyhow!("no worker token (set client.workerToken or RELAY_WORKER_TOKEN)"))?;
    let worker = WorkerClient::new(relay::config::resolve_hub_url(&config), token);

    let status = worker.set_status(AgentStatus::Online).await?;
    println!("worker {} ({}) online", status.id, status.name);

    let result = tokio::select! {
        r = worker_loop(&worker, &prefix) => r,
        _ = tokio::signal::ctrl_c() => {
            log::info!("interrupted, going offline");
            Ok(())
        }
    };

    if let Err(e) = worker.set_status(AgentStatus::Offline).await {
        log::warn!("failed to report offline status: {}", e);
    }
    result
}

/// Catch up on unanswered placeholders, then answer pushes until the hub shuts down.
async fn worker_loop(worker: &WorkerClient, prefix: &str) -> anyhow::Result<()> {
    let mut answered = Answered::default();
    loop {
        match worker.unread(None).await {
            Ok(unread) => {
                let pending: HashSet<&str> =
                    unread.pending_replies.iter().map(|p| p.msg_id.as_str()).collect();
                answered.retain_pending(&pending);
                log::debug!(
                    "catch-up: {} pending, {} remembered as answered",
                    pending.len(),
                    answered.len()
                );
                for p in unread.pending_replies {
                    let content = p.content.unwrap_or_default();
                    answer(worker, &mut answered, &p.msg_id, &format!("{}{}", prefix, content)).await;
                }
            }
            Err(e) => log::warn!("catch-up failed: {}", e),
        }

        match subscribe_once(worker, prefix, &mut answered).await {
            Ok(true) => {
                println!("hub is shutting down");
                return Ok(());
            }
            Ok(false) => log::warn!("subscription closed, reconnecting"),
            Err(e) => log::warn!("subscription failed: {}, reconnecting", e),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// One subscription session. Returns true when the hub announced shutdown.
async fn subscribe_once(
    worker: &WorkerClient,
    prefix: &str,
    answered: &mut Answered,
) -> anyhow::Result<bool> {
    let mut request = worker.subscribe_url().into_client_request()?;
    request
        .headers_mut()
        .insert("Authorization", format!("Bearer {}", worker.token()).parse()?);
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await?;
    log::info!("subscribed to {}", worker.subscribe_url());

    while let Some(msg) = ws.next().await {
        let Message::Text(text) = msg? else { continue };
        let event: PushEvent = match serde_json::from_str(&text) {
            Ok(e) => e,
            Err(e) => {
                log::debug!("ignoring unknown push frame: {}", e);
                continue;
            }
        };
        match event {
            PushEvent::ChatIncoming {
                agent_msg_id,
                content,
                ..
            } => {
                answer(worker, answered, &agent_msg_id, &format!("{}{}", prefix, content)).await;
            }
            PushEvent::Ping => log::debug!("heartbeat"),
            PushEvent::Shutdown => return Ok(true),
        }
    }
    Ok(false)
}

/// Post a reply once per placeholder; a 409 means an earlier attempt already landed.
async fn answer(worker: &WorkerClient, answered: &mut Answered, msg_id: &str, reply: &str) {
    if answered.contains(msg_id) {
        return;
    }
    match worker.reply(msg_id, reply).await {
        Ok(ReplyAck::Accepted(_)) => {
            log::info!("answered {}", msg_id);
            answered.insert(msg_id);
        }
        Ok(ReplyAck::AlreadyResolved) => {
            log::debug!("{} was already answered", msg_id);
            answered.insert(msg_id);
        }
        Err(e) => log::warn!("reply to {} failed: {}", msg_id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answered_ids_are_capped() {
        let mut answered = Answered::default();
        for i in 0..ANSWERED_CAP + 10 {
            answered.insert(&format!("msg-{}", i));
        }
        answered.insert("msg-5000");
        answered.insert("msg-5000");
        assert_eq!(answered.len(), ANSWERED_CAP);
        assert!(!answered.contains("msg-0"));
        assert!(answered.contains("msg-5000"));
    }

    #[test]
    fn catch_up_forgets_settled_ids() {
        let mut answered = Answered::default();
        answered.insert("msg-a");
        answered.insert("msg-b");
        let pending: HashSet<&str> = ["msg-b", "msg-c"].into_iter().collect();
        answered.retain_pending(&pending);
        assert!(!answered.contains("msg-a"));
        assert!(answered.contains("msg-b"));
        assert_eq!(answered.len(), 1);
    }
}
