//! Centrifugo server binary.
//!
//! Starts the node with the chosen engine, serves the configured HTTP
//! endpoints per port and handles signals: SIGHUP reloads configuration
//! without dropping connections, SIGINT/SIGTERM shut down gracefully with
//! a 10 second deadline before the process exits forcibly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use centrifugo_server::{
    Config, HandlerFlags, MemoryEngine, MuxOptions, Node, RedisEngine, RedisEngineConfig,
};

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// Centrifugo. Real-time messaging (WebSocket) server.
#[derive(Parser)]
#[command(name = "centrifugo", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the server version
    Version,

    /// Check a configuration file
    Checkconfig {
        /// Path to config file to check
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
    },

    /// Generate a simple configuration file to start with
    Genconfig {
        /// Path to output config file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Port to bind to
    #[arg(short, long, default_value = "8000")]
    port: String,

    /// Address to listen on
    #[arg(short, long, default_value = "")]
    address: String,

    /// Path to config file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Unique node name
    #[arg(short, long, default_value = "")]
    name: String,

    /// Engine to use: memory or redis
    #[arg(short, long, default_value = "memory")]
    engine: String,

    /// Enable admin socket
    #[arg(long)]
    admin: bool,

    /// Serve admin web interface application (enables admin socket)
    #[arg(short, long)]
    web: bool,

    /// Debug mode - please, do not use it in production
    #[arg(short, long)]
    debug: bool,

    /// Start in insecure client mode
    #[arg(long)]
    insecure: bool,

    /// Use insecure API mode
    #[arg(long)]
    insecure_api: bool,

    /// Use insecure admin mode - no auth required for admin socket
    #[arg(long)]
    insecure_admin: bool,

    /// Accept SSL connections. Requires an X509 certificate and key
    #[arg(long)]
    ssl: bool,

    /// Path to an X509 certificate file
    #[arg(long, default_value = "")]
    ssl_cert: String,

    /// Path to an X509 certificate key
    #[arg(long, default_value = "")]
    ssl_key: String,

    /// Port to bind API endpoints to (defaults to --port)
    #[arg(long, default_value = "")]
    api_port: String,

    /// Port to bind admin endpoints to (defaults to --port)
    #[arg(long, default_value = "")]
    admin_port: String,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Optional log file - if not specified all logs go to STDOUT
    #[arg(long, default_value = "")]
    log_file: String,

    /// Redis host
    #[arg(long, default_value = "127.0.0.1")]
    redis_host: String,

    /// Redis port
    #[arg(long, default_value_t = 6379)]
    redis_port: u16,

    /// Redis auth password
    #[arg(long, default_value = "")]
    redis_password: String,

    /// Redis database number
    #[arg(long, default_value_t = 0)]
    redis_db: u32,

    /// Redis connection URL (overrides host/port/password/db)
    #[arg(long, default_value = "")]
    redis_url: String,

    /// Consume API commands from the Redis work queue
    #[arg(long)]
    redis_api: bool,

    /// Number of extra API queue shards
    #[arg(long, default_value_t = 0)]
    redis_api_num_shards: usize,
}

fn main() {
    let cli = Cli::parse();
    let code = match cli.command {
        Some(Commands::Version) => {
            println!("Centrifugo v{}", centrifugo_core::VERSION);
            0
        }
        Some(Commands::Checkconfig { config }) => match check_config(&config) {
            Ok(()) => {
                println!("{} config file is valid", "OK".green().bold());
                0
            }
            Err(e) => {
                eprintln!("{} {e:#}", "ERROR".red().bold());
                1
            }
        },
        Some(Commands::Genconfig { config }) => match generate_config(&config) {
            Ok(()) => {
                println!("{} config written to {}", "OK".green().bold(), config.display());
                0
            }
            Err(e) => {
                eprintln!("{} {e:#}", "ERROR".red().bold());
                1
            }
        },
        None => run_server(cli.serve),
    };
    std::process::exit(code);
}

fn check_config(path: &Path) -> Result<()> {
    let cfg = Config::from_file(path).context("loading config")?;
    cfg.validate().context("validating config")?;
    Ok(())
}

fn generate_config(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("output config file already exists: {}", path.display());
    }
    let cfg = serde_json::json!({
        "secret": uuid::Uuid::new_v4().to_string(),
    });
    std::fs::write(path, serde_json::to_string_pretty(&cfg)?)?;
    Ok(())
}

fn setup_logging(args: &ServeArgs) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
    if args.log_file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&args.log_file)
            .with_context(|| format!("opening log file {}", args.log_file))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    }
    Ok(())
}

fn load_config(args: &ServeArgs) -> Result<Config> {
    let mut cfg = if args.config.exists() {
        Config::from_file(&args.config)
            .with_context(|| format!("parsing config file {}", args.config.display()))?
    } else {
        warn!("no config file found at {}", args.config.display());
        Config::default()
    };
    cfg.apply_env();
    if !args.name.is_empty() {
        cfg.name = args.name.clone();
    }
    if args.insecure {
        cfg.insecure = true;
    }
    if args.insecure_api {
        cfg.insecure_api = true;
    }
    if args.insecure_admin {
        cfg.insecure_admin = true;
    }
    cfg.initialize();
    cfg.validate().context("validating config")?;
    Ok(cfg)
}

fn run_server(args: ServeArgs) -> i32 {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return 1;
        }
    };
    match runtime.block_on(serve(args)) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            1
        }
    }
}

async fn serve(args: ServeArgs) -> Result<i32> {
    setup_logging(&args)?;
    info!("Centrifugo version: {}", centrifugo_core::VERSION);
    info!("Process PID: {}", std::process::id());

    let cfg = load_config(&args)?;
    if cfg.insecure {
        warn!("running in INSECURE client mode");
    }
    if cfg.insecure_api {
        warn!("running in INSECURE API mode");
    }
    if cfg.insecure_admin {
        warn!("running in INSECURE admin mode");
    }
    if cfg.secret.is_empty() && !(cfg.insecure && cfg.insecure_api) {
        warn!("no secret set in config");
    }

    if args.ssl {
        if args.ssl_cert.is_empty() {
            bail!("no SSL certificate provided");
        }
        if args.ssl_key.is_empty() {
            bail!("no SSL certificate key provided");
        }
        // TLS is terminated by a fronting proxy in this deployment model.
        warn!("TLS termination is delegated to the fronting proxy, serving plain TCP");
    }

    let node = Node::new(cfg);

    match args.engine.as_str() {
        "memory" => {
            let engine = Arc::new(MemoryEngine::new(node.clone()));
            node.set_engine(engine);
        }
        "redis" => {
            let redis_cfg = RedisEngineConfig {
                host: args.redis_host.clone(),
                port: args.redis_port,
                password: args.redis_password.clone(),
                db: args.redis_db,
                url: args.redis_url.clone(),
                api: args.redis_api,
                num_api_shards: args.redis_api_num_shards,
            };
            let engine =
                Arc::new(RedisEngine::new(node.clone(), redis_cfg).context("initializing redis engine")?);
            node.set_engine(engine);
        }
        other => bail!("unknown engine: {other}"),
    }

    info!("Engine: {}", node.engine_name());
    node.run().await.context("starting node")?;

    // Map ports to the endpoint sets they serve.
    let client_port = args.port.clone();
    let api_port = if args.api_port.is_empty() {
        client_port.clone()
    } else {
        args.api_port.clone()
    };
    let admin_port = if args.admin_port.is_empty() {
        client_port.clone()
    } else {
        args.admin_port.clone()
    };
    let admin_enabled = args.admin || args.web;

    fn add_flag(map: &mut HashMap<String, HandlerFlags>, port: String, flag: HandlerFlags) {
        let entry = map.entry(port).or_insert(HandlerFlags::NONE);
        *entry = *entry | flag;
    }
    let mut port_flags: HashMap<String, HandlerFlags> = HashMap::new();
    add_flag(&mut port_flags, client_port, HandlerFlags::RAW_WS);
    add_flag(&mut port_flags, api_port, HandlerFlags::API);
    if admin_enabled {
        add_flag(&mut port_flags, admin_port.clone(), HandlerFlags::ADMIN);
    }
    if args.debug {
        add_flag(&mut port_flags, admin_port, HandlerFlags::DEBUG);
    }

    for (port, flags) in &port_flags {
        if flags.is_empty() {
            continue;
        }
        let addr = format!("{}:{}", args.address, port);
        let router = centrifugo_server::http::build_router(
            node.clone(),
            MuxOptions {
                flags: *flags,
                prefix: String::new(),
            },
        );
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        info!("start serving {flags} endpoints on {addr}");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!("serve error: {e}");
            }
        });
    }

    handle_signals(node, args).await
}

async fn handle_signals(node: Arc<Node>, args: ServeArgs) -> Result<i32> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
    let mut int = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut term = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    loop {
        tokio::select! {
            _ = hup.recv() => {
                info!("SIGHUP received, reloading configuration");
                match load_config(&args) {
                    Ok(cfg) => {
                        node.set_config(cfg);
                        info!("configuration successfully reloaded");
                    }
                    Err(e) => error!("configuration reload failed: {e:#}"),
                }
            }
            _ = int.recv() => {
                shutdown_with_deadline(&node).await;
                return Ok(130);
            }
            _ = term.recv() => {
                shutdown_with_deadline(&node).await;
                return Ok(0);
            }
        }
    }
}

async fn shutdown_with_deadline(node: &Arc<Node>) {
    info!("shutting down");
    tokio::spawn(async {
        tokio::time::sleep(SHUTDOWN_DEADLINE).await;
        error!("shutdown deadline exceeded, exiting forcibly");
        std::process::exit(1);
    });
    node.shutdown().await;
}
