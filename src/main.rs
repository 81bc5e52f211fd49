//! Netsock demo - echo server or one-shot client driven by a JSON config

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use netsock::common::{ConnState, FuncError, FuncInfo, FuncInfoSrv, SocketAddress};
use netsock::config::Config;
use netsock::context;
use netsock::error::{Error, Result};
use netsock::{CancellationToken, Server};

fn main() -> Result<()> {
    let args = Args::parse();

    if args.version {
        print_version();
        return Ok(());
    }

    if let Some(config_type) = args.gen_config {
        let config = match config_type.as_str() {
            "client" => Config::default_client(),
            "server" => Config::default_server(),
            _ => {
                eprintln!("Unknown config type: {}. Use 'client' or 'server'", config_type);
                std::process::exit(1);
            }
        };
        let json = serde_json::to_string_pretty(&config)
            .map_err(|e| Error::Config(format!("Failed to render config: {}", e)))?;
        println!("{}", json);
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => {
            print_help();
            std::process::exit(1);
        }
    };

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(config.log.filter())
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Config(format!("Failed to set tracing subscriber: {}", e)))?;

    info!("Netsock v{} starting...", env!("CARGO_PKG_VERSION"));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match args.send {
            Some(message) => run_client(&config, message).await,
            None => run_server(&config).await,
        }
    })?;

    info!("Goodbye!");
    Ok(())
}

async fn run_server(config: &Config) -> Result<()> {
    let settings = config
        .server
        .as_ref()
        .ok_or_else(|| Error::Config("no server section in config".into()))?;

    let server: Arc<dyn Server> = Arc::from(settings.build(None, context::echo())?);

    let on_error: FuncError = Arc::new(|e: &Error| error!("{}", e));
    let on_info: FuncInfo = Arc::new(|local: &SocketAddress, remote: &SocketAddress, state: ConnState| {
        info!("{} [local: {}, remote: {}]", state, local, remote);
    });
    let on_server: FuncInfoSrv = Arc::new(|msg: &str| info!("{}", msg));
    server.register_func_error(Some(on_error));
    server.register_func_info(Some(on_info));
    server.register_func_info_server(Some(on_server));

    let token = CancellationToken::new();
    let mut listener = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.listen(&token).await })
    };

    let outcome = tokio::select! {
        r = &mut listener => r,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down, {} connection(s) open", server.open_connections());
            server.shutdown(&CancellationToken::new()).await?;
            listener.await
        }
    };

    match outcome {
        Ok(result) => result,
        Err(e) => Err(Error::Handler(e.to_string())),
    }
}

async fn run_client(config: &Config, message: String) -> Result<()> {
    let settings = config
        .client
        .as_ref()
        .ok_or_else(|| Error::Config("no client section in config".into()))?;

    let client = settings.build()?;
    let on_info: FuncInfo = Arc::new(|local: &SocketAddress, remote: &SocketAddress, state: ConnState| {
        info!("{} [local: {}, remote: {}]", state, local, remote);
    });
    client.register_func_info(Some(on_info));

    client
        .once(
            &CancellationToken::new(),
            message.as_bytes(),
            Box::new(|reader: &mut dyn Read| {
                let mut response = String::new();
                match reader.read_to_string(&mut response) {
                    Ok(_) => println!("{}", response),
                    Err(e) => error!("Response is not text: {}", e),
                }
            }),
        )
        .await
}

/// Command line arguments
struct Args {
    config: Option<PathBuf>,
    gen_config: Option<String>,
    send: Option<String>,
    version: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut config = None;
        let mut gen_config = None;
        let mut send = None;
        let mut version = false;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "-c" | "--config" => {
                    if i + 1 < args.len() {
                        config = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--gen-config" => {
                    if i + 1 < args.len() {
                        gen_config = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "--send" => {
                    if i + 1 < args.len() {
                        send = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "-v" | "--version" => version = true,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                arg if !arg.starts_with('-') && config.is_none() => {
                    // Positional argument: treat as config file
                    config = Some(PathBuf::from(arg));
                }
                _ => {}
            }
            i += 1;
        }

        Self { config, gen_config, send, version }
    }
}

fn print_help() {
    println!(r#"Netsock - socket server/client over tcp, udp and unix sockets

USAGE:
    netsock [OPTIONS]

OPTIONS:
    -c, --config <FILE>     Path to configuration file
    --send <MESSAGE>        Send one request with the client section and print the reply
    --gen-config <TYPE>     Generate example config (client/server)
    -v, --version           Print version information
    -h, --help              Print help information

EXAMPLES:
    netsock --gen-config server > server.json
    netsock -c server.json
    netsock -c client.json --send hello
"#);
}

fn print_version() {
    println!("Netsock v{}", env!("CARGO_PKG_VERSION"));
    println!("Socket server/client framework over tcp, udp and unix sockets");
}
