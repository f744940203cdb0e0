use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use infermesh::bus::MessageBus;
use infermesh::cli::{
    build_registry_config, connect_bus, run_chat, run_register, run_serve, run_watch,
    run_withdraw, Cli, CommandResult, Commands,
};
use infermesh::config::resolve_nats_url;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified, otherwise pick up ./.env when present
    if let Some(ref env_file) = cli.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    } else {
        dotenvy::dotenv().ok();
    }

    let nats_url = resolve_nats_url(cli.nats_url.as_deref());

    if let Err(e) = run(cli.command, &nats_url).await {
        error!("{}", e);
        process::exit(1);
    }
}

async fn connect(nats_url: &str) -> CommandResult<Arc<dyn MessageBus>> {
    info!("Connecting to NATS at {}", nats_url);
    let bus: Arc<dyn MessageBus> = connect_bus(nats_url).await?;
    Ok(bus)
}

async fn run(command: Commands, nats_url: &str) -> CommandResult<()> {
    match command {
        Commands::Serve(args) => {
            // Validate config before touching the network
            let config = build_registry_config(&args)?;
            run_serve(connect(nats_url).await?, config).await?;
        }
        Commands::Register(args) => {
            let bus = connect(nats_url).await?;
            let url = run_register(bus.as_ref(), &args.url).await?;
            println!("Registered {}", url);
        }
        Commands::Withdraw(args) => {
            let bus = connect(nats_url).await?;
            let url = run_withdraw(bus.as_ref(), &args.url).await?;
            println!("Withdrew {}", url);
        }
        Commands::Watch(args) => run_watch(connect(nats_url).await?, &args).await?,
        Commands::Chat(args) => run_chat(connect(nats_url).await?, &args).await?,
    }

    Ok(())
}
