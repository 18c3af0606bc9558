use clap::Parser;

use quorumd::config::Config;
use quorumd::shell::Console;

#[derive(Parser, Debug)]
#[command(name = "quorumd")]
#[command(about = "Quorum-based peer coordination daemon", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "quorumd.toml")]
    config: String,

    /// Override the node IP from the config file.
    #[arg(long)]
    ip: Option<String>,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Print hostname at startup BEFORE any logging
    if let Ok(hostname) = hostname::get() {
        if let Ok(hostname_str) = hostname.into_string() {
            let short_name = hostname_str.split('.').next().unwrap_or(&hostname_str);
            eprintln!("🖥️  NODE: {short_name}");
        }
    }

    if args.generate_config {
        let config = Config::default();
        match config.save_to_file(&args.config) {
            Ok(_) => {
                println!("✅ Generated default config at: {}", args.config);
                return;
            }
            Err(e) => {
                eprintln!("❌ Failed to generate config: {e}");
                std::process::exit(1);
            }
        }
    }

    let mut config = match Config::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config: {e}");
            std::process::exit(1);
        }
    };
    if let Some(ip) = args.ip {
        config.node.ip = ip;
    }

    setup_logging(&config.logging, args.verbose);

    let version = env!("CARGO_PKG_VERSION");
    println!("🚀 quorumd v{version}");
    println!("  └─ node ip: {}", config.node.ip);
    println!("  └─ membership: {:?}", config.node.server_list);
    match config.node.resolve_port() {
        Ok(port) => println!("  └─ port: {port}"),
        Err(e) => {
            eprintln!("❌ {e}");
            std::process::exit(1);
        }
    }
    println!();

    Console::new(config).run().await;
}

fn setup_logging(config: &quorumd::config::LoggingConfig, verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if verbose { "trace" } else { &config.level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match config.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_thread_ids(false)
                .init();
        }
        _ => {
            fmt().with_env_filter(filter).init();
        }
    }
}
