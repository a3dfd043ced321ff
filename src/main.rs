use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result, miette};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use terminal_bridge::application::event_channel::EventChannel;
use terminal_bridge::application::terminal::Terminal;
use terminal_bridge::config::Config;
use terminal_bridge::domain::ports::ProviderError;
use terminal_bridge::domain::service::{ConnectionPolicy, ServiceOptions, ServicePhase};
use terminal_bridge::infrastructure::simulated::SimulatedSubsystem;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML config file. Defaults apply when omitted or missing.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Connection token handed to the reader when it asks for one
    #[arg(long, env = "TERMINAL_BRIDGE_TOKEN", default_value = "tok_simulated")]
    token: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover readers and print them
    Discover {
        #[arg(long)]
        location: Option<String>,
    },
    /// Take a card payment on a simulated reader
    Pay {
        /// Amount in minor units
        #[arg(long)]
        amount: i64,
        #[arg(long)]
        currency: Option<String>,
        /// Reader to use, instead of the first one discovered
        #[arg(long)]
        serial: Option<String>,
    },
    /// Run the connection service until it settles, printing each state
    Watch {
        #[arg(long, default_value = "auto")]
        policy: ConnectionPolicy,
    },
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string(value).into_diagnostic()?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path).into_diagnostic()?,
        None => Config::default(),
    };
    init_tracing(&config.logging.filter);

    let events = EventChannel::new();
    let simulator = SimulatedSubsystem::new(events.clone(), config.simulator.clone());
    let terminal = Terminal::new(Arc::new(simulator.clone()), events, config.bridge.clone());

    let token = cli.token;
    terminal
        .initialize(Arc::new(move || {
            let token = token.clone();
            async move { Ok::<_, ProviderError>(token) }
        }))
        .await
        .into_diagnostic()?;

    let default_location = config.simulator.location_id.clone();
    match cli.command {
        Commands::Discover { location } => {
            let location = location.unwrap_or(default_location);
            let readers = terminal
                .discover_readers(true, &location)
                .await
                .into_diagnostic()?;
            print_json(&readers)?;
        }
        Commands::Pay {
            amount,
            currency,
            serial,
        } => {
            let readers = terminal
                .discover_readers(true, &default_location)
                .await
                .into_diagnostic()?;
            let serial = serial
                .or_else(|| readers.first().map(|reader| reader.serial_number.clone()))
                .ok_or_else(|| miette!("no readers discovered"))?;
            terminal
                .connect_reader(&serial, &default_location)
                .await
                .into_diagnostic()?;

            let client_secret = "pi_cli_secret";
            simulator.register_intent(client_secret, amount, currency.as_deref());
            terminal
                .retrieve_payment_intent(client_secret)
                .await
                .into_diagnostic()?;
            terminal.collect_payment_method().await.into_diagnostic()?;
            let intent = terminal.process_payment().await.into_diagnostic()?;
            print_json(&intent)?;

            terminal.disconnect_reader().await.into_diagnostic()?;
        }
        Commands::Watch { policy } => {
            let options = ServiceOptions {
                location_id: default_location,
                simulated: true,
                ..config.service.options(policy)
            };
            let mut handle = terminal.start_service(options).into_diagnostic()?;
            print_json(&handle.current())?;

            if policy != ConnectionPolicy::Manual {
                while let Some(state) = handle.changed().await {
                    print_json(&state)?;
                    let settled = state.phase == ServicePhase::Failed
                        || (state.phase == ServicePhase::Connected && state.reader.is_some());
                    if settled {
                        break;
                    }
                }
            }

            terminal.stop_service().await.into_diagnostic()?;
            print_json(&handle.current())?;
        }
    }

    terminal.shutdown().await.into_diagnostic()?;
    Ok(())
}
