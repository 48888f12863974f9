use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use csi_node_core::boot::NodeTimings;
use csi_node_core::config::{AuthType, CollectorEndpoint};
use csi_node_core::discovery::DISCOVERY_PORT;
use csi_node_core::provisioning::{PROVISIONING_AP_ADDRESS, PROVISIONING_PORT};
use csi_node_core::session::COMMAND_PORT;
use csi_node_emulator::collector::{self, CollectOptions, DEFAULT_COLLECTOR_PORT, DISCOVERY_LISTEN};
use csi_node_emulator::radio::RadioOptions;
use csi_node_emulator::{EmulatedNode, NodeOptions, net};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "csi-node")]
#[command(about = "CSI sensing node emulator and collector")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the emulated node.
    Run(RunArgs),
    /// Send a provisioning record to an unconfigured node.
    Provision(ProvisionArgs),
    /// Wait for a node announcement.
    Discover(DiscoverArgs),
    /// Command a session and capture its records as CSV.
    Collect(CollectArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, default_value = "csi-node.flash")]
    flash: PathBuf,
    /// The reset button reads as held while this file exists.
    #[arg(long = "reset-flag")]
    reset_flag: Option<PathBuf>,
    #[arg(long, default_value_t = Ipv4Addr::UNSPECIFIED)]
    interface: Ipv4Addr,
    #[arg(long = "provisioning-port", default_value_t = PROVISIONING_PORT)]
    provisioning_port: u16,
    #[arg(long = "command-port", default_value_t = COMMAND_PORT)]
    command_port: u16,
    #[arg(long = "discovery-target", default_value_t = SocketAddrV4::new(Ipv4Addr::BROADCAST, DISCOVERY_PORT))]
    discovery_target: SocketAddrV4,
    /// Run every interval this many times faster.
    #[arg(long = "time-scale", default_value_t = 1)]
    time_scale: u32,
    /// Association attempts that fail before one succeeds.
    #[arg(long = "failing-associations", default_value_t = 0)]
    failing_associations: u32,
    /// Address the simulated network hands out.
    #[arg(long, default_value_t = Ipv4Addr::LOCALHOST)]
    address: Ipv4Addr,
    /// Stop after this many boot cycles.
    #[arg(long)]
    cycles: Option<usize>,
}

#[derive(Debug, Args)]
struct ProvisionArgs {
    #[arg(long, value_parser = parse_auth)]
    auth: AuthType,
    #[arg(long)]
    ssid: String,
    /// Enterprise identity; ignored for other auth types.
    #[arg(long, default_value = "")]
    identity: String,
    #[arg(long, default_value = "")]
    password: String,
    #[arg(long = "server-ip")]
    server_ip: Ipv4Addr,
    #[arg(long = "server-port", default_value_t = DEFAULT_COLLECTOR_PORT)]
    server_port: u16,
    #[arg(long, default_value_t = SocketAddrV4::new(PROVISIONING_AP_ADDRESS, PROVISIONING_PORT))]
    node: SocketAddrV4,
}

#[derive(Debug, Args)]
struct DiscoverArgs {
    /// Seconds to listen before giving up.
    #[arg(long, default_value_t = DISCOVERY_LISTEN.as_secs())]
    timeout: u64,
    #[arg(long, default_value_t = DISCOVERY_PORT)]
    port: u16,
}

#[derive(Debug, Args)]
struct CollectArgs {
    /// Node address. Discovered when omitted.
    #[arg(long)]
    node: Option<Ipv4Addr>,
    #[arg(long = "command-port", default_value_t = COMMAND_PORT)]
    command_port: u16,
    /// Acquisition length requested from the node, in seconds.
    #[arg(long, default_value_t = 30)]
    duration: u32,
    /// Local port records arrive on.
    #[arg(long, default_value_t = DEFAULT_COLLECTOR_PORT)]
    port: u16,
    /// CSV destination; stdout when omitted.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Seconds without a record after which collection stops.
    #[arg(long = "idle-timeout", default_value_t = 2)]
    idle_timeout: u64,
    /// Label written into the scenario column of every row.
    #[arg(long, default_value = "", value_parser = parse_scenario)]
    scenario: String,
}

fn parse_auth(tag: &str) -> Result<AuthType, String> {
    AuthType::from_tag(tag).ok_or_else(|| format!("unknown auth type `{tag}` (open, wpa2psk, peap)"))
}

fn parse_scenario(label: &str) -> Result<String, String> {
    collector::validate_scenario(label).map(|()| label.to_owned())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run(args) => run_node(args),
        Commands::Provision(args) => {
            let payload = collector::provisioning_payload(
                args.auth,
                &args.ssid,
                &args.identity,
                &args.password,
                CollectorEndpoint::new(args.server_ip, args.server_port),
            );
            collector::provision(args.node, &payload).context("provisioning failed")
        }
        Commands::Discover(args) => {
            let listen = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, args.port);
            match collector::discover(listen, Duration::from_secs(args.timeout))? {
                Some(address) => println!("{address}"),
                None => anyhow::bail!("no node announced within {}s", args.timeout),
            }
            Ok(())
        }
        Commands::Collect(args) => collect(args),
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

fn run_node(args: RunArgs) -> Result<()> {
    let options = NodeOptions {
        reset_flag: args.reset_flag,
        interface: args.interface,
        provisioning_port: args.provisioning_port,
        command_port: args.command_port,
        discovery_target: args.discovery_target,
        timings: NodeTimings::default().compressed(args.time_scale),
        radio: RadioOptions {
            failing_associations: args.failing_associations,
            address: args.address,
            ..RadioOptions::default()
        },
        ..NodeOptions::new(args.flash)
    };
    let outcome = EmulatedNode::new(options)
        .run(args.cycles)
        .context("node stopped")?;
    tracing::info!(?outcome, "emulator exiting");
    Ok(())
}

fn collect(args: CollectArgs) -> Result<()> {
    let address = match args.node {
        Some(address) => address,
        None => {
            let listen = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT);
            collector::discover(listen, DISCOVERY_LISTEN)?.context("no node announced")?
        }
    };
    let node = SocketAddr::V4(SocketAddrV4::new(address, args.command_port));

    let socket = net::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, args.port))?;
    let options = CollectOptions {
        scenario: args.scenario,
        idle_timeout: Duration::from_secs(args.idle_timeout),
        ..CollectOptions::new(args.duration)
    };

    let mut out: Box<dyn Write> = match args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(&path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(io::stdout().lock()),
    };
    let summary = collector::collect(&socket, node, &options, &mut out)?;
    out.flush().context("failed to flush records")?;
    tracing::info!(
        records = summary.records,
        first = ?summary.first_seq,
        last = ?summary.last_seq,
        "capture complete"
    );
    Ok(())
}
