//! hopmesh Command-Line Interface
//!
//! This CLI provides tools for:
//! - Simulating multi-hop meshes with route discovery and repair
//! - Parsing and generating node addresses
//! - Validating node configuration files
//! - Showing the frame layout and tunable ranges

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hopmesh_core::mesh::config::{
    FORWARD_JITTER_RANGE, MAX_ATTEMPTS_RANGE, ROUTE_WAIT_RANGE, SEND_INTERVAL_RANGE,
    SEND_RESULT_TIMEOUT_RANGE,
};
use hopmesh_core::mesh::{
    MeshConfig, MeshSimulator, MessageType, NetworkName, NodeAddress, SimConfig, SimEvent,
    Topology, FRAME_SIZE, NETWORK_NAME_CAPACITY, PAYLOAD_CAPACITY,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "hopmesh")]
#[command(author, version, about = "Self-healing mesh routing simulator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a multi-node mesh simulation
    Simulate {
        /// Number of nodes
        #[arg(short, long, default_value = "6")]
        nodes: usize,

        /// Link topology
        #[arg(short, long, value_enum, default_value = "line")]
        topology: TopologyArg,

        /// Nodes per row for the grid topology
        #[arg(long, default_value = "3")]
        width: usize,

        /// Number of application messages to send
        #[arg(short, long, default_value = "20")]
        messages: usize,

        /// Share of messages sent as broadcasts (0.0 - 1.0)
        #[arg(long, default_value = "0.2")]
        broadcast_ratio: f64,

        /// Share of unicasts that request confirmation (0.0 - 1.0)
        #[arg(long, default_value = "0.5")]
        confirm_ratio: f64,

        /// Per-reception loss probability (0.0 - 1.0)
        #[arg(long, default_value = "0.0")]
        loss: f64,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Simulation steps between two messages
        #[arg(long, default_value = "40")]
        interval: u64,

        /// Simulated milliseconds per step
        #[arg(long, default_value = "5")]
        step_ms: u64,

        /// Maximum steps to let traffic settle after the last message
        #[arg(long, default_value = "2000")]
        drain_steps: u64,

        /// Node configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Send attempts per hop (overrides the config file)
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Minimum interval between transmissions in ms
        #[arg(long)]
        send_interval: Option<u32>,

        /// Route discovery wait in ms
        #[arg(long)]
        route_wait: Option<u32>,

        /// Network name shared by every node
        #[arg(long)]
        network: Option<String>,

        /// Keep sending until Ctrl+C
        #[arg(long)]
        soak: bool,

        /// Print every application event
        #[arg(long)]
        events: bool,
    },

    /// Node address utilities
    Address {
        #[command(subcommand)]
        command: AddressCommand,
    },

    /// Node configuration utilities
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Show frame layout, message types and tunable ranges
    Info,
}

#[derive(Subcommand)]
enum AddressCommand {
    /// Parse and normalize an address
    Parse {
        /// Address text, e.g. 24:0a:c4:12:34:56
        address: String,
    },

    /// Generate random locally administered addresses
    Random {
        /// How many addresses
        #[arg(short, long, default_value = "1")]
        count: usize,

        /// Random seed (entropy if omitted)
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Validate a JSON configuration file
    Check {
        /// Configuration file
        path: PathBuf,
    },

    /// Print the default configuration as JSON
    Default,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TopologyArg {
    Line,
    Ring,
    Star,
    Grid,
    Full,
}

impl TopologyArg {
    fn to_topology(self, width: usize) -> Topology {
        match self {
            TopologyArg::Line => Topology::Line,
            TopologyArg::Ring => Topology::Ring,
            TopologyArg::Star => Topology::Star,
            TopologyArg::Grid => Topology::Grid { width },
            TopologyArg::Full => Topology::FullMesh,
        }
    }
}

/// Options for `simulate`
struct SimulateArgs {
    nodes: usize,
    topology: Topology,
    messages: usize,
    broadcast_ratio: f64,
    confirm_ratio: f64,
    loss: f64,
    seed: u64,
    interval: u64,
    step_ms: u64,
    drain_steps: u64,
    mesh: MeshConfig,
    soak: bool,
    events: bool,
}

fn build_mesh_config(
    config: Option<PathBuf>,
    max_attempts: Option<u32>,
    send_interval: Option<u32>,
    route_wait: Option<u32>,
    network: Option<String>,
) -> Result<MeshConfig> {
    let mut mesh = match config {
        Some(path) => MeshConfig::from_file(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => MeshConfig::default(),
    };
    if let Some(attempts) = max_attempts {
        mesh.max_attempts = attempts;
    }
    if let Some(ms) = send_interval {
        mesh.min_send_interval_ms = ms;
    }
    if let Some(ms) = route_wait {
        mesh.route_wait_timeout_ms = ms;
    }
    if let Some(name) = network {
        mesh.network_name = NetworkName::new(&name).context("Invalid network name")?;
    }
    mesh.validate().context("Invalid node configuration")?;
    Ok(mesh)
}

fn cmd_simulate(args: SimulateArgs) -> Result<()> {
    if args.nodes < 2 {
        anyhow::bail!("Need at least 2 nodes, got {}", args.nodes);
    }
    let broadcast_ratio = args.broadcast_ratio.clamp(0.0, 1.0);
    let confirm_ratio = args.confirm_ratio.clamp(0.0, 1.0);

    println!("=== Mesh Network Simulation ===");
    println!();
    println!("Nodes:        {}", args.nodes);
    println!("Topology:     {}", args.topology);
    if args.soak {
        println!("Messages:     until Ctrl+C");
    } else {
        println!("Messages:     {}", args.messages);
    }
    println!("Loss rate:    {:.1}%", args.loss * 100.0);
    println!("Seed:         {}", args.seed);
    println!(
        "Tunables:     {} attempts, {} ms interval, {} ms route wait",
        args.mesh.max_attempts, args.mesh.min_send_interval_ms, args.mesh.route_wait_timeout_ms
    );
    println!();

    let config = SimConfig::default()
        .with_node_count(args.nodes)
        .with_topology(args.topology)
        .with_step_ms(args.step_ms)
        .with_loss_rate(args.loss)
        .with_seed(args.seed)
        .with_mesh_config(args.mesh);
    let mut sim = MeshSimulator::new(config).context("Failed to create simulator")?;

    println!("Created {} nodes:", sim.node_count());
    for idx in 0..sim.node_count() {
        if let Some(address) = sim.address(idx) {
            let neighbours: Vec<String> =
                sim.neighbours(idx).iter().map(|n| n.to_string()).collect();
            println!("  {:2}: {}  links: {}", idx, address, neighbours.join(", "));
        }
    }
    println!();

    let running = Arc::new(AtomicBool::new(true));
    if args.soak {
        let r = running.clone();
        ctrlc::set_handler(move || {
            r.store(false, Ordering::SeqCst);
        })
        .context("Failed to set Ctrl+C handler")?;
        println!("Soaking... (Press Ctrl+C to stop)");
    } else {
        println!("Simulating message exchange...");
    }

    // separate stream so traffic does not depend on the medium's loss draws
    let mut rng = StdRng::seed_from_u64(args.seed ^ 0x5EED);
    let mut sent = 0usize;
    while running.load(Ordering::SeqCst) && (args.soak || sent < args.messages) {
        let from = rng.gen_range(0..args.nodes);
        let text = format!("msg {}", sent);

        let result = if rng.gen_bool(broadcast_ratio) {
            sim.send_broadcast(from, text.as_bytes())
        } else {
            let mut to = rng.gen_range(0..args.nodes - 1);
            if to >= from {
                to += 1;
            }
            let confirm = rng.gen_bool(confirm_ratio);
            sim.send_unicast(from, to, text.as_bytes(), confirm)
        };
        if let Err(e) = result {
            warn!("Node {} could not send '{}': {}", from, text, e);
        }
        sent += 1;

        sim.run(args.interval);
        if args.soak && sent % 100 == 0 {
            info!("{} messages sent, {} steps", sent, sim.stats().steps);
        }
    }

    let settled = sim.run_until(args.drain_steps, |s| s.is_quiet());
    if !settled {
        warn!("Traffic still queued after {} drain steps", args.drain_steps);
    }

    if args.events {
        println!();
        println!("=== Events ===");
        for event in sim.events() {
            print_event(&sim, event);
        }
    }

    println!();
    println!("{}", sim.stats());
    Ok(())
}

fn print_event(sim: &MeshSimulator, event: &SimEvent) {
    let label = |address: &NodeAddress| match sim.index_of(*address) {
        Some(idx) => format!("node {}", idx),
        None if address.is_broadcast() => "broadcast".to_string(),
        None => address.to_string(),
    };
    match event {
        SimEvent::BroadcastDelivered {
            node_idx,
            from,
            payload,
        } => println!("  node {:2} <- broadcast from {}: '{}'", node_idx, label(from), payload),
        SimEvent::UnicastDelivered {
            node_idx,
            from,
            payload,
        } => println!("  node {:2} <- unicast from {}: '{}'", node_idx, label(from), payload),
        SimEvent::ConfirmReceived {
            node_idx,
            target,
            success,
        } => println!(
            "  node {:2} confirm {}: {}",
            node_idx,
            label(target),
            if *success { "delivered" } else { "FAILED" }
        ),
    }
}

fn cmd_address_parse(address: String) -> Result<()> {
    let parsed: NodeAddress = address
        .parse()
        .with_context(|| format!("Invalid address '{}'", address))?;

    println!("=== Node Address ===");
    println!("Address:   {}", parsed);
    println!("Compact:   {}", parsed.to_text());
    let bytes = parsed.as_bytes();
    let kind = if parsed.is_broadcast() {
        "broadcast"
    } else if bytes[0] & 0x01 != 0 {
        "multicast"
    } else {
        "unicast"
    };
    println!("Type:      {}", kind);
    println!(
        "Scope:     {}",
        if bytes[0] & 0x02 != 0 {
            "locally administered"
        } else {
            "globally unique"
        }
    );
    Ok(())
}

fn cmd_address_random(count: usize, seed: Option<u64>) -> Result<()> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    for _ in 0..count {
        println!("{}", NodeAddress::random(&mut rng));
    }
    Ok(())
}

fn cmd_config_check(path: PathBuf) -> Result<()> {
    let config = MeshConfig::from_file(&path)
        .with_context(|| format!("Invalid configuration {}", path.display()))?;
    println!("{}: OK", path.display());
    println!("{}", config.to_json_string()?);
    Ok(())
}

fn cmd_config_default() -> Result<()> {
    println!("{}", MeshConfig::default().to_json_string()?);
    Ok(())
}

fn cmd_info() -> Result<()> {
    println!("=== Frame Layout ({} bytes, little-endian) ===", FRAME_SIZE);
    println!("  offset  size  field");
    println!("       0     1  message type");
    println!("       1     1  reserved");
    println!("       2     2  message id");
    println!("       4    {}  network name (NUL-terminated, max {})", NETWORK_NAME_CAPACITY + 1, NETWORK_NAME_CAPACITY);
    println!("      24     6  target address");
    println!("      30     6  sender address");
    println!("      36   {}  payload (NUL-terminated, max {})", PAYLOAD_CAPACITY + 1, PAYLOAD_CAPACITY);
    println!();
    println!("=== Message Types ===");
    for byte in 1..=6u8 {
        if let Some(message_type) = MessageType::from_byte(byte) {
            let routing = if message_type.is_flooded() {
                "flooded"
            } else {
                "routed"
            };
            println!("  {}  {:<28} {}", byte, message_type.to_string(), routing);
        }
    }
    println!();
    println!("=== Tunables ===");
    let defaults = MeshConfig::default();
    let ranges = [
        ("max_attempts", &MAX_ATTEMPTS_RANGE, defaults.max_attempts),
        ("min_send_interval_ms", &SEND_INTERVAL_RANGE, defaults.min_send_interval_ms),
        ("route_wait_timeout_ms", &ROUTE_WAIT_RANGE, defaults.route_wait_timeout_ms),
        ("send_result_timeout_ms", &SEND_RESULT_TIMEOUT_RANGE, defaults.send_result_timeout_ms),
        ("forward_jitter_ms", &FORWARD_JITTER_RANGE, defaults.forward_jitter_ms),
    ];
    for (name, range, default) in ranges {
        println!(
            "  {:<24} {:>5} - {:<6} (default {})",
            name,
            range.start(),
            range.end(),
            default
        );
    }
    println!();
    println!("Examples:");
    println!("  hopmesh simulate --nodes 8 --topology ring --messages 50");
    println!("  hopmesh simulate --topology grid --width 4 --nodes 16 --loss 0.1");
    println!("  hopmesh simulate --config node.json --soak");
    println!("  hopmesh address parse 24:0a:c4:12:34:56");
    println!("  hopmesh config default > node.json");

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Simulate {
            nodes,
            topology,
            width,
            messages,
            broadcast_ratio,
            confirm_ratio,
            loss,
            seed,
            interval,
            step_ms,
            drain_steps,
            config,
            max_attempts,
            send_interval,
            route_wait,
            network,
            soak,
            events,
        } => {
            let mesh = build_mesh_config(config, max_attempts, send_interval, route_wait, network)?;
            cmd_simulate(SimulateArgs {
                nodes,
                topology: topology.to_topology(width),
                messages,
                broadcast_ratio,
                confirm_ratio,
                loss,
                seed,
                interval,
                step_ms,
                drain_steps,
                mesh,
                soak,
                events,
            })
        }

        Commands::Address { command } => match command {
            AddressCommand::Parse { address } => cmd_address_parse(address),
            AddressCommand::Random { count, seed } => cmd_address_random(count, seed),
        },

        Commands::Config { command } => match command {
            ConfigCommand::Check { path } => cmd_config_check(path),
            ConfigCommand::Default => cmd_config_default(),
        },

        Commands::Info => cmd_info(),
    }
}
