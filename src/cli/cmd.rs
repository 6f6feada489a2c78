use std::{
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use lxdlab::{
    controller::{
        Batch,
        platform::{DeployImages, Platform, TeardownOutcome},
    },
    driver::lxd::LxdDriver,
    machinery::registry::Registry,
};

#[derive(Parser)]
#[command(name = "lxdlab")]
#[command(about = "Deploys a small load-balanced server lab on LXD", long_about = None)]
pub struct Cli {
    /// Location of the registry store file
    #[arg(long = "store", default_value = ".lxdlab/registry.json")]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deploy the platform: two bridges, a load balancer, a client and servers
    Deploy(DeployArgs),

    /// Add servers to an already deployed platform
    Add(AddArgs),

    /// Start machines
    Start(TargetArgs),

    /// Stop machines
    Stop(TargetArgs),

    /// Pause machines
    Pause(TargetArgs),

    /// Delete server machines
    #[command(alias = "rm")]
    Remove(RemoveArgs),

    /// Tear the whole platform down
    Destroy(DestroyArgs),

    /// Show the registered machines and bridges
    State,
}

#[derive(Clone, Debug, Args)]
struct DeployArgs {
    /// Number of servers to create
    #[arg(default_value_t = 2)]
    servers: usize,

    /// Explicit names for the servers
    #[arg(long = "name")]
    names: Vec<String>,

    /// Image for every machine
    #[arg(long = "image")]
    image: Option<String>,
}

#[derive(Clone, Debug, Args)]
struct AddArgs {
    /// Number of servers to add
    #[arg(default_value_t = 1)]
    servers: usize,

    /// Explicit names for the new servers
    #[arg(long = "name")]
    names: Vec<String>,

    /// Image for the new servers
    #[arg(long = "image")]
    image: Option<String>,
}

#[derive(Clone, Debug, Args)]
struct TargetArgs {
    /// Names of the target machines
    #[arg(required = true)]
    names: Vec<String>,
}

#[derive(Clone, Debug, Args)]
struct RemoveArgs {
    /// Names of the servers to delete
    #[arg(required = true)]
    names: Vec<String>,

    /// Skip the confirmation prompt
    #[arg(long = "yes", short = 'y')]
    yes: bool,
}

#[derive(Clone, Debug, Args)]
struct DestroyArgs {
    /// Skip the confirmation prompt
    #[arg(long = "yes", short = 'y')]
    yes: bool,
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    let registry = Arc::new(Registry::new(&cli.store));
    let platform = Platform::new(registry, Arc::new(LxdDriver));

    match cli.command {
        Command::Deploy(args) => {
            let images = match args.image {
                Some(image) => DeployImages {
                    server: image.clone(),
                    load_balancer: image.clone(),
                    client: image,
                },
                None => DeployImages::default(),
            };
            let report = platform.deploy(args.servers, &args.names, images).await?;
            print_batch("created bridges", &report.bridges);
            print_batch("created machines", &report.machines);
        }
        Command::Add(args) => {
            let batch = platform
                .add_servers(args.servers, &args.names, args.image.as_deref())
                .await?;
            print_batch("created", &batch);
        }
        Command::Start(args) => {
            let batch = platform.start_machines(&args.names).await?;
            print_batch("started", &batch);
        }
        Command::Stop(args) => {
            let batch = platform.stop_machines(&args.names).await?;
            print_batch("stopped", &batch);
        }
        Command::Pause(args) => {
            let batch = platform.pause_machines(&args.names).await?;
            print_batch("paused", &batch);
        }
        Command::Remove(args) => {
            if !args.yes && !confirm(&format!("delete servers {:?}?", args.names))? {
                return Ok(());
            }
            let batch = platform.remove_machines(&args.names, true).await?;
            print_batch("deleted", &batch);
        }
        Command::Destroy(args) => {
            if !args.yes && !confirm("destroy the whole platform?")? {
                return Ok(());
            }
            match platform.destroy().await? {
                TeardownOutcome::Destroyed => println!("platform destroyed"),
                TeardownOutcome::PartiallyDestroyed => {
                    println!("platform destroyed only partially, check the state")
                }
            }
        }
        Command::State => {
            let (machines, bridges) = platform.state()?;
            println!("MACHINES");
            if machines.is_empty() {
                println!("  (none registered)");
            }
            for m in machines {
                let networks: Vec<String> = m
                    .networks
                    .iter()
                    .map(|(eth, ip)| format!("{}={}", eth, ip))
                    .collect();
                println!(
                    "  {:<8} {:<14} {:<10} {}",
                    m.name,
                    format!("{:?}", m.role),
                    m.state.as_str(),
                    networks.join(", ")
                );
            }
            println!("BRIDGES");
            if bridges.is_empty() {
                println!("  (none registered)");
            }
            for b in bridges {
                println!(
                    "  {:<8} {:<6} {:<16} used by: {}",
                    b.name,
                    b.ethernet,
                    b.subnet.cidr(),
                    b.used_by.join(", ")
                );
            }
        }
    }

    Ok(())
}

fn print_batch(verb: &str, batch: &Batch) {
    if !batch.succeeded.is_empty() {
        println!("{}: {}", verb, batch.succeeded.join(", "));
    }
    for (name, error) in &batch.failed {
        println!("failed '{}': {}", name, error);
    }
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} (y/n): ", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}
