//! `tcpb` - run single TeraChem jobs from the command line.
//!
//! Reads a job description from JSON, submits it to a TCPB server, waits for
//! it to finish, and prints the results as JSON on stdout.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use tcpb::config::ClientConfig;
use tcpb::logging::init_logging;
use tcpb::TcpbClient;

#[derive(Parser, Debug)]
#[command(version, about = "Client for TeraChem's TCPB protocol")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON config file (default: <config dir>/tcpb/config.json if present)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Server hostname
    #[arg(long, global = true)]
    host: Option<String>,

    /// Server port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Append a socket transcript to this file
    #[arg(long, global = true, value_name = "PATH")]
    transcript: Option<PathBuf>,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Report whether the server is idle.
    Status,
    /// Single-point energy.
    Energy(JobArgs),
    /// Energy and nuclear gradient.
    Gradient(JobArgs),
    /// Energy and forces (negated gradient).
    Forces(JobArgs),
    /// Nonadiabatic coupling vector.
    Coupling(JobArgs),
}

#[derive(Args, Debug)]
struct JobArgs {
    /// Job description (atoms, charge, spin_mult, closed, restricted, method, basis, geometry)
    #[arg(short, long, value_name = "PATH")]
    job: PathBuf,

    /// Geometry is in angstrom rather than bohr
    #[arg(long)]
    angstrom: bool,
}

/// On-disk job description.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JobFile {
    atoms: Vec<String>,
    charge: i32,
    spin_mult: i32,
    closed: bool,
    restricted: bool,
    method: String,
    basis: String,
    geometry: Vec<[f64; 3]>,
    #[serde(default)]
    user_options: BTreeMap<String, String>,
}

impl JobFile {
    fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid job file {}", path.display()))
    }

    fn apply(&self, client: &mut TcpbClient) -> Result<()> {
        let spec = client.job_spec_mut();
        spec.set_atoms(self.atoms.iter().cloned());
        spec.set_charge(self.charge);
        spec.set_spin_mult(self.spin_mult);
        spec.set_closed(self.closed);
        spec.set_restricted(self.restricted);
        spec.set_method(&self.method)?;
        spec.set_basis(&self.basis)?;
        for (key, value) in &self.user_options {
            spec.set_user_option(key, Some(value));
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ClientConfig::load(cli.config.as_deref())?;
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(transcript) = &cli.transcript {
        config.transcript = Some(transcript.clone());
    }
    config.validate()?;

    init_logging(cli.verbose, config.transcript.as_deref())?;
    debug!("Full CLI arguments parsed: {:?}", &cli);

    let mut client = TcpbClient::from_config(&config)?;
    client.connect()?;

    let output = match &cli.command {
        Commands::Status => {
            let available = client.is_available()?;
            json!({ "endpoint": client.endpoint(), "available": available })
        }
        Commands::Energy(args) => {
            let geometry = prepare(&mut client, args)?;
            let energy = client.compute_energy(&geometry, args.angstrom)?;
            json!({ "energy": energy })
        }
        Commands::Gradient(args) => {
            let geometry = prepare(&mut client, args)?;
            let (energy, gradient) = client.compute_gradient(&geometry, args.angstrom)?;
            json!({ "energy": energy, "gradient": gradient })
        }
        Commands::Forces(args) => {
            let geometry = prepare(&mut client, args)?;
            let (energy, forces) = client.compute_forces(&geometry, args.angstrom)?;
            json!({ "energy": energy, "forces": forces })
        }
        Commands::Coupling(args) => {
            let geometry = prepare(&mut client, args)?;
            let coupling = client.compute_coupling(&geometry, args.angstrom)?;
            json!({ "coupling": coupling })
        }
    };

    client.disconnect();
    println!("{}", serde_json::to_string_pretty(&output)?);
    info!("tcpb exited cleanly");
    Ok(())
}

/// Load the job file into the client's spec and return its geometry.
fn prepare(client: &mut TcpbClient, args: &JobArgs) -> Result<Vec<[f64; 3]>> {
    let job = JobFile::load(&args.job)?;
    job.apply(client)?;
    info!(atoms = job.atoms.len(), method = %job.method, basis = %job.basis, "Loaded job");
    Ok(job.geometry)
}
