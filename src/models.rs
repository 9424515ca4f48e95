//! Data models for the TCPB client.
//!
//! These are the client-side views of what travels in the protobuf
//! payloads. They use serde so the `tcpb` binary can print them as JSON.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TcpbError};
use crate::proto::{JobOutput, RunType};

/// Longest hostname accepted by [`Endpoint::new`].
pub const MAX_HOST_LEN: usize = 1024;

/// Address of a TCPB server. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Build an endpoint, rejecting empty or oversized hostnames and port 0.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        if host.trim().is_empty() || host.len() > MAX_HOST_LEN {
            return Err(TcpbError::InvalidValue {
                field: "host",
                value: host,
            });
        }
        if port == 0 {
            return Err(TcpbError::InvalidValue {
                field: "port",
                value: port.to_string(),
            });
        }
        Ok(Self { host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Server-side orbital files from a previous run, reused as the initial
/// guess for the next structurally identical job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrbitalGuess {
    /// Alpha (or restricted) coefficients.
    pub alpha: String,
    /// Beta coefficients; empty for restricted runs.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub beta: String,
}

/// Dipole moment as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dipole {
    pub vector: [f64; 3],
    pub magnitude: f64,
}

/// Energy of one CAS state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateEnergy {
    pub state: i32,
    pub multiplicity: i32,
    pub energy: f64,
}

/// Results of one job, valid until the next submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Ground-state (or first requested state) energy.
    pub energy: f64,
    /// Every requested CAS state, in server order. Empty for other runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub state_energies: Vec<StateEnergy>,
    /// One 3-vector per atom, gradient runs only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gradient: Option<Vec<[f64; 3]>>,
    /// Nonadiabatic coupling vector, coupling runs only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupling: Option<Vec<[f64; 3]>>,
    #[serde(default)]
    pub charges: Vec<f64>,
    #[serde(default)]
    pub spins: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dipole: Option<Dipole>,
    /// Atoms x atoms Meyer bond orders, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bond_order: Option<Vec<Vec<f64>>>,
    /// State x state CI vector overlaps, overlap runs only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_overlap: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub job_dir: String,
    #[serde(default)]
    pub server_job_id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orbitals: Option<OrbitalGuess>,
}

impl JobResult {
    /// Convert the decoded output of a `run` job on `num_atoms` atoms.
    ///
    /// # Errors
    ///
    /// Returns `TcpbError::Protocol` if the output has no energy, lacks the
    /// vector or matrix its run type produces, or carries an array whose
    /// shape does not fit the molecule.
    pub fn from_output(output: JobOutput, run: RunType, num_atoms: usize) -> Result<Self> {
        let energy = *output
            .energy
            .first()
            .ok_or_else(|| TcpbError::Protocol("Job output carries no energy".to_string()))?;

        let gradient = per_atom_vectors("gradient", &output.gradient, num_atoms)?;
        let coupling = per_atom_vectors("coupling", &output.nacme, num_atoms)?;
        let state_energies = state_energies(&output)?;
        let bond_order = square_matrix("bond order", &output.bond_order, num_atoms)?;
        let overlap_size = usize::try_from(output.ci_overlap_size).map_err(|_| {
            TcpbError::Protocol(format!(
                "Job output has negative CI overlap size {}",
                output.ci_overlap_size
            ))
        })?;
        let ci_overlap = square_matrix("CI overlap", &output.ci_overlaps, overlap_size)?;

        let required = match run {
            RunType::Energy => None,
            RunType::Gradient => gradient.is_none().then_some("gradient"),
            RunType::Coupling => coupling.is_none().then_some("coupling"),
            RunType::CiVecOverlap => ci_overlap.is_none().then_some("CI overlap"),
        };
        if let Some(missing) = required {
            return Err(TcpbError::Protocol(format!(
                "{} job output carries no {}",
                run, missing
            )));
        }

        let dipole = match output.dipoles.as_slice() {
            [x, y, z, magnitude, ..] => Some(Dipole {
                vector: [*x, *y, *z],
                magnitude: *magnitude,
            }),
            _ => None,
        };

        let orbitals = if output.orb1afile.is_empty() {
            None
        } else {
            Some(OrbitalGuess {
                alpha: output.orb1afile,
                beta: output.orb1bfile,
            })
        };

        Ok(Self {
            energy,
            state_energies,
            gradient,
            coupling,
            charges: output.charges,
            spins: output.spins,
            dipole,
            bond_order,
            ci_overlap,
            job_dir: output.job_dir,
            server_job_id: output.server_job_id,
            orbitals,
        })
    }

    /// Format energy for display.
    pub fn energy_display(&self) -> String {
        format!("{:.8} Ha", self.energy)
    }
}

/// Reshape a flat array into 3-vectors, `None` if the server sent nothing.
fn per_atom_vectors(
    name: &str,
    flat: &[f64],
    num_atoms: usize,
) -> Result<Option<Vec<[f64; 3]>>> {
    if flat.is_empty() {
        return Ok(None);
    }
    if flat.len() != 3 * num_atoms {
        return Err(TcpbError::Protocol(format!(
            "Job output {} has {} values, expected {} for {} atoms",
            name,
            flat.len(),
            3 * num_atoms,
            num_atoms
        )));
    }
    Ok(Some(
        flat.chunks_exact(3)
            .map(|xyz| [xyz[0], xyz[1], xyz[2]])
            .collect(),
    ))
}

/// Reshape a row-major `n x n` matrix, `None` if the server sent nothing.
fn square_matrix(name: &str, flat: &[f64], n: usize) -> Result<Option<Vec<Vec<f64>>>> {
    if flat.is_empty() {
        return Ok(None);
    }
    if n == 0 || flat.len() != n * n {
        return Err(TcpbError::Protocol(format!(
            "Job output {} has {} values, expected {}x{}",
            name,
            flat.len(),
            n,
            n
        )));
    }
    Ok(Some(flat.chunks_exact(n).map(<[f64]>::to_vec).collect()))
}

/// Pair the leading energies with their (state, multiplicity) labels.
fn state_energies(output: &JobOutput) -> Result<Vec<StateEnergy>> {
    let states = &output.cas_energy_states;
    let mults = &output.cas_energy_mults;
    if states.len() != mults.len() || output.energy.len() < states.len() {
        return Err(TcpbError::Protocol(format!(
            "Job output has {} CAS states, {} multiplicities and {} energies",
            states.len(),
            mults.len(),
            output.energy.len()
        )));
    }
    Ok(states
        .iter()
        .zip(mults)
        .zip(&output.energy)
        .map(|((&state, &multiplicity), &energy)| StateEnergy {
            state,
            multiplicity,
            energy,
        })
        .collect())
}
