//! One-call energy, gradient, force, coupling and CI overlap calculations.

use tracing::debug;

use super::TcpbClient;
use crate::error::{Result, TcpbError};
use crate::models::JobResult;
use crate::proto::{RunType, UnitType};

/// Second point of a CI vector overlap job, plus the files describing both.
///
/// Overlaps are closed-shell only, so only alpha orbitals are carried.
#[derive(Debug, Clone, PartialEq)]
pub struct CiOverlap {
    pub geometry2: Vec<[f64; 3]>,
    /// CI vectors at the first and second geometry.
    pub cvec1file: String,
    pub cvec2file: String,
    /// Alpha orbitals at the first and second geometry.
    pub orb1afile: String,
    pub orb2afile: String,
}

impl TcpbClient {
    /// Single-point energy in hartree.
    pub fn compute_energy(&mut self, geometry: &[[f64; 3]], angstrom: bool) -> Result<f64> {
        let result = self.run_sync(RunType::Energy, geometry, angstrom)?;
        Ok(result.energy)
    }

    /// Energy and nuclear gradient, one 3-vector per atom.
    pub fn compute_gradient(
        &mut self,
        geometry: &[[f64; 3]],
        angstrom: bool,
    ) -> Result<(f64, Vec<[f64; 3]>)> {
        let result = self.run_sync(RunType::Gradient, geometry, angstrom)?;
        let gradient = result
            .gradient
            .ok_or_else(|| missing_output(RunType::Gradient))?;
        Ok((result.energy, gradient))
    }

    /// Energy and forces, the negated gradient.
    pub fn compute_forces(
        &mut self,
        geometry: &[[f64; 3]],
        angstrom: bool,
    ) -> Result<(f64, Vec<[f64; 3]>)> {
        let (energy, gradient) = self.compute_gradient(geometry, angstrom)?;
        let forces = gradient
            .into_iter()
            .map(|[x, y, z]| [-x, -y, -z])
            .collect();
        Ok((energy, forces))
    }

    /// Nonadiabatic coupling vector, one 3-vector per atom.
    pub fn compute_coupling(
        &mut self,
        geometry: &[[f64; 3]],
        angstrom: bool,
    ) -> Result<Vec<[f64; 3]>> {
        let result = self.run_sync(RunType::Coupling, geometry, angstrom)?;
        result
            .coupling
            .ok_or_else(|| missing_output(RunType::Coupling))
    }

    /// State-by-state overlap of two CI vectors taken at `geometry` and
    /// `overlap.geometry2`, using the current atoms, charge and multiplicity.
    ///
    /// The stored orbital guess is discarded first.
    ///
    /// # Errors
    ///
    /// `InvalidValue` for open-shell systems, a second geometry that does not
    /// match the atoms, or an empty file path. Nothing is sent in that case.
    pub fn compute_ci_overlap(
        &mut self,
        geometry: &[[f64; 3]],
        overlap: &CiOverlap,
        angstrom: bool,
    ) -> Result<Vec<Vec<f64>>> {
        self.ensure_idle("submit a job")?;
        self.spec.ensure_ready()?;
        if !self.spec.closed() {
            return Err(TcpbError::InvalidValue {
                field: "closed",
                value: "open-shell CI overlaps are not supported".to_string(),
            });
        }
        if overlap.geometry2.len() != self.spec.num_atoms() {
            return Err(TcpbError::InvalidValue {
                field: "geometry2",
                value: format!(
                    "{} points for {} atoms",
                    overlap.geometry2.len(),
                    self.spec.num_atoms()
                ),
            });
        }
        let files = [
            ("cvec1file", &overlap.cvec1file),
            ("cvec2file", &overlap.cvec2file),
            ("orb1afile", &overlap.orb1afile),
            ("orb2afile", &overlap.orb2afile),
        ];
        if let Some((field, _)) = files.iter().find(|(_, path)| path.is_empty()) {
            return Err(TcpbError::InvalidValue {
                field: *field,
                value: String::new(),
            });
        }

        self.spec.clear_orbitals();
        let units = UnitType::from_angstrom_flag(angstrom);
        let mut input = self.spec.to_job_input(RunType::CiVecOverlap, geometry, units)?;
        input.xyz2 = overlap.geometry2.iter().flatten().copied().collect();
        input.cvec1file = overlap.cvec1file.clone();
        input.cvec2file = overlap.cvec2file.clone();
        input.orb1afile = overlap.orb1afile.clone();
        input.orb2afile = overlap.orb2afile.clone();
        debug!(cvec1 = %overlap.cvec1file, cvec2 = %overlap.cvec2file, "Submitting CI overlap");

        let result = self.run_job(&input, geometry.len())?;
        result
            .ci_overlap
            .ok_or_else(|| missing_output(RunType::CiVecOverlap))
    }

    fn run_sync(
        &mut self,
        run: RunType,
        geometry: &[[f64; 3]],
        angstrom: bool,
    ) -> Result<JobResult> {
        self.compute_job_sync(run, geometry, UnitType::from_angstrom_flag(angstrom))
    }
}

fn missing_output(run: RunType) -> TcpbError {
    TcpbError::Protocol(format!("{} job output is missing its result", run))
}
