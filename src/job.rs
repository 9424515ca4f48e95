//! Job specification with explicit "is set" tracking.
//!
//! Protobuf defaults are indistinguishable from real values (a charge of 0
//! is both valid and the default), so every required field carries its own
//! presence flag. A job may only be submitted once all seven are set.
//!
//! Changing the molecular structure (atoms, charge, multiplicity, shell or
//! restriction type) drops any stored orbital guess. Method and basis
//! changes keep it. Optional extras (bond orders, CAS state labels) never
//! touch the presence flags.

use std::fmt;

use tracing::debug;

use crate::error::{Result, TcpbError};
use crate::models::OrbitalGuess;
use crate::proto::{self, JobInput, Method, Mol, RunType, UnitType};

/// Fields that must be set before a job can be submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequiredField {
    Atoms,
    Charge,
    SpinMult,
    Closed,
    Restricted,
    Method,
    Basis,
}

impl RequiredField {
    pub const ALL: [RequiredField; 7] = [
        RequiredField::Atoms,
        RequiredField::Charge,
        RequiredField::SpinMult,
        RequiredField::Closed,
        RequiredField::Restricted,
        RequiredField::Method,
        RequiredField::Basis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequiredField::Atoms => "atoms",
            RequiredField::Charge => "charge",
            RequiredField::SpinMult => "spin multiplicity",
            RequiredField::Closed => "closed",
            RequiredField::Restricted => "restricted",
            RequiredField::Method => "method",
            RequiredField::Basis => "basis",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-populated job state that persists across jobs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobSpec {
    atoms: Vec<String>,
    charge: i32,
    spin_mult: i32,
    closed: bool,
    restricted: bool,
    method: Option<Method>,
    basis: String,
    orbitals: Option<OrbitalGuess>,
    user_options: Vec<(String, String)>,
    return_bond_order: bool,
    /// (state, multiplicity) pairs whose CAS energies should be reported.
    cas_energy_labels: Vec<(i32, i32)>,
    /// Presence bits, one per `RequiredField`.
    set: u8,
}

impl JobSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_atoms<I, S>(&mut self, atoms: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.atoms = atoms.into_iter().map(Into::into).collect();
        self.mark_structural(RequiredField::Atoms);
    }

    pub fn set_charge(&mut self, charge: i32) {
        self.charge = charge;
        self.mark_structural(RequiredField::Charge);
    }

    pub fn set_spin_mult(&mut self, spin_mult: i32) {
        self.spin_mult = spin_mult;
        self.mark_structural(RequiredField::SpinMult);
    }

    pub fn set_closed(&mut self, closed: bool) {
        self.closed = closed;
        self.mark_structural(RequiredField::Closed);
    }

    pub fn set_restricted(&mut self, restricted: bool) {
        self.restricted = restricted;
        self.mark_structural(RequiredField::Restricted);
    }

    /// Set the method by name, case-insensitively.
    ///
    /// # Errors
    ///
    /// `TcpbError::InvalidValue` if the name is not in the server vocabulary;
    /// the `JobSpec` is left unchanged.
    pub fn set_method(&mut self, method: &str) -> Result<()> {
        self.method = Some(method.parse()?);
        self.set |= RequiredField::Method.bit();
        Ok(())
    }

    /// Set the basis set by name, case-insensitively.
    ///
    /// # Errors
    ///
    /// `TcpbError::InvalidValue` if the basis is unknown; the `JobSpec` is left
    /// unchanged.
    pub fn set_basis(&mut self, basis: &str) -> Result<()> {
        let canonical = proto::canonical_basis(basis).ok_or_else(|| TcpbError::InvalidValue {
            field: "basis",
            value: basis.to_string(),
        })?;
        self.basis = canonical.to_string();
        self.set |= RequiredField::Basis.bit();
        Ok(())
    }

    /// Add, replace, or (with `None`) remove a free-form server keyword.
    pub fn set_user_option(&mut self, key: &str, value: Option<&str>) {
        let existing = self.user_options.iter().position(|(k, _)| k == key);
        match (existing, value) {
            (Some(index), Some(value)) => self.user_options[index].1 = value.to_string(),
            (Some(index), None) => {
                self.user_options.remove(index);
            }
            (None, Some(value)) => self
                .user_options
                .push((key.to_string(), value.to_string())),
            (None, None) => {}
        }
    }

    /// Ask the server for the Meyer bond order matrix on every job.
    pub fn set_bond_order(&mut self, enabled: bool) {
        self.return_bond_order = enabled;
    }

    /// Replace the CAS states reported in the result, as (state, multiplicity).
    pub fn set_cas_energy_labels<I>(&mut self, labels: I)
    where
        I: IntoIterator<Item = (i32, i32)>,
    {
        self.cas_energy_labels = labels.into_iter().collect();
    }

    /// Store orbitals returned by the server as the next initial guess.
    pub fn set_orbitals(&mut self, orbitals: Option<OrbitalGuess>) {
        self.orbitals = orbitals;
    }

    pub fn clear_orbitals(&mut self) {
        if self.orbitals.take().is_some() {
            debug!("Cleared stored orbital guess");
        }
    }

    pub fn atoms(&self) -> &[String] {
        &self.atoms
    }

    pub fn num_atoms(&self) -> usize {
        self.atoms.len()
    }

    pub fn charge(&self) -> i32 {
        self.charge
    }

    pub fn spin_mult(&self) -> i32 {
        self.spin_mult
    }

    pub fn closed(&self) -> bool {
        self.closed
    }

    pub fn restricted(&self) -> bool {
        self.restricted
    }

    pub fn method(&self) -> Option<Method> {
        self.method
    }

    pub fn basis(&self) -> &str {
        &self.basis
    }

    pub fn orbitals(&self) -> Option<&OrbitalGuess> {
        self.orbitals.as_ref()
    }

    pub fn user_options(&self) -> &[(String, String)] {
        &self.user_options
    }

    pub fn bond_order(&self) -> bool {
        self.return_bond_order
    }

    pub fn cas_energy_labels(&self) -> &[(i32, i32)] {
        &self.cas_energy_labels
    }

    pub fn is_set(&self, field: RequiredField) -> bool {
        self.set & field.bit() != 0
    }

    /// Required fields that have not been set yet.
    pub fn missing_fields(&self) -> Vec<RequiredField> {
        RequiredField::ALL
            .into_iter()
            .filter(|field| !self.is_set(*field))
            .collect()
    }

    pub fn is_ready(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Fail with `TcpbError::Precondition` unless every field is set.
    pub fn ensure_ready(&self) -> Result<()> {
        let missing = self.missing_fields();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(TcpbError::Precondition { missing })
        }
    }

    /// Assemble the JOBINPUT payload for one job.
    ///
    /// # Errors
    ///
    /// `Precondition` if a required field is missing, `InvalidValue` if the
    /// geometry does not hold exactly one point per atom.
    pub fn to_job_input(
        &self,
        run: RunType,
        geometry: &[[f64; 3]],
        units: UnitType,
    ) -> Result<JobInput> {
        self.ensure_ready()?;
        if geometry.len() != self.atoms.len() {
            return Err(TcpbError::InvalidValue {
                field: "geometry",
                value: format!(
                    "{} points for {} atoms",
                    geometry.len(),
                    self.atoms.len()
                ),
            });
        }

        let mut mol = Mol {
            atoms: self.atoms.clone(),
            xyz: geometry.iter().flatten().copied().collect(),
            charge: self.charge,
            multiplicity: self.spin_mult,
            closed: self.closed,
            restricted: self.restricted,
            ..Default::default()
        };
        mol.set_units(units);

        let mut input = JobInput {
            mol: Some(mol),
            basis: self.basis.clone(),
            user_options: self
                .user_options
                .iter()
                .flat_map(|(key, value)| [key.clone(), value.clone()])
                .collect(),
            return_bond_order: self.return_bond_order,
            cas_energy_states: self.cas_energy_labels.iter().map(|(s, _)| *s).collect(),
            cas_energy_mults: self.cas_energy_labels.iter().map(|(_, m)| *m).collect(),
            ..Default::default()
        };
        input.set_run(run);
        if let Some(method) = self.method {
            input.set_method(method);
        }
        if let Some(orbitals) = &self.orbitals {
            input.orb1afile = orbitals.alpha.clone();
            input.orb1bfile = orbitals.beta.clone();
        }
        Ok(input)
    }

    fn mark_structural(&mut self, field: RequiredField) {
        self.set |= field.bit();
        self.clear_orbitals();
    }
}
