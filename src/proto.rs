//! Protocol-buffer messages exchanged with a TeraChem server.
//!
//! These mirror `terachem_server.proto`. They are declared with prost's
//! derive macros so no `protoc` step is needed at build time.
//!
//! Every message on the wire is prefixed by an 8-byte frame header (see
//! [`crate::ipc::FrameHeader`]) whose first word is a [`MessageType`] code.

use std::fmt;
use std::str::FromStr;

use crate::error::TcpbError;

/// Frame header message-type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    Status = 0,
    Mol = 1,
    JobInput = 2,
    JobOutput = 3,
}

impl MessageType {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(MessageType::Status),
            1 => Some(MessageType::Mol),
            2 => Some(MessageType::JobInput),
            3 => Some(MessageType::JobOutput),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Status => "STATUS",
            MessageType::Mol => "MOL",
            MessageType::JobInput => "JOBINPUT",
            MessageType::JobOutput => "JOBOUTPUT",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server status reply. An empty STATUS frame is the request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Status {
    #[prost(bool, tag = "1")]
    pub busy: bool,
    #[prost(oneof = "status::JobStatus", tags = "2, 3, 4")]
    pub job_status: Option<status::JobStatus>,
}

pub mod status {
    #[derive(Clone, Copy, PartialEq, ::prost::Oneof)]
    pub enum JobStatus {
        #[prost(bool, tag = "2")]
        Accepted(bool),
        #[prost(bool, tag = "3")]
        Working(bool),
        #[prost(bool, tag = "4")]
        Completed(bool),
    }
}

impl Status {
    pub fn accepted(&self) -> bool {
        matches!(self.job_status, Some(status::JobStatus::Accepted(true)))
    }

    pub fn working(&self) -> bool {
        matches!(self.job_status, Some(status::JobStatus::Working(true)))
    }

    pub fn completed(&self) -> bool {
        matches!(self.job_status, Some(status::JobStatus::Completed(true)))
    }
}

/// Molecular system description.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Mol {
    #[prost(string, repeated, tag = "1")]
    pub atoms: Vec<String>,
    #[prost(double, repeated, tag = "2")]
    pub xyz: Vec<f64>,
    #[prost(enumeration = "UnitType", tag = "3")]
    pub units: i32,
    #[prost(int32, tag = "4")]
    pub charge: i32,
    #[prost(int32, tag = "5")]
    pub multiplicity: i32,
    #[prost(bool, tag = "6")]
    pub closed: bool,
    #[prost(bool, tag = "7")]
    pub restricted: bool,
}

/// A job submission.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JobInput {
    #[prost(message, optional, tag = "1")]
    pub mol: Option<Mol>,
    #[prost(enumeration = "Method", tag = "2")]
    pub method: i32,
    #[prost(enumeration = "RunType", tag = "3")]
    pub run: i32,
    #[prost(string, tag = "4")]
    pub basis: String,
    /// Alpha (or restricted) orbital file used as the initial guess.
    #[prost(string, tag = "5")]
    pub orb1afile: String,
    #[prost(string, tag = "6")]
    pub orb1bfile: String,
    /// Extra keywords as flattened `[key, value, key, value, ...]` pairs.
    #[prost(string, repeated, tag = "7")]
    pub user_options: Vec<String>,
    /// Request the Meyer bond order matrix.
    #[prost(bool, tag = "8")]
    pub return_bond_order: bool,
    /// CAS states whose energies should be reported, paired with `cas_energy_mults`.
    #[prost(int32, repeated, tag = "9")]
    pub cas_energy_states: Vec<i32>,
    #[prost(int32, repeated, tag = "10")]
    pub cas_energy_mults: Vec<i32>,
    /// Second geometry of a CI overlap job.
    #[prost(double, repeated, tag = "11")]
    pub xyz2: Vec<f64>,
    #[prost(string, tag = "12")]
    pub cvec1file: String,
    #[prost(string, tag = "13")]
    pub cvec2file: String,
    #[prost(string, tag = "14")]
    pub orb2afile: String,
    #[prost(string, tag = "15")]
    pub orb2bfile: String,
}

/// Results of a finished job.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JobOutput {
    #[prost(message, optional, tag = "1")]
    pub mol: Option<Mol>,
    #[prost(double, repeated, tag = "2")]
    pub energy: Vec<f64>,
    #[prost(double, repeated, tag = "3")]
    pub gradient: Vec<f64>,
    #[prost(double, repeated, tag = "4")]
    pub charges: Vec<f64>,
    #[prost(double, repeated, tag = "5")]
    pub spins: Vec<f64>,
    /// Dipole vector followed by its magnitude.
    #[prost(double, repeated, tag = "6")]
    pub dipoles: Vec<f64>,
    #[prost(string, tag = "7")]
    pub job_dir: String,
    #[prost(string, tag = "8")]
    pub job_scr_dir: String,
    #[prost(int32, tag = "9")]
    pub server_job_id: i32,
    #[prost(string, tag = "10")]
    pub orb1afile: String,
    #[prost(string, tag = "11")]
    pub orb1bfile: String,
    /// Nonadiabatic coupling vector (coupling runs only).
    #[prost(double, repeated, tag = "12")]
    pub nacme: Vec<f64>,
    /// Labels of the leading `energy` entries for CAS runs.
    #[prost(int32, repeated, tag = "13")]
    pub cas_energy_states: Vec<i32>,
    #[prost(int32, repeated, tag = "14")]
    pub cas_energy_mults: Vec<i32>,
    /// Row-major atoms x atoms bond order matrix.
    #[prost(double, repeated, tag = "15")]
    pub bond_order: Vec<f64>,
    /// Row-major `ci_overlap_size` square matrix.
    #[prost(double, repeated, tag = "16")]
    pub ci_overlaps: Vec<f64>,
    #[prost(int32, tag = "17")]
    pub ci_overlap_size: i32,
}

/// Geometry units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum UnitType {
    Angstrom = 0,
    Bohr = 1,
}

impl UnitType {
    /// Protocol unit for the convenience calls' angstrom flag.
    pub fn from_angstrom_flag(angstrom: bool) -> Self {
        if angstrom {
            UnitType::Angstrom
        } else {
            UnitType::Bohr
        }
    }
}

/// Kind of computation requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum RunType {
    Energy = 0,
    Gradient = 1,
    Coupling = 2,
    CiVecOverlap = 3,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunType::Energy => "energy",
            RunType::Gradient => "gradient",
            RunType::Coupling => "coupling",
            RunType::CiVecOverlap => "ci_vec_overlap",
        }
    }
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Electronic structure methods known to the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Method {
    Hf = 0,
    B3lyp = 1,
    Blyp = 2,
    B3p86 = 3,
    B97 = 4,
    Bop = 5,
    Mubop = 6,
    Pbe = 7,
    Pbe0 = 8,
    Revpbe = 9,
    Revpbe0 = 10,
    Wpbe = 11,
    Wpbeh = 12,
    Wb97 = 13,
    Wb97x = 14,
    Camb3lyp = 15,
    Svwn = 16,
    Casci = 17,
    Casscf = 18,
}

impl Method {
    pub const ALL: [Method; 19] = [
        Method::Hf,
        Method::B3lyp,
        Method::Blyp,
        Method::B3p86,
        Method::B97,
        Method::Bop,
        Method::Mubop,
        Method::Pbe,
        Method::Pbe0,
        Method::Revpbe,
        Method::Revpbe0,
        Method::Wpbe,
        Method::Wpbeh,
        Method::Wb97,
        Method::Wb97x,
        Method::Camb3lyp,
        Method::Svwn,
        Method::Casci,
        Method::Casscf,
    ];

    /// Schema name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Hf => "HF",
            Method::B3lyp => "B3LYP",
            Method::Blyp => "BLYP",
            Method::B3p86 => "B3P86",
            Method::B97 => "B97",
            Method::Bop => "BOP",
            Method::Mubop => "MUBOP",
            Method::Pbe => "PBE",
            Method::Pbe0 => "PBE0",
            Method::Revpbe => "REVPBE",
            Method::Revpbe0 => "REVPBE0",
            Method::Wpbe => "WPBE",
            Method::Wpbeh => "WPBEH",
            Method::Wb97 => "WB97",
            Method::Wb97x => "WB97X",
            Method::Camb3lyp => "CAMB3LYP",
            Method::Svwn => "SVWN",
            Method::Casci => "CASCI",
            Method::Casscf => "CASSCF",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = TcpbError;

    /// Case-insensitive lookup against the schema vocabulary.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Method::ALL
            .iter()
            .copied()
            .find(|method| method.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| TcpbError::InvalidValue {
                field: "method",
                value: s.to_string(),
            })
    }
}

/// Basis sets known to the server, in canonical spelling.
pub const BASIS_SETS: &[&str] = &[
    "sto-3g",
    "3-21g",
    "6-31g",
    "6-31g*",
    "6-31g**",
    "6-31+g",
    "6-31+g*",
    "6-31++g**",
    "6-311g",
    "6-311g*",
    "6-311g**",
    "6-311+g**",
    "6-311++g**",
    "cc-pvdz",
    "cc-pvtz",
    "aug-cc-pvdz",
    "aug-cc-pvtz",
    "def2-svp",
    "def2-svpd",
    "def2-tzvp",
    "def2-tzvpp",
    "lanl2dz",
];

/// Canonical spelling of a basis set name, matched case-insensitively.
pub fn canonical_basis(name: &str) -> Option<&'static str> {
    let name = name.trim();
    BASIS_SETS
        .iter()
        .copied()
        .find(|basis| basis.eq_ignore_ascii_case(name))
}
