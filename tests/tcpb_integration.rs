//! End-to-end tests against an in-process mock TCPB server.
//!
//! The mock listens on a loopback port, serves exactly one connection, and
//! speaks the real wire format: STATUS polls, JOBINPUT acknowledgements, and
//! a JOBOUTPUT frame right after the STATUS that reports completion.
//!
//! # Running
//!
//! ```bash
//! cargo test --test tcpb_integration -- --nocapture
//! ```

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use pretty_assertions::assert_eq;
use prost::Message;

use tcpb::config::PollConfig;
use tcpb::error::TransportFailure;
use tcpb::ipc::{ConnectionState, FrameHeader, FRAME_HEADER_LEN};
use tcpb::proto::status::JobStatus;
use tcpb::proto::{JobInput, JobOutput, MessageType, RunType, Status};
use tcpb::{CiOverlap, Endpoint, JobState, TcpbClient, TcpbError, UnitType};

const WATER: [[f64; 3]; 3] = [
    [0.0, 0.0, -0.12948],
    [0.0, -1.49419, 1.02744],
    [0.0, 1.49419, 1.02744],
];

const WATER_ENERGY: f64 = -76.3000505;

const WATER_GRADIENT: [[f64; 3]; 3] = [
    [0.0000002903, 0.0000000722, -0.033101313],
    [-0.0000000608, -0.0141756697, 0.016550727],
    [-0.0000002294, 0.0141755976, 0.016550585],
];

const TOLERANCE: f64 = 1e-5;

#[derive(Clone, Copy)]
enum Behavior {
    /// Report `Working` this many times before completing each job.
    Normal { busy_polls: usize },
    /// Answer the first STATUS request with 3 header bytes, then hang up.
    ShortStatusHeader,
}

/// What the mock server saw before the client went away.
#[derive(Default)]
struct Received {
    message_types: Vec<u32>,
    inputs: Vec<JobInput>,
}

struct MockServer {
    endpoint: Endpoint,
    handle: JoinHandle<Received>,
}

impl MockServer {
    fn spawn(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept client");
            serve(stream, behavior)
        });
        Self {
            endpoint: Endpoint::new("127.0.0.1", port).unwrap(),
            handle,
        }
    }

    /// Wait for the client to disconnect and return what the server saw.
    fn finish(self) -> Received {
        self.handle.join().expect("mock server panicked")
    }
}

fn read_frame(stream: &mut TcpStream) -> Option<(u32, Vec<u8>)> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    stream.read_exact(&mut header).ok()?;
    let header = FrameHeader::from_bytes(header);
    let mut payload = vec![0u8; header.length as usize];
    stream.read_exact(&mut payload).ok()?;
    Some((header.message_type, payload))
}

fn write_frame<M: Message>(stream: &mut TcpStream, message_type: MessageType, message: &M) {
    let payload = message.encode_to_vec();
    let header = FrameHeader::new(message_type, payload.len()).unwrap();
    stream.write_all(&header.to_bytes()).unwrap();
    stream.write_all(&payload).unwrap();
}

fn status(busy: bool, job_status: Option<JobStatus>) -> Status {
    Status { busy, job_status }
}

fn output_for(input: &JobInput, job_id: i32) -> JobOutput {
    let flat_gradient: Vec<f64> = WATER_GRADIENT.iter().flatten().copied().collect();
    let mut output = JobOutput {
        energy: vec![WATER_ENERGY],
        job_dir: format!("/scratch/job_{}", job_id),
        server_job_id: job_id,
        orb1afile: format!("/scratch/job_{}/c0", job_id),
        ..Default::default()
    };
    match input.run() {
        RunType::Energy => {}
        RunType::Gradient => output.gradient = flat_gradient,
        RunType::Coupling => output.nacme = flat_gradient,
        RunType::CiVecOverlap => {
            output.ci_overlaps = vec![0.98, 0.05, -0.04, 0.97];
            output.ci_overlap_size = 2;
        }
    }
    if input.return_bond_order {
        output.bond_order = vec![0.0, 0.95, 0.95, 0.95, 0.0, 0.01, 0.95, 0.01, 0.0];
    }
    if !input.cas_energy_states.is_empty() {
        output.energy = (0..input.cas_energy_states.len())
            .map(|i| WATER_ENERGY + 0.25 * i as f64)
            .collect();
        output.cas_energy_states = input.cas_energy_states.clone();
        output.cas_energy_mults = input.cas_energy_mults.clone();
    }
    output
}

fn serve(mut stream: TcpStream, behavior: Behavior) -> Received {
    let mut received = Received::default();
    let mut pending: Option<(JobInput, usize)> = None;

    while let Some((message_type, payload)) = read_frame(&mut stream) {
        received.message_types.push(message_type);

        match (MessageType::from_code(message_type), behavior) {
            (Some(MessageType::Status), Behavior::ShortStatusHeader) => {
                stream.write_all(&[0, 0, 0]).unwrap();
                return received;
            }
            (Some(MessageType::Status), Behavior::Normal { .. }) => match pending.take() {
                None => write_frame(&mut stream, MessageType::Status, &status(false, None)),
                Some((input, 0)) => {
                    write_frame(
                        &mut stream,
                        MessageType::Status,
                        &status(false, Some(JobStatus::Completed(true))),
                    );
                    let job_id = received.inputs.len() as i32;
                    write_frame(&mut stream, MessageType::JobOutput, &output_for(&input, job_id));
                }
                Some((input, polls)) => {
                    write_frame(
                        &mut stream,
                        MessageType::Status,
                        &status(true, Some(JobStatus::Working(true))),
                    );
                    pending = Some((input, polls - 1));
                }
            },
            (Some(MessageType::JobInput), Behavior::Normal { busy_polls }) => {
                let input = JobInput::decode(payload.as_slice()).expect("decodable job input");
                received.inputs.push(input.clone());
                if pending.is_some() {
                    write_frame(
                        &mut stream,
                        MessageType::Status,
                        &status(true, Some(JobStatus::Accepted(false))),
                    );
                } else {
                    write_frame(
                        &mut stream,
                        MessageType::Status,
                        &status(true, Some(JobStatus::Accepted(true))),
                    );
                    pending = Some((input, busy_polls));
                }
            }
            _ => panic!("mock server got unexpected message type {}", message_type),
        }
    }
    received
}

fn water_client(endpoint: &Endpoint) -> TcpbClient {
    let mut client = TcpbClient::new(endpoint.clone()).with_poll(PollConfig {
        initial_interval_ms: 1,
        max_interval_ms: 10,
        max_wait_secs: 10,
    });
    client.connect().expect("connect to mock server");
    let spec = client.job_spec_mut();
    spec.set_atoms(["O", "H", "H"]);
    spec.set_charge(0);
    spec.set_spin_mult(1);
    spec.set_closed(true);
    spec.set_restricted(true);
    spec.set_method("pbe0").unwrap();
    spec.set_basis("6-31g").unwrap();
    client
}

fn assert_vectors_close(actual: &[[f64; 3]], expected: &[[f64; 3]]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        for axis in 0..3 {
            assert!(
                (a[axis] - e[axis]).abs() < TOLERANCE,
                "{:?} differs from {:?}",
                a,
                e
            );
        }
    }
}

#[test]
fn test_water_energy() {
    let server = MockServer::spawn(Behavior::Normal { busy_polls: 2 });
    let mut client = water_client(&server.endpoint);

    let energy = client.compute_energy(&WATER, false).unwrap();
    assert!((energy - WATER_ENERGY).abs() < TOLERANCE);
    assert_eq!(client.job_state(), JobState::Idle);

    client.disconnect();
    let received = server.finish();
    // JOBINPUT, then three polls: working, working, completed.
    assert_eq!(received.message_types, vec![2, 0, 0, 0]);

    let mol = received.inputs[0].mol.clone().unwrap();
    assert_eq!(mol.atoms, vec!["O", "H", "H"]);
    assert_eq!(mol.xyz[2], -0.12948);
    assert_eq!(received.inputs[0].basis, "6-31g");
}

#[test]
fn test_water_gradient_and_forces() {
    let server = MockServer::spawn(Behavior::Normal { busy_polls: 0 });
    let mut client = water_client(&server.endpoint);

    let (energy, gradient) = client.compute_gradient(&WATER, false).unwrap();
    assert!((energy - WATER_ENERGY).abs() < TOLERANCE);
    assert_vectors_close(&gradient, &WATER_GRADIENT);

    let (force_energy, forces) = client.compute_forces(&WATER, false).unwrap();
    assert_eq!(force_energy, energy);
    let negated: Vec<[f64; 3]> = WATER_GRADIENT
        .iter()
        .map(|[x, y, z]| [-x, -y, -z])
        .collect();
    assert_vectors_close(&forces, &negated);

    client.disconnect();
    let received = server.finish();
    assert_eq!(received.inputs.len(), 2);
    // The second job starts from the first job's orbitals.
    assert_eq!(received.inputs[0].orb1afile, "");
    assert_eq!(received.inputs[1].orb1afile, "/scratch/job_1/c0");
}

#[test]
fn test_cas_energies_and_bond_order() {
    let server = MockServer::spawn(Behavior::Normal { busy_polls: 1 });
    let mut client = water_client(&server.endpoint);
    client.job_spec_mut().set_bond_order(true);
    client.job_spec_mut().set_cas_energy_labels([(0, 1), (1, 1)]);

    let result = client
        .compute_job_sync(RunType::Energy, &WATER, UnitType::Bohr)
        .unwrap();
    assert_eq!(result.state_energies.len(), 2);
    assert_eq!(result.state_energies[1].state, 1);
    assert!((result.state_energies[1].energy - (WATER_ENERGY + 0.25)).abs() < TOLERANCE);
    let bond_order = result.bond_order.unwrap();
    assert_eq!(bond_order.len(), 3);
    assert_eq!(bond_order[0][1], 0.95);

    client.disconnect();
    let received = server.finish();
    assert!(received.inputs[0].return_bond_order);
    assert_eq!(received.inputs[0].cas_energy_mults, vec![1, 1]);
}

#[test]
fn test_ci_overlap_between_two_geometries() {
    let server = MockServer::spawn(Behavior::Normal { busy_polls: 0 });
    let mut client = water_client(&server.endpoint);

    client.compute_energy(&WATER, false).unwrap();
    let displaced: Vec<[f64; 3]> = WATER.iter().map(|[x, y, z]| [*x, y * 1.01, *z]).collect();
    let overlap = CiOverlap {
        geometry2: displaced,
        cvec1file: "/scratch/job_1/CIvec".to_string(),
        cvec2file: "/scratch/job_2/CIvec".to_string(),
        orb1afile: "/scratch/job_1/c0".to_string(),
        orb2afile: "/scratch/job_2/c0".to_string(),
    };
    let overlaps = client.compute_ci_overlap(&WATER, &overlap, false).unwrap();
    assert_eq!(overlaps, vec![vec![0.98, 0.05], vec![-0.04, 0.97]]);

    client.disconnect();
    let received = server.finish();
    let input = &received.inputs[1];
    assert_eq!(input.run(), RunType::CiVecOverlap);
    assert_eq!(input.xyz2.len(), 9);
    assert_eq!(input.orb1afile, "/scratch/job_1/c0");
    assert_eq!(input.orb2afile, "/scratch/job_2/c0");
}

#[test]
fn test_structural_change_drops_warm_start() {
    let server = MockServer::spawn(Behavior::Normal { busy_polls: 0 });
    let mut client = water_client(&server.endpoint);

    client.compute_energy(&WATER, false).unwrap();
    client.job_spec_mut().set_charge(0);
    client.compute_energy(&WATER, false).unwrap();

    client.disconnect();
    let received = server.finish();
    assert_eq!(received.inputs[1].orb1afile, "");
}

#[test]
fn test_incomplete_spec_sends_nothing() {
    let server = MockServer::spawn(Behavior::Normal { busy_polls: 0 });
    let mut client = TcpbClient::new(server.endpoint.clone());
    client.connect().unwrap();
    let spec = client.job_spec_mut();
    spec.set_atoms(["O", "H", "H"]);
    spec.set_charge(0);
    spec.set_spin_mult(1);

    for result in [
        client.compute_energy(&WATER, false).map(|_| ()),
        client.compute_gradient(&WATER, false).map(|_| ()),
        client.compute_forces(&WATER, true).map(|_| ()),
    ] {
        match result {
            Err(TcpbError::Precondition { missing }) => assert_eq!(missing.len(), 4),
            other => panic!("Expected Precondition, got {other:?}"),
        }
    }
    assert!(client.is_connected());

    client.disconnect();
    assert!(server.finish().message_types.is_empty());
}

#[test]
fn test_short_header_closes_connection() {
    let server = MockServer::spawn(Behavior::ShortStatusHeader);
    let mut client = TcpbClient::new(server.endpoint.clone());
    client.connect().unwrap();

    let err = client.is_available().unwrap_err();
    assert!(
        matches!(
            err,
            TcpbError::Transport {
                failure: TransportFailure::Short {
                    transferred: 3,
                    expected: 8
                },
                ..
            }
        ),
        "unexpected error: {err:?}"
    );
    assert_eq!(client.connection_state(), ConnectionState::Closed);

    assert!(matches!(client.is_available(), Err(TcpbError::NotConnected)));
    assert!(matches!(
        client.compute_energy(&WATER, false),
        Err(TcpbError::Precondition { .. })
    ));

    let received = server.finish();
    assert_eq!(received.message_types, vec![0]);
}

#[test]
fn test_idle_server_is_available() {
    let server = MockServer::spawn(Behavior::Normal { busy_polls: 0 });
    let mut client = TcpbClient::new(server.endpoint.clone());
    client.connect().unwrap();

    assert!(client.is_available().unwrap());
    assert!(client.is_available().unwrap());

    client.disconnect();
    assert_eq!(server.finish().message_types, vec![0, 0]);
}

#[test]
fn test_connect_refused() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let mut client = TcpbClient::new(Endpoint::new("127.0.0.1", port).unwrap());
    let err = client.connect().unwrap_err();
    assert!(matches!(err, TcpbError::Connection { .. }));
    assert!(err.is_fatal());
    assert!(!client.is_connected());
}
