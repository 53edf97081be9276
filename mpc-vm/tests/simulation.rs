//! End-to-end tests over an in-memory network of dispatchers.
//!
//! Five participants with threshold 3 run the same programs over F_251
//! with the Pedersen scheme (503, 251, 351, 8). The harness plays the
//! transport: point-to-point RPCs go to their recipient, broadcasts to
//! every other participant, and everything is pumped to quiescence.

use std::time::{Duration, Instant};

use mpc_core::algebra::{Field, FieldElement};
use mpc_core::pedersen::Pedersen;
use mpc_core::shamir;
use mpc_tasks::Task;
use mpc_vm::program::{Instr, Program, ProgramId, Value};
use mpc_vm::vm::{Recipient, Vm, VmError, VmMessage, VmOutput};
use mpc_vm::{Parameters, ProtocolError};
use num_bigint::BigUint;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;

const N: u64 = 5;
const K: u64 = 3;
const CAPACITY: usize = 256;

fn field() -> Field {
    Field::new(BigUint::from(251u64)).unwrap()
}

fn parties() -> Vec<Task<Vm>> {
    let field = field();
    let ped = Pedersen::new(
        BigUint::from(503u64),
        BigUint::from(251u64),
        BigUint::from(351u64),
        BigUint::from(8u64),
    )
    .unwrap();
    (1..=N)
        .map(|index| {
            let params = Parameters::new(
                index,
                N,
                K,
                field.clone(),
                ped.clone(),
                Duration::from_secs(5),
            )
            .unwrap();
            Task::new(CAPACITY, Vm::new(params, CAPACITY))
        })
        .collect()
}

/// Pumps all parties and routes their RPC traffic until the network is
/// quiescent; returns the non-RPC outputs tagged with the party that
/// produced them.
fn run(parties: &mut [Task<Vm>]) -> Vec<(usize, VmOutput)> {
    let n = parties.len();
    let mut events = Vec::new();
    loop {
        let mut progressed = false;
        for at in 0..n {
            parties[at].pump().expect("bounded queue overflow");
            for output in parties[at].drain() {
                progressed = true;
                match output {
                    VmOutput::Rpc { to, rpc } => match to {
                        Recipient::Peer(peer) => parties[(peer - 1) as usize]
                            .send(VmMessage::Rpc(rpc))
                            .expect("bounded queue overflow"),
                        Recipient::All => {
                            for peer in 0..n {
                                if peer != at {
                                    parties[peer]
                                        .send(VmMessage::Rpc(rpc.clone()))
                                        .expect("bounded queue overflow");
                                }
                            }
                        }
                    },
                    other => events.push((at, other)),
                }
            }
        }
        if !progressed {
            return events;
        }
    }
}

fn exec_everywhere(parties: &mut [Task<Vm>], programs: Vec<Program>) -> eyre::Result<()> {
    for (party, program) in parties.iter_mut().zip(programs) {
        party.send(VmMessage::Exec { program })?;
    }
    Ok(())
}

/// One result per party, in party order, for the given program.
fn results_for(events: &[(usize, VmOutput)], pid: ProgramId) -> Vec<Vec<Value>> {
    let mut per_party: Vec<Option<Vec<Value>>> = vec![None; N as usize];
    for (at, event) in events {
        match event {
            VmOutput::Result {
                pid: event_pid,
                values,
            } if *event_pid == pid => {
                assert!(
                    per_party[*at].is_none(),
                    "party {at} produced two results for one program"
                );
                per_party[*at] = Some(values.clone());
            }
            VmOutput::Result { .. } => {}
            other => panic!("unexpected event from party {at}: {other:?}"),
        }
    }
    per_party
        .into_iter()
        .map(|values| values.expect("party missing a result"))
        .collect()
}

/// Per-party programs computing x * y from consistently dealt shares.
fn mul_programs(
    pid: ProgramId,
    x: u64,
    y: u64,
    field: &Field,
    rng: &mut ChaCha12Rng,
) -> Vec<Program> {
    let xs = shamir::share(&field.from_u64(x), N, K, rng).unwrap();
    let ys = shamir::share(&field.from_u64(y), N, K, rng).unwrap();
    xs.into_iter()
        .zip(ys)
        .map(|(x_share, y_share)| {
            Program::new(
                pid,
                vec![
                    Instr::Push(Value::Private(x_share)),
                    Instr::Push(Value::Private(y_share)),
                    Instr::Rand,
                    Instr::Mul,
                    Instr::Open,
                ],
            )
        })
        .collect()
}

fn public_value(values: &[Value]) -> FieldElement {
    let [Value::Public(value)] = values else {
        panic!("expected a single public value, got {values:?}");
    };
    value.clone()
}

#[test]
fn test_public_addition_program() -> eyre::Result<()> {
    let field = field();
    let mut parties = parties();
    let pid = ProgramId([1u8; 32]);
    let programs = (0..N)
        .map(|_| {
            Program::new(
                pid,
                vec![
                    Instr::Push(Value::Public(field.from_u64(3))),
                    Instr::Push(Value::Public(field.from_u64(4))),
                    Instr::Add,
                    Instr::Open,
                ],
            )
        })
        .collect();
    exec_everywhere(&mut parties, programs)?;
    let events = run(&mut parties);

    for values in results_for(&events, pid) {
        assert_eq!(public_value(&values), field.from_u64(7));
    }
    Ok(())
}

#[test]
fn test_open_program_reveals_shared_secret() -> eyre::Result<()> {
    let field = field();
    let mut rng = ChaCha12Rng::from_entropy();
    let mut parties = parties();
    let pid = ProgramId([2u8; 32]);
    let shares = shamir::share(&field.from_u64(123), N, K, &mut rng)?;
    let programs = shares
        .into_iter()
        .map(|share| {
            Program::new(
                pid,
                vec![Instr::Push(Value::Private(share)), Instr::Open],
            )
        })
        .collect();
    exec_everywhere(&mut parties, programs)?;
    let events = run(&mut parties);

    for values in results_for(&events, pid) {
        assert_eq!(public_value(&values), field.from_u64(123));
    }
    Ok(())
}

#[test]
fn test_multiplication_program() -> eyre::Result<()> {
    let field = field();
    let mut rng = ChaCha12Rng::from_entropy();
    let mut parties = parties();
    let pid = ProgramId([3u8; 32]);
    let programs = mul_programs(pid, 6, 7, &field, &mut rng);
    exec_everywhere(&mut parties, programs)?;
    let events = run(&mut parties);

    // x * y mod q at every honest participant
    for values in results_for(&events, pid) {
        assert_eq!(public_value(&values), field.from_u64(42));
    }
    Ok(())
}

#[test]
fn test_random_multiplication_programs() -> eyre::Result<()> {
    let field = field();
    let mut rng = ChaCha12Rng::from_entropy();
    for trial in 0..3u64 {
        let mut parties = parties();
        let pid = ProgramId([4 + trial as u8; 32]);
        let x = field.random(&mut rng);
        let y = field.random(&mut rng);
        let xs = shamir::share(&x, N, K, &mut rng)?;
        let ys = shamir::share(&y, N, K, &mut rng)?;
        let programs = xs
            .into_iter()
            .zip(ys)
            .map(|(x_share, y_share)| {
                Program::new(
                    pid,
                    vec![
                        Instr::Push(Value::Private(x_share)),
                        Instr::Push(Value::Private(y_share)),
                        Instr::Rand,
                        Instr::Mul,
                        Instr::Open,
                    ],
                )
            })
            .collect();
        exec_everywhere(&mut parties, programs)?;
        let events = run(&mut parties);

        for values in results_for(&events, pid) {
            assert_eq!(public_value(&values), &x * &y);
        }
    }
    Ok(())
}

#[test]
fn test_concurrent_programs_do_not_contaminate() -> eyre::Result<()> {
    let field = field();
    let mut rng = ChaCha12Rng::from_entropy();
    let mut parties = parties();
    let pid_a = ProgramId([10u8; 32]);
    let pid_b = ProgramId([11u8; 32]);
    let programs_a = mul_programs(pid_a, 6, 7, &field, &mut rng);
    let programs_b = mul_programs(pid_b, 3, 9, &field, &mut rng);

    // interleave the two executions at every party
    for (party, (a, b)) in parties
        .iter_mut()
        .zip(programs_a.into_iter().zip(programs_b))
    {
        party.send(VmMessage::Exec { program: a })?;
        party.send(VmMessage::Exec { program: b })?;
    }
    let events = run(&mut parties);

    let (for_a, rest): (Vec<_>, Vec<_>) = events
        .into_iter()
        .partition(|(_, e)| matches!(e, VmOutput::Result { pid, .. } if *pid == pid_a));
    for values in results_for(&for_a, pid_a) {
        assert_eq!(public_value(&values), field.from_u64(42));
    }
    for values in results_for(&rest, pid_b) {
        assert_eq!(public_value(&values), field.from_u64(27));
    }
    Ok(())
}

#[test]
fn test_stalled_generation_hits_deadline() -> eyre::Result<()> {
    let mut parties = parties();
    let pid = ProgramId([20u8; 32]);
    // only party 1 executes, so its randomness generation can never reach
    // quorum
    let program = Program::new(pid, vec![Instr::Rand, Instr::Open]);
    parties[0].send(VmMessage::Exec { program })?;
    let events = run(&mut parties);
    assert!(events.is_empty(), "nothing may complete: {events:?}");

    let t0 = Instant::now();
    parties[0].send(VmMessage::CheckDeadline { now: t0 })?;
    assert!(run(&mut parties).is_empty());

    parties[0].send(VmMessage::CheckDeadline {
        now: t0 + Duration::from_secs(6),
    })?;
    let events = run(&mut parties);
    assert!(
        events.iter().any(|(at, e)| *at == 0
            && matches!(
                e,
                VmOutput::Err {
                    pid: Some(event_pid),
                    error: VmError::Protocol(ProtocolError::Deadline),
                } if *event_pid == pid
            )),
        "expected a deadline failure for the stalled program: {events:?}"
    );
    Ok(())
}
