//! The dispatcher wiring programs to the protocol tasks.
//!
//! The [`Vm`] owns one task each for randomness generation, multiplication
//! and opening, a table of active programs, and a table of outstanding
//! intents. Driving a program either terminates it (exactly one `Result`
//! or `Err` output per program) or yields an intent, which is registered
//! and translated into the matching child task's signal. Child results are
//! delivered into the owning program's pending slots and the program is
//! re-entered; child errors terminate the owning program. Peer-originated
//! protocol messages arrive wrapped as [`RemoteProcedureCall`]s and are
//! routed to the matching child by tag.

use std::collections::HashMap;
use std::time::Instant;

use mpc_tasks::{MessageId, Reducer, Reduction, Task, TaskError};
use serde::{Deserialize, Serialize};

use crate::mul::{self, MulMessage, MulOutput, MulSignal, Multiplier};
use crate::open::{self, OpenMessage, OpenOutput, OpenSignal, Opener};
use crate::program::{Intent, IntentId, Program, ProgramError, ProgramId, Return, Value};
use crate::rng::{self, RngMessage, RngOutput, Rnger};
use crate::{Parameters, ProtocolError};

/// Inputs consumed by the [`Vm`].
#[derive(Debug)]
pub enum VmMessage {
    /// Execute a program with a fresh unique id.
    Exec {
        /// The program to run.
        program: Program,
    },
    /// An intra-protocol message from a peer dispatcher.
    Rpc(RemoteProcedureCall),
    /// Sweep protocol state whose deadline has passed.
    CheckDeadline {
        /// The current monotonic time.
        now: Instant,
    },
}

/// An intra-protocol message exchanged between peer dispatchers, routed to
/// the child task matching its tag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RemoteProcedureCall {
    /// A randomness contribution.
    RnShares(rng::RnShares),
    /// The randomness leader's contributor-set proposal.
    ProposeRnShare(rng::ProposeRnShare),
    /// A masked product opening.
    OpenMul(mul::OpenMul),
    /// A share opening.
    Open(open::OpenShares),
}

/// Where an outbound RPC must be delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recipient {
    /// Point-to-point to one participant.
    Peer(u64),
    /// Broadcast to every other participant.
    All,
}

/// Errors terminating a program or, without a program id, the dispatcher
/// itself.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    /// The program faulted.
    #[error(transparent)]
    Program(#[from] ProgramError),
    /// A protocol instance working for the program failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// A child task queue overflowed.
    #[error(transparent)]
    Task(#[from] TaskError),
    /// An `Exec` reused the id of an active program.
    #[error("duplicate program id")]
    DuplicateProgram,
    /// A protocol result arrived for an intent of a different kind.
    #[error("protocol result does not match the intent kind")]
    IntentMismatch,
}

/// Outputs produced by the [`Vm`].
#[derive(Clone, Debug)]
pub enum VmOutput {
    /// A protocol message for the transport to deliver.
    Rpc {
        /// Destination.
        to: Recipient,
        /// Payload.
        rpc: RemoteProcedureCall,
    },
    /// A program terminated successfully.
    Result {
        /// The terminated program.
        pid: ProgramId,
        /// Its return region, bottom of the stack first.
        values: Vec<Value>,
    },
    /// A program (or, with no id, the dispatcher) failed.
    Err {
        /// The terminated program, if the error is attributable.
        pid: Option<ProgramId>,
        /// Why it terminated.
        error: VmError,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum IntentKind {
    Rn,
    RnZero,
    RnTuple,
    Multiply,
    Open,
}

/// The dispatcher reducer.
pub struct Vm {
    programs: HashMap<ProgramId, Program>,
    intents: HashMap<MessageId, IntentKind>,
    rng: Task<Rnger>,
    mul: Task<Multiplier>,
    open: Task<Opener>,
}

impl Vm {
    /// Creates the dispatcher and its three child tasks, all with queues
    /// of the given capacity.
    pub fn new(params: Parameters, capacity: usize) -> Self {
        Self {
            rng: Task::new(capacity, Rnger::new(params.clone())),
            mul: Task::new(capacity, Multiplier::new(params.clone())),
            open: Task::new(capacity, Opener::new(params)),
            programs: HashMap::new(),
            intents: HashMap::new(),
        }
    }

    fn exec(&mut self, program: Program, outputs: &mut Vec<VmOutput>) {
        let pid = program.id();
        if self.programs.contains_key(&pid) {
            outputs.push(VmOutput::Err {
                pid: Some(pid),
                error: VmError::DuplicateProgram,
            });
            return;
        }
        tracing::debug!("executing program");
        self.programs.insert(pid, program);
        self.drive(pid, outputs);
    }

    fn drive(&mut self, pid: ProgramId, outputs: &mut Vec<VmOutput>) {
        let Some(program) = self.programs.get_mut(&pid) else {
            return;
        };
        match program.exec() {
            Return::Pending => {}
            Return::Intent(intent) => self.handle_intent(pid, intent, outputs),
        }
    }

    fn handle_intent(&mut self, pid: ProgramId, intent: Intent, outputs: &mut Vec<VmOutput>) {
        match intent {
            Intent::Exit { pid, values } => {
                self.programs.remove(&pid);
                tracing::debug!("program exited");
                outputs.push(VmOutput::Result { pid, values });
            }
            Intent::Error { pid, error } => {
                self.fail_program(pid, error.into(), outputs);
            }
            Intent::Rn { id, batch } => {
                if !self.register(pid, id, IntentKind::Rn, outputs) {
                    return;
                }
                let message = RngMessage::GenerateRn {
                    id: id.message_id(),
                    batch,
                };
                if let Err(error) = self.rng.send(message) {
                    self.fail_program(pid, error.into(), outputs);
                }
            }
            Intent::RnZero { id, batch } => {
                if !self.register(pid, id, IntentKind::RnZero, outputs) {
                    return;
                }
                let message = RngMessage::GenerateRnZero {
                    id: id.message_id(),
                    batch,
                };
                if let Err(error) = self.rng.send(message) {
                    self.fail_program(pid, error.into(), outputs);
                }
            }
            Intent::RnTuple { id, batch } => {
                if !self.register(pid, id, IntentKind::RnTuple, outputs) {
                    return;
                }
                let message = RngMessage::GenerateRnTuple {
                    id: id.message_id(),
                    batch,
                };
                if let Err(error) = self.rng.send(message) {
                    self.fail_program(pid, error.into(), outputs);
                }
            }
            Intent::Multiply {
                id,
                xs,
                ys,
                rhos,
                sigmas,
            } => {
                if !self.register(pid, id, IntentKind::Multiply, outputs) {
                    return;
                }
                let message = MulMessage::Mul(MulSignal {
                    id: id.message_id(),
                    xs,
                    ys,
                    rhos,
                    sigmas,
                });
                if let Err(error) = self.mul.send(message) {
                    self.fail_program(pid, error.into(), outputs);
                }
            }
            Intent::Open { id, shares } => {
                if !self.register(pid, id, IntentKind::Open, outputs) {
                    return;
                }
                let message = OpenMessage::Signal(OpenSignal {
                    id: id.message_id(),
                    shares,
                });
                if let Err(error) = self.open.send(message) {
                    self.fail_program(pid, error.into(), outputs);
                }
            }
        }
    }

    fn register(
        &mut self,
        pid: ProgramId,
        id: IntentId,
        kind: IntentKind,
        outputs: &mut Vec<VmOutput>,
    ) -> bool {
        let mid = id.message_id();
        if self.intents.contains_key(&mid) {
            self.fail_program(pid, ProtocolError::DuplicateId.into(), outputs);
            return false;
        }
        tracing::trace!(pc = id.pc, ?kind, "registering intent");
        self.intents.insert(mid, kind);
        true
    }

    fn fail_program(&mut self, pid: ProgramId, error: VmError, outputs: &mut Vec<VmOutput>) {
        self.programs.remove(&pid);
        self.intents.retain(|mid, _| mid.pid != pid.0);
        outputs.push(VmOutput::Err {
            pid: Some(pid),
            error,
        });
    }

    fn invoke(&mut self, rpc: RemoteProcedureCall, outputs: &mut Vec<VmOutput>) {
        let result = match rpc {
            RemoteProcedureCall::RnShares(m) => self.rng.send(RngMessage::RnShares(m)),
            RemoteProcedureCall::ProposeRnShare(m) => {
                self.rng.send(RngMessage::ProposeRnShare(m))
            }
            RemoteProcedureCall::OpenMul(m) => self.mul.send(MulMessage::OpenMul(m)),
            RemoteProcedureCall::Open(m) => self.open.send(OpenMessage::Open(m)),
        };
        if let Err(error) = result {
            outputs.push(VmOutput::Err {
                pid: None,
                error: error.into(),
            });
        }
    }

    fn check_deadlines(&mut self, now: Instant, outputs: &mut Vec<VmOutput>) {
        let results = [
            self.rng.send(RngMessage::CheckDeadline { now }),
            self.mul.send(MulMessage::CheckDeadline { now }),
            self.open.send(OpenMessage::CheckDeadline { now }),
        ];
        for result in results {
            if let Err(error) = result {
                outputs.push(VmOutput::Err {
                    pid: None,
                    error: error.into(),
                });
            }
        }
    }

    /// Pumps the child tasks and routes their outputs until the whole
    /// subtree is quiescent. Result deliveries re-enter programs, which
    /// may feed the children again, hence the loop.
    fn pump_children(&mut self, outputs: &mut Vec<VmOutput>) {
        loop {
            let pumped = [self.rng.pump(), self.mul.pump(), self.open.pump()];
            for result in pumped {
                if let Err(error) = result {
                    outputs.push(VmOutput::Err {
                        pid: None,
                        error: error.into(),
                    });
                    return;
                }
            }

            let mut progressed = false;
            for output in self.rng.drain() {
                progressed = true;
                self.on_rng_output(output, outputs);
            }
            for output in self.mul.drain() {
                progressed = true;
                self.on_mul_output(output, outputs);
            }
            for output in self.open.drain() {
                progressed = true;
                self.on_open_output(output, outputs);
            }
            if !progressed {
                return;
            }
        }
    }

    fn on_rng_output(&mut self, output: RngOutput, outputs: &mut Vec<VmOutput>) {
        match output {
            RngOutput::RnShares(m) => outputs.push(VmOutput::Rpc {
                to: Recipient::Peer(m.to),
                rpc: RemoteProcedureCall::RnShares(m),
            }),
            RngOutput::ProposeRnShare(m) => outputs.push(VmOutput::Rpc {
                to: Recipient::All,
                rpc: RemoteProcedureCall::ProposeRnShare(m),
            }),
            RngOutput::Result(result) => self.deliver_rng_result(result, outputs),
            RngOutput::Err { id, reason } => self.fail_intent(id, reason, outputs),
        }
    }

    fn on_mul_output(&mut self, output: MulOutput, outputs: &mut Vec<VmOutput>) {
        match output {
            MulOutput::OpenMul(m) => outputs.push(VmOutput::Rpc {
                to: Recipient::All,
                rpc: RemoteProcedureCall::OpenMul(m),
            }),
            MulOutput::Result(result) => self.deliver_mul_result(result, outputs),
            MulOutput::Err { id, reason } => self.fail_intent(id, reason, outputs),
        }
    }

    fn on_open_output(&mut self, output: OpenOutput, outputs: &mut Vec<VmOutput>) {
        match output {
            OpenOutput::Open(m) => outputs.push(VmOutput::Rpc {
                to: Recipient::All,
                rpc: RemoteProcedureCall::Open(m),
            }),
            OpenOutput::Result(result) => self.deliver_open_result(result, outputs),
            OpenOutput::Err { id, reason } => self.fail_intent(id, reason, outputs),
        }
    }

    fn deliver_rng_result(&mut self, result: rng::RngResult, outputs: &mut Vec<VmOutput>) {
        let Some(kind) = self.intents.get(&result.id).copied() else {
            return;
        };
        let iid = IntentId::from_message_id(result.id);
        let pid = iid.pid;
        self.intents.remove(&result.id);
        if let Err(error) = self.rng.send(RngMessage::Evict { id: result.id }) {
            outputs.push(VmOutput::Err {
                pid: None,
                error: error.into(),
            });
        }

        let Some(program) = self.programs.get_mut(&pid) else {
            return;
        };
        let delivered = match kind {
            IntentKind::Rn | IntentKind::RnZero => program.deliver_shares(iid.pc, result.sigmas),
            IntentKind::RnTuple => program.deliver_tuple(iid.pc, result.rhos, result.sigmas),
            IntentKind::Multiply | IntentKind::Open => {
                self.fail_program(pid, VmError::IntentMismatch, outputs);
                return;
            }
        };
        match delivered {
            Ok(()) => self.drive(pid, outputs),
            Err(error) => self.fail_program(pid, error.into(), outputs),
        }
    }

    fn deliver_mul_result(&mut self, result: mul::MulResult, outputs: &mut Vec<VmOutput>) {
        let Some(kind) = self.intents.get(&result.id).copied() else {
            return;
        };
        let iid = IntentId::from_message_id(result.id);
        let pid = iid.pid;
        self.intents.remove(&result.id);
        if let Err(error) = self.mul.send(MulMessage::Evict { id: result.id }) {
            outputs.push(VmOutput::Err {
                pid: None,
                error: error.into(),
            });
        }

        let Some(program) = self.programs.get_mut(&pid) else {
            return;
        };
        if kind != IntentKind::Multiply {
            self.fail_program(pid, VmError::IntentMismatch, outputs);
            return;
        }
        match program.deliver_shares(iid.pc, result.shares) {
            Ok(()) => self.drive(pid, outputs),
            Err(error) => self.fail_program(pid, error.into(), outputs),
        }
    }

    fn deliver_open_result(&mut self, result: open::OpenResult, outputs: &mut Vec<VmOutput>) {
        let Some(kind) = self.intents.get(&result.id).copied() else {
            return;
        };
        let iid = IntentId::from_message_id(result.id);
        let pid = iid.pid;
        self.intents.remove(&result.id);
        if let Err(error) = self.open.send(OpenMessage::Evict { id: result.id }) {
            outputs.push(VmOutput::Err {
                pid: None,
                error: error.into(),
            });
        }

        let Some(program) = self.programs.get_mut(&pid) else {
            return;
        };
        if kind != IntentKind::Open {
            self.fail_program(pid, VmError::IntentMismatch, outputs);
            return;
        }
        match program.deliver_values(iid.pc, result.values) {
            Ok(()) => self.drive(pid, outputs),
            Err(error) => self.fail_program(pid, error.into(), outputs),
        }
    }

    fn fail_intent(&mut self, id: MessageId, reason: ProtocolError, outputs: &mut Vec<VmOutput>) {
        if self.intents.remove(&id).is_none() {
            // not tied to a program we own, surface it anyway
            outputs.push(VmOutput::Err {
                pid: None,
                error: reason.into(),
            });
            return;
        }
        let pid = ProgramId(id.pid);
        if self.programs.contains_key(&pid) {
            self.fail_program(pid, reason.into(), outputs);
        }
    }
}

impl Reducer for Vm {
    type Input = VmMessage;
    type Output = VmOutput;

    fn reduce(&mut self, input: VmMessage) -> Reduction<VmOutput> {
        let mut outputs = Vec::new();
        match input {
            VmMessage::Exec { program } => self.exec(program, &mut outputs),
            VmMessage::Rpc(rpc) => self.invoke(rpc, &mut outputs),
            VmMessage::CheckDeadline { now } => self.check_deadlines(now, &mut outputs),
        }
        self.pump_children(&mut outputs);
        match outputs.len() {
            0 => Reduction::None,
            1 => Reduction::One(outputs.remove(0)),
            _ => Reduction::Many(outputs),
        }
    }
}
