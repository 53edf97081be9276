//! Programs for the stack-machine interpreter.
//!
//! A [`Program`] executes instructions over public and secret-shared
//! values. Purely local instructions run to completion; instructions that
//! need distributed work (randomness, multiplication, opening) allocate a
//! pending result slot keyed by the program counter, emit an [`Intent`]
//! and suspend. The dispatcher later fills the slot and re-enters
//! [`Program::exec`], which resumes at the same instruction and advances
//! only once every slot of that instruction is filled. The code sequence
//! itself is immutable, so execution is deterministic and restart-safe.

use std::collections::HashMap;
use std::sync::Arc;

use mpc_core::algebra::FieldElement;
use mpc_core::shamir::Share;
use mpc_tasks::MessageId;
use serde::{Deserialize, Serialize};

use crate::stack::Stack;

/// A program's unique 32-byte identifier, shared by every participant
/// executing the same computation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramId(pub [u8; 32]);

/// A memory address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Addr(pub u64);

/// Random-access program memory.
pub type Memory = HashMap<Addr, Value>;

/// An immutable instruction sequence.
pub type Code = Arc<[Instr]>;

/// A value on the stack or in memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// A plaintext field element observable by all participants.
    Public(FieldElement),
    /// This participant's Shamir share of a secret value.
    Private(Share),
    /// A double sharing of one random value: rho at degree k-1 and sigma
    /// at degree 2(k-1), consumed by the multiplication protocol.
    PrivateRn {
        /// The degree-(k-1) share.
        rho: Share,
        /// The degree-2(k-1) share.
        sigma: Share,
    },
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Public(_) => "public",
            Value::Private(_) => "private",
            Value::PrivateRn { .. } => "private rn",
        }
    }
}

/// Errors terminating a program.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProgramError {
    /// An instruction popped more values than the stack holds.
    #[error("stack underflow at instruction {pc}")]
    StackUnderflow {
        /// Instruction counter of the faulting instruction.
        pc: u64,
    },
    /// An operand had the wrong variant for the instruction.
    #[error("instruction {pc} expected a {expected} value, got {got}")]
    UnexpectedValue {
        /// What the instruction required.
        expected: &'static str,
        /// What the stack held.
        got: &'static str,
        /// Instruction counter of the faulting instruction.
        pc: u64,
    },
    /// The program counter ran past the end of the code with nothing to
    /// return.
    #[error("code overflow at instruction {pc}")]
    CodeOverflow {
        /// Value of the overflowing counter.
        pc: u64,
    },
    /// A load from an address nothing was stored at.
    #[error("nothing stored at address {addr} (instruction {pc})")]
    UnknownAddr {
        /// The unmapped address.
        addr: u64,
        /// Instruction counter of the faulting instruction.
        pc: u64,
    },
    /// A result was delivered into a slot that is already filled: the
    /// program was resumed prematurely.
    #[error("result slot at instruction {pc} is already filled")]
    SlotOccupied {
        /// Instruction counter owning the slot.
        pc: u64,
    },
    /// A result was delivered for an instruction that is not suspended.
    #[error("no result slot pending at instruction {pc}")]
    NoPendingSlot {
        /// Instruction counter the delivery targeted.
        pc: u64,
    },
    /// Two private operands sit at different share indices.
    #[error("operand shares sit at different indices (instruction {pc})")]
    IndexMismatch {
        /// Instruction counter of the faulting instruction.
        pc: u64,
    },
    /// A protocol delivered an empty result batch.
    #[error("empty result delivered at instruction {pc}")]
    EmptyResult {
        /// Instruction counter of the faulting instruction.
        pc: u64,
    },
}

/// Bytecode of the interpreter.
///
/// Arithmetic instructions pop their operands (right-hand side first) and
/// push the result. `Rand`, `Mul` and `Open` suspend the program until the
/// corresponding protocol result is delivered.
#[derive(Clone, Debug)]
pub enum Instr {
    /// Pushes the value onto the stack.
    Push(Value),
    /// Pops rhs, pops lhs, pushes lhs + rhs. Public and private values
    /// mix; a public constant is lifted onto the share's y-coordinate.
    Add,
    /// Pops rhs, pops lhs, pushes lhs - rhs.
    Sub,
    /// Pops a value and pushes its negation.
    Neg,
    /// Suspends until the randomness protocol delivers a (rho, sigma)
    /// double sharing; pushes it as one `PrivateRn` value.
    Rand,
    /// Suspends until the randomness protocol delivers a fresh uniform
    /// sharing; pushes it as a `Private` value.
    RandShare,
    /// Suspends until the randomness protocol delivers a sharing of zero;
    /// pushes it as a `Private` value.
    RandZero,
    /// Pops rn (`PrivateRn`), y (`Private`), x (`Private`); suspends on
    /// the multiplication protocol; pushes the `Private` product share.
    Mul,
    /// Pops a value. A `Private` share suspends on the open protocol and
    /// pushes the revealed `Public` plaintext; a `Public` value passes
    /// through unchanged.
    Open,
    /// Pops a value and stores it at the address.
    Store(Addr),
    /// Copies the value at the address onto the stack.
    Load(Addr),
}

/// Identifies one suspended instruction: program id plus the instruction
/// counter it suspended at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntentId {
    /// The owning program.
    pub pid: ProgramId,
    /// The suspended instruction's counter.
    pub pc: u64,
}

impl IntentId {
    /// The protocol-level message id correlating this intent's work.
    pub fn message_id(self) -> MessageId {
        MessageId::new(self.pid.0, self.pc)
    }

    /// Recovers the intent id from a protocol message id.
    pub fn from_message_id(id: MessageId) -> Self {
        Self {
            pid: ProgramId(id.pid),
            pc: id.tag,
        }
    }
}

/// The interpreter's request for external work, or its terminal outcome.
#[derive(Clone, Debug)]
pub enum Intent {
    /// Generate `batch` fresh uniform sharings.
    Rn {
        /// Correlation id.
        id: IntentId,
        /// Number of sharings requested.
        batch: usize,
    },
    /// Generate `batch` sharings of zero.
    RnZero {
        /// Correlation id.
        id: IntentId,
        /// Number of sharings requested.
        batch: usize,
    },
    /// Generate `batch` double sharings for multiplication.
    RnTuple {
        /// Correlation id.
        id: IntentId,
        /// Number of double sharings requested.
        batch: usize,
    },
    /// Multiply xs and ys elementwise using the double sharing (rhos,
    /// sigmas).
    Multiply {
        /// Correlation id.
        id: IntentId,
        /// Left factors.
        xs: Vec<Share>,
        /// Right factors.
        ys: Vec<Share>,
        /// Degree-(k-1) halves of the double sharings.
        rhos: Vec<Share>,
        /// Degree-2(k-1) halves of the double sharings.
        sigmas: Vec<Share>,
    },
    /// Reveal the shared values.
    Open {
        /// Correlation id.
        id: IntentId,
        /// This participant's shares of the values to reveal.
        shares: Vec<Share>,
    },
    /// The program terminated; `values` is its return region.
    Exit {
        /// The terminating program.
        pid: ProgramId,
        /// Returned values, bottom of the stack first.
        values: Vec<Value>,
    },
    /// The program faulted.
    Error {
        /// The terminating program.
        pid: ProgramId,
        /// Why it terminated.
        error: ProgramError,
    },
}

/// Outcome of driving a program.
#[derive(Clone, Debug)]
pub enum Return {
    /// The program suspended on an intent or terminated.
    Intent(Intent),
    /// The program is still waiting on a previously issued intent; it was
    /// re-entered before all of its result slots were filled.
    Pending,
}

#[derive(Clone, Debug)]
enum PendingSlots {
    Tuple {
        rhos: Option<Vec<Share>>,
        sigmas: Option<Vec<Share>>,
    },
    Shares(Option<Vec<Share>>),
    Values(Option<Vec<FieldElement>>),
}

enum Step {
    Continue,
    Suspend(Intent),
    Stalled,
}

/// One participant's instance of a computation: immutable code plus the
/// mutable stack, memory, counter and pending result slots.
#[derive(Clone, Debug)]
pub struct Program {
    id: ProgramId,
    stack: Stack<Value>,
    memory: Memory,
    code: Code,
    pc: u64,
    pending: HashMap<u64, PendingSlots>,
}

impl Program {
    /// Creates a program with empty memory.
    pub fn new(id: ProgramId, code: Vec<Instr>) -> Self {
        Self::with_memory(id, code, Memory::new())
    }

    /// Creates a program with preloaded memory.
    pub fn with_memory(id: ProgramId, code: Vec<Instr>, memory: Memory) -> Self {
        Self {
            id,
            stack: Stack::default(),
            memory,
            code: Arc::from(code),
            pc: 0,
            pending: HashMap::new(),
        }
    }

    /// The program's id.
    pub fn id(&self) -> ProgramId {
        self.id
    }

    /// Drives the program until it suspends or terminates.
    ///
    /// Running past the end of the code with a non-empty stack terminates
    /// the program with [`Intent::Exit`] carrying the remaining stack as
    /// the return region; with an empty stack it is a code overflow.
    pub fn exec(&mut self) -> Return {
        loop {
            let pc = self.pc;
            let Some(instr) = self.code.get(pc as usize) else {
                if self.stack.is_empty() {
                    return Return::Intent(Intent::Error {
                        pid: self.id,
                        error: ProgramError::CodeOverflow { pc },
                    });
                }
                return Return::Intent(Intent::Exit {
                    pid: self.id,
                    values: self.stack.drain(),
                });
            };
            match self.step(pc, instr.clone()) {
                Ok(Step::Continue) => {}
                Ok(Step::Suspend(intent)) => return Return::Intent(intent),
                Ok(Step::Stalled) => return Return::Pending,
                Err(error) => {
                    return Return::Intent(Intent::Error {
                        pid: self.id,
                        error,
                    })
                }
            }
        }
    }

    /// Fills the (rho, sigma) slots of the `Rand` instruction suspended at
    /// `pc`.
    pub fn deliver_tuple(
        &mut self,
        pc: u64,
        rhos: Vec<Share>,
        sigmas: Vec<Share>,
    ) -> Result<(), ProgramError> {
        match self.pending.get_mut(&pc) {
            Some(PendingSlots::Tuple {
                rhos: rho_slot,
                sigmas: sigma_slot,
            }) => {
                if rho_slot.is_some() || sigma_slot.is_some() {
                    return Err(ProgramError::SlotOccupied { pc });
                }
                *rho_slot = Some(rhos);
                *sigma_slot = Some(sigmas);
                Ok(())
            }
            _ => Err(ProgramError::NoPendingSlot { pc }),
        }
    }

    /// Fills the share slot of the `RandShare`, `RandZero` or `Mul`
    /// instruction suspended at `pc`.
    pub fn deliver_shares(&mut self, pc: u64, shares: Vec<Share>) -> Result<(), ProgramError> {
        match self.pending.get_mut(&pc) {
            Some(PendingSlots::Shares(slot)) => {
                if slot.is_some() {
                    return Err(ProgramError::SlotOccupied { pc });
                }
                *slot = Some(shares);
                Ok(())
            }
            _ => Err(ProgramError::NoPendingSlot { pc }),
        }
    }

    /// Fills the plaintext slot of the `Open` instruction suspended at
    /// `pc`.
    pub fn deliver_values(
        &mut self,
        pc: u64,
        values: Vec<FieldElement>,
    ) -> Result<(), ProgramError> {
        match self.pending.get_mut(&pc) {
            Some(PendingSlots::Values(slot)) => {
                if slot.is_some() {
                    return Err(ProgramError::SlotOccupied { pc });
                }
                *slot = Some(values);
                Ok(())
            }
            _ => Err(ProgramError::NoPendingSlot { pc }),
        }
    }

    fn step(&mut self, pc: u64, instr: Instr) -> Result<Step, ProgramError> {
        match instr {
            Instr::Push(value) => {
                self.stack.push(value);
                self.advance();
                Ok(Step::Continue)
            }
            Instr::Add => {
                let rhs = self.pop(pc)?;
                let lhs = self.pop(pc)?;
                self.stack.push(add_values(lhs, rhs, pc)?);
                self.advance();
                Ok(Step::Continue)
            }
            Instr::Sub => {
                let rhs = self.pop(pc)?;
                let lhs = self.pop(pc)?;
                self.stack.push(sub_values(lhs, rhs, pc)?);
                self.advance();
                Ok(Step::Continue)
            }
            Instr::Neg => {
                let value = self.pop(pc)?;
                self.stack.push(neg_value(value, pc)?);
                self.advance();
                Ok(Step::Continue)
            }
            Instr::Store(addr) => {
                let value = self.pop(pc)?;
                self.memory.insert(addr, value);
                self.advance();
                Ok(Step::Continue)
            }
            Instr::Load(addr) => {
                let value = self
                    .memory
                    .get(&addr)
                    .cloned()
                    .ok_or(ProgramError::UnknownAddr { addr: addr.0, pc })?;
                self.stack.push(value);
                self.advance();
                Ok(Step::Continue)
            }
            Instr::Rand => self.step_rand_tuple(pc),
            Instr::RandShare => self.step_rand_single(pc, false),
            Instr::RandZero => self.step_rand_single(pc, true),
            Instr::Mul => self.step_mul(pc),
            Instr::Open => self.step_open(pc),
        }
    }

    fn step_rand_tuple(&mut self, pc: u64) -> Result<Step, ProgramError> {
        if !self.pending.contains_key(&pc) {
            self.pending.insert(
                pc,
                PendingSlots::Tuple {
                    rhos: None,
                    sigmas: None,
                },
            );
            return Ok(Step::Suspend(Intent::RnTuple {
                id: self.intent_id(pc),
                batch: 1,
            }));
        }

        let slots = self.pending.get_mut(&pc).expect("pending slot exists");
        let PendingSlots::Tuple { rhos, sigmas } = slots else {
            return Err(ProgramError::NoPendingSlot { pc });
        };
        if rhos.is_none() || sigmas.is_none() {
            return Ok(Step::Stalled);
        }
        let rhos = rhos.take().expect("slot checked above");
        let sigmas = sigmas.take().expect("slot checked above");
        self.pending.remove(&pc);
        let rho = rhos
            .into_iter()
            .next()
            .ok_or(ProgramError::EmptyResult { pc })?;
        let sigma = sigmas
            .into_iter()
            .next()
            .ok_or(ProgramError::EmptyResult { pc })?;
        self.stack.push(Value::PrivateRn { rho, sigma });
        self.advance();
        Ok(Step::Continue)
    }

    fn step_rand_single(&mut self, pc: u64, zero: bool) -> Result<Step, ProgramError> {
        if !self.pending.contains_key(&pc) {
            self.pending.insert(pc, PendingSlots::Shares(None));
            let id = self.intent_id(pc);
            let intent = if zero {
                Intent::RnZero { id, batch: 1 }
            } else {
                Intent::Rn { id, batch: 1 }
            };
            return Ok(Step::Suspend(intent));
        }
        self.resume_shares(pc)
    }

    fn step_mul(&mut self, pc: u64) -> Result<Step, ProgramError> {
        if self.pending.contains_key(&pc) {
            return self.resume_shares(pc);
        }

        let (rho, sigma) = match self.pop(pc)? {
            Value::PrivateRn { rho, sigma } => (rho, sigma),
            other => {
                return Err(ProgramError::UnexpectedValue {
                    expected: "private rn",
                    got: other.kind(),
                    pc,
                });
            }
        };
        let y = self.pop_private(pc)?;
        let x = self.pop_private(pc)?;
        if x.index() != y.index() || x.index() != rho.index() || x.index() != sigma.index() {
            return Err(ProgramError::IndexMismatch { pc });
        }
        self.pending.insert(pc, PendingSlots::Shares(None));
        Ok(Step::Suspend(Intent::Multiply {
            id: self.intent_id(pc),
            xs: vec![x],
            ys: vec![y],
            rhos: vec![rho],
            sigmas: vec![sigma],
        }))
    }

    fn resume_shares(&mut self, pc: u64) -> Result<Step, ProgramError> {
        let slots = self.pending.get_mut(&pc).expect("pending slot exists");
        let PendingSlots::Shares(slot) = slots else {
            return Err(ProgramError::NoPendingSlot { pc });
        };
        let Some(shares) = slot.take() else {
            return Ok(Step::Stalled);
        };
        self.pending.remove(&pc);
        let share = shares
            .into_iter()
            .next()
            .ok_or(ProgramError::EmptyResult { pc })?;
        self.stack.push(Value::Private(share));
        self.advance();
        Ok(Step::Continue)
    }

    fn resume_values(&mut self, pc: u64) -> Result<Step, ProgramError> {
        let slots = self.pending.get_mut(&pc).expect("pending slot exists");
        let PendingSlots::Values(slot) = slots else {
            return Err(ProgramError::NoPendingSlot { pc });
        };
        let Some(values) = slot.take() else {
            return Ok(Step::Stalled);
        };
        self.pending.remove(&pc);
        let value = values
            .into_iter()
            .next()
            .ok_or(ProgramError::EmptyResult { pc })?;
        self.stack.push(Value::Public(value));
        self.advance();
        Ok(Step::Continue)
    }

    fn step_open(&mut self, pc: u64) -> Result<Step, ProgramError> {
        if self.pending.contains_key(&pc) {
            return self.resume_values(pc);
        }

        let value = self.pop(pc)?;
        match value {
            // opening a public value is the identity
            Value::Public(_) => {
                self.stack.push(value);
                self.advance();
                Ok(Step::Continue)
            }
            Value::Private(share) => {
                self.pending.insert(pc, PendingSlots::Values(None));
                Ok(Step::Suspend(Intent::Open {
                    id: self.intent_id(pc),
                    shares: vec![share],
                }))
            }
            Value::PrivateRn { .. } => Err(ProgramError::UnexpectedValue {
                expected: "private",
                got: "private rn",
                pc,
            }),
        }
    }

    fn intent_id(&self, pc: u64) -> IntentId {
        IntentId { pid: self.id, pc }
    }

    fn advance(&mut self) {
        self.pc += 1;
    }

    fn pop(&mut self, pc: u64) -> Result<Value, ProgramError> {
        self.stack.pop().ok_or(ProgramError::StackUnderflow { pc })
    }

    fn pop_private(&mut self, pc: u64) -> Result<Share, ProgramError> {
        let value = self.pop(pc)?;
        match value {
            Value::Private(share) => Ok(share),
            other => Err(ProgramError::UnexpectedValue {
                expected: "private",
                got: other.kind(),
                pc,
            }),
        }
    }
}

fn add_values(lhs: Value, rhs: Value, pc: u64) -> Result<Value, ProgramError> {
    match (lhs, rhs) {
        (Value::Public(a), Value::Public(b)) => Ok(Value::Public(&a + &b)),
        (Value::Public(c), Value::Private(s)) | (Value::Private(s), Value::Public(c)) => {
            Ok(Value::Private(s.add_public(&c)))
        }
        (Value::Private(a), Value::Private(b)) => {
            if a.index() != b.index() {
                return Err(ProgramError::IndexMismatch { pc });
            }
            Ok(Value::Private(&a + &b))
        }
        (lhs, rhs) => Err(unexpected_rn(lhs, rhs, pc)),
    }
}

fn sub_values(lhs: Value, rhs: Value, pc: u64) -> Result<Value, ProgramError> {
    match (lhs, rhs) {
        (Value::Public(a), Value::Public(b)) => Ok(Value::Public(&a - &b)),
        (Value::Private(s), Value::Public(c)) => Ok(Value::Private(s.sub_public(&c))),
        (Value::Public(c), Value::Private(s)) => Ok(Value::Private((-&s).add_public(&c))),
        (Value::Private(a), Value::Private(b)) => {
            if a.index() != b.index() {
                return Err(ProgramError::IndexMismatch { pc });
            }
            Ok(Value::Private(&a - &b))
        }
        (lhs, rhs) => Err(unexpected_rn(lhs, rhs, pc)),
    }
}

fn neg_value(value: Value, pc: u64) -> Result<Value, ProgramError> {
    match value {
        Value::Public(a) => Ok(Value::Public(-&a)),
        Value::Private(s) => Ok(Value::Private(-&s)),
        Value::PrivateRn { .. } => Err(ProgramError::UnexpectedValue {
            expected: "public or private",
            got: "private rn",
            pc,
        }),
    }
}

fn unexpected_rn(lhs: Value, rhs: Value, pc: u64) -> ProgramError {
    let got = if matches!(lhs, Value::PrivateRn { .. }) {
        lhs.kind()
    } else {
        rhs.kind()
    };
    ProgramError::UnexpectedValue {
        expected: "public or private",
        got,
        pc,
    }
}

#[cfg(test)]
mod program_test {
    use super::*;
    use mpc_core::algebra::Field;
    use mpc_core::shamir;
    use num_bigint::BigUint;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    fn f251() -> Field {
        Field::new(BigUint::from(251u64)).unwrap()
    }

    fn pid(byte: u8) -> ProgramId {
        ProgramId([byte; 32])
    }

    #[test]
    fn test_public_addition_runs_to_exit() {
        let field = f251();
        let mut program = Program::new(
            pid(1),
            vec![
                Instr::Push(Value::Public(field.from_u64(3))),
                Instr::Push(Value::Public(field.from_u64(4))),
                Instr::Add,
                Instr::Open,
            ],
        );
        let Return::Intent(Intent::Exit { values, .. }) = program.exec() else {
            panic!("expected exit");
        };
        assert_eq!(values, vec![Value::Public(field.from_u64(7))]);
    }

    #[test]
    fn test_store_load_sub_neg() {
        let field = f251();
        let mut program = Program::new(
            pid(2),
            vec![
                Instr::Push(Value::Public(field.from_u64(10))),
                Instr::Store(Addr(0)),
                Instr::Push(Value::Public(field.from_u64(3))),
                Instr::Load(Addr(0)),
                Instr::Sub,
                Instr::Neg,
            ],
        );
        let Return::Intent(Intent::Exit { values, .. }) = program.exec() else {
            panic!("expected exit");
        };
        // -(3 - 10) = 7
        assert_eq!(values, vec![Value::Public(field.from_u64(7))]);
    }

    #[test]
    fn test_stack_underflow_terminates() {
        let mut program = Program::new(pid(3), vec![Instr::Add]);
        let Return::Intent(Intent::Error { error, .. }) = program.exec() else {
            panic!("expected error");
        };
        assert_eq!(error, ProgramError::StackUnderflow { pc: 0 });
    }

    #[test]
    fn test_empty_program_is_code_overflow() {
        let mut program = Program::new(pid(4), Vec::new());
        let Return::Intent(Intent::Error { error, .. }) = program.exec() else {
            panic!("expected error");
        };
        assert_eq!(error, ProgramError::CodeOverflow { pc: 0 });
    }

    #[test]
    fn test_mul_type_mismatch_terminates() {
        let field = f251();
        let mut program = Program::new(
            pid(5),
            vec![Instr::Push(Value::Public(field.from_u64(1))), Instr::Mul],
        );
        let Return::Intent(Intent::Error { error, .. }) = program.exec() else {
            panic!("expected error");
        };
        assert_eq!(
            error,
            ProgramError::UnexpectedValue {
                expected: "private rn",
                got: "public",
                pc: 1,
            }
        );
    }

    #[test]
    fn test_rand_suspends_and_resumes() {
        let field = f251();
        let mut rng = ChaCha12Rng::from_entropy();
        let mut program = Program::new(pid(6), vec![Instr::Rand]);

        let Return::Intent(Intent::RnTuple { id, batch }) = program.exec() else {
            panic!("expected rn tuple intent");
        };
        assert_eq!(batch, 1);
        assert_eq!(id.pc, 0);
        assert_eq!(id.message_id().pid, [6u8; 32]);

        // re-entry before delivery holds at the same instruction
        assert!(matches!(program.exec(), Return::Pending));

        let r = field.from_u64(99);
        let rho = shamir::share(&r, 5, 3, &mut rng).unwrap().swap_remove(0);
        let sigma = shamir::share_with_degree(&r, 5, 4, &mut rng)
            .unwrap()
            .swap_remove(0);
        program
            .deliver_tuple(0, vec![rho.clone()], vec![sigma.clone()])
            .unwrap();

        // a second delivery into the filled slot is rejected
        assert_eq!(
            program
                .deliver_tuple(0, vec![rho.clone()], vec![sigma.clone()])
                .unwrap_err(),
            ProgramError::SlotOccupied { pc: 0 }
        );

        let Return::Intent(Intent::Exit { values, .. }) = program.exec() else {
            panic!("expected exit");
        };
        assert_eq!(values, vec![Value::PrivateRn { rho, sigma }]);
    }

    #[test]
    fn test_open_public_passes_through() {
        let field = f251();
        let mut program = Program::new(
            pid(7),
            vec![Instr::Push(Value::Public(field.from_u64(12))), Instr::Open],
        );
        let Return::Intent(Intent::Exit { values, .. }) = program.exec() else {
            panic!("expected exit");
        };
        assert_eq!(values, vec![Value::Public(field.from_u64(12))]);
    }

    #[test]
    fn test_open_private_suspends() {
        let field = f251();
        let mut rng = ChaCha12Rng::from_entropy();
        let share = shamir::share(&field.from_u64(8), 5, 3, &mut rng)
            .unwrap()
            .swap_remove(2);
        let mut program = Program::new(
            pid(8),
            vec![Instr::Push(Value::Private(share.clone())), Instr::Open],
        );
        let Return::Intent(Intent::Open { id, shares }) = program.exec() else {
            panic!("expected open intent");
        };
        assert_eq!(id.pc, 1);
        assert_eq!(shares, vec![share]);

        program.deliver_values(1, vec![field.from_u64(8)]).unwrap();
        let Return::Intent(Intent::Exit { values, .. }) = program.exec() else {
            panic!("expected exit");
        };
        assert_eq!(values, vec![Value::Public(field.from_u64(8))]);
    }

    #[test]
    fn test_delivery_without_slot_is_rejected() {
        let mut program = Program::new(pid(9), vec![Instr::Rand]);
        assert_eq!(
            program.deliver_shares(0, Vec::new()).unwrap_err(),
            ProgramError::NoPendingSlot { pc: 0 }
        );
    }
}
