//! Instruction insertion with relocation, and the cost instrumentation
//! built on top of it.
//!
//! Inserted instructions are placed *before* the instruction they belong
//! to. Every branch target, handler boundary and line entry that pointed at
//! an instrumented instruction is moved to the first inserted instruction,
//! so a jump back to a loop header still executes the header's accounting
//! call.

use smallvec::{smallvec, SmallVec};

use sandbox_types::{Code, Instruction, InvokeKind, MethodRef};

use crate::well_known::{
    is_injected_helper, COST_ACCOUNTER, RECORD_ALLOCATION, RECORD_ARRAY_ALLOCATION,
    RECORD_INVOCATION, RECORD_JUMP,
};

pub(crate) type Insertion = SmallVec<[Instruction; 2]>;

/// Reject bodies whose targets point outside the instruction list, so
/// relocation never indexes out of range.
pub(crate) fn check_targets(code: &Code) -> Result<(), String> {
    let len = code.instructions.len() as u32;
    for (pc, insn) in code.instructions.iter().enumerate() {
        if let Some(target) = insn.branch_target() {
            if target >= len {
                return Err(format!("branch at {} targets {} outside the method", pc, target));
            }
        }
    }
    for handler in &code.handlers {
        if handler.start >= handler.end || handler.end > len || handler.handler >= len {
            return Err(format!(
                "handler [{}, {}) -> {} outside the method",
                handler.start, handler.end, handler.handler
            ));
        }
    }
    if code.lines.iter().any(|l| l.start_pc >= len) {
        return Err("line number entry outside the method".to_string());
    }
    Ok(())
}

/// Insert instructions chosen by `choose` in front of each instruction.
/// Returns whether anything was inserted.
pub(crate) fn insert_before(code: &mut Code, mut choose: impl FnMut(usize, &Instruction) -> Insertion) -> bool {
    let original = std::mem::take(&mut code.instructions);
    let mut relocated = Vec::with_capacity(original.len() + 1);
    let mut out = Vec::with_capacity(original.len());
    for (pc, insn) in original.into_iter().enumerate() {
        relocated.push(out.len() as u32);
        out.extend(choose(pc, &insn));
        out.push(insn);
    }
    relocated.push(out.len() as u32);

    let inserted = out.len() + 1 != relocated.len();
    if inserted {
        for insn in &mut out {
            if let Some(target) = insn.branch_target_mut() {
                *target = relocated[*target as usize];
            }
        }
        for handler in &mut code.handlers {
            handler.start = relocated[handler.start as usize];
            handler.end = relocated[handler.end as usize];
            handler.handler = relocated[handler.handler as usize];
        }
        for line in &mut code.lines {
            line.start_pc = relocated[line.start_pc as usize];
        }
    }
    code.instructions = out;
    inserted
}

fn accounter_call(name: &str, descriptor: &str) -> Instruction {
    Instruction::Invoke {
        kind: InvokeKind::Static,
        method: MethodRef::new(COST_ACCOUNTER, name, descriptor),
    }
}

/// Accounting calls for one instruction.
fn accounting_for(pc: usize, insn: &Instruction) -> Insertion {
    match insn {
        Instruction::Invoke { method, .. } if !is_injected_helper(&method.owner) => {
            smallvec![accounter_call(RECORD_INVOCATION, "()V")]
        }
        Instruction::New(_) => smallvec![accounter_call(RECORD_ALLOCATION, "()V")],
        // The length is still needed by the allocation itself.
        Instruction::NewArray(_) => smallvec![
            Instruction::Dup,
            accounter_call(RECORD_ARRAY_ALLOCATION, "(I)V")
        ],
        _ => match insn.branch_target() {
            Some(target) if target as usize <= pc => smallvec![accounter_call(RECORD_JUMP, "()V")],
            _ => SmallVec::new(),
        },
    }
}

/// Add cost accounting to a method body.
pub(crate) fn instrument_costs(code: &mut Code) -> bool {
    insert_before(code, accounting_for)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_types::{AccessFlags, ClassBuilder, Condition, ExceptionHandler, LineNumber};

    fn body(builder: ClassBuilder) -> Code {
        builder.build().unwrap().methods.remove(0).code.unwrap()
    }

    fn is_call(insn: &Instruction, name: &str) -> bool {
        matches!(insn, Instruction::Invoke { method, .. } if method.owner == COST_ACCOUNTER && method.name == name)
    }

    #[test]
    fn test_backward_branch_is_counted_and_relocated() {
        // while (true) {}
        let mut code = body(ClassBuilder::new("com/Loop").method("spin", "()V", AccessFlags::STATIC, |code| {
            let top = code.new_label();
            code.bind(top);
            code.goto(top);
        }));
        assert!(instrument_costs(&mut code));
        assert_eq!(code.instructions.len(), 2);
        assert!(is_call(&code.instructions[0], RECORD_JUMP));
        assert_eq!(code.instructions[1], Instruction::Goto(0));
    }

    #[test]
    fn test_forward_branch_is_free() {
        let mut code = body(ClassBuilder::new("com/If").method("f", "(I)I", AccessFlags::STATIC, |code| {
            let done = code.new_label();
            code.load(0).if_zero(Condition::Eq, done);
            code.push_int(1).return_value();
            code.bind(done);
            code.push_int(0).return_value();
        }));
        assert!(!instrument_costs(&mut code));
    }

    #[test]
    fn test_allocations_and_invocations() {
        let mut code = body(ClassBuilder::new("com/Alloc").method("f", "()V", AccessFlags::STATIC, |code| {
            code.new_object("com/Thing")
                .invoke_special("com/Thing", "<init>", "()V")
                .push_int(3)
                .new_array("I")
                .emit(Instruction::Pop)
                .return_void();
        }));
        assert!(instrument_costs(&mut code));
        let insns = &code.instructions;
        assert!(is_call(&insns[0], RECORD_ALLOCATION));
        assert_eq!(insns[1], Instruction::New("com/Thing".to_string()));
        assert!(is_call(&insns[2], RECORD_INVOCATION));
        assert_eq!(insns[4], Instruction::Push(sandbox_types::Constant::Int(3)));
        assert_eq!(insns[5], Instruction::Dup);
        assert!(is_call(&insns[6], RECORD_ARRAY_ALLOCATION));
        assert_eq!(insns[7], Instruction::NewArray("I".to_string()));
    }

    #[test]
    fn test_handlers_and_lines_follow_their_instructions() {
        let mut code = Code {
            max_locals: 1,
            instructions: vec![
                Instruction::Invoke {
                    kind: InvokeKind::Static,
                    method: MethodRef::new("com/A", "work", "()V"),
                },
                Instruction::Return,
                Instruction::Store(0),
                Instruction::Return,
            ],
            handlers: vec![ExceptionHandler {
                start: 0,
                end: 1,
                handler: 2,
                catch_type: None,
            }],
            lines: vec![LineNumber { start_pc: 0, line: 3 }, LineNumber { start_pc: 2, line: 5 }],
        };
        instrument_costs(&mut code);
        assert_eq!(code.handlers[0], ExceptionHandler {
            start: 0,
            end: 2,
            handler: 3,
            catch_type: None,
        });
        assert_eq!(code.line_for(3), Some(5));
        assert_eq!(code.line_for(1), Some(3));
    }

    #[test]
    fn test_out_of_range_target_is_rejected() {
        let code = Code {
            max_locals: 0,
            instructions: vec![Instruction::Goto(7)],
            handlers: vec![],
            lines: vec![],
        };
        assert!(check_targets(&code).is_err());
    }
}
