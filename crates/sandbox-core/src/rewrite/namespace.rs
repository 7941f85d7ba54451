//! Namespace isolation: every class name a class file mentions is moved
//! into the sandbox namespace, except pinned host classes.

use sandbox_types::descriptor::{rewrite_descriptor, rewrite_type_operand, DescriptorError};
use sandbox_types::names::{is_stitched_interface, sandboxed_reference};
use sandbox_types::{ClassFile, Constant, Instruction};

fn rename_constant(constant: &mut Constant) {
    if let Constant::Class(name) = constant {
        *name = sandboxed_reference(name);
    }
}

fn rename_descriptor(descriptor: &mut String) -> Result<(), DescriptorError> {
    *descriptor = rewrite_descriptor(descriptor, sandboxed_reference)?;
    Ok(())
}

fn rename_instruction(insn: &mut Instruction) -> Result<(), DescriptorError> {
    match insn {
        Instruction::Push(constant) => rename_constant(constant),
        Instruction::New(class) => *class = sandboxed_reference(class),
        Instruction::NewArray(element) => rename_descriptor(element)?,
        Instruction::CheckCast(operand) | Instruction::InstanceOf(operand) => {
            *operand = rewrite_type_operand(operand, sandboxed_reference)?;
        }
        Instruction::GetField(field)
        | Instruction::PutField(field)
        | Instruction::GetStatic(field)
        | Instruction::PutStatic(field) => {
            field.owner = sandboxed_reference(&field.owner);
            rename_descriptor(&mut field.descriptor)?;
        }
        Instruction::Invoke { method, .. } => {
            method.owner = sandboxed_reference(&method.owner);
            rename_descriptor(&mut method.descriptor)?;
        }
        _ => {}
    }
    Ok(())
}

/// Rename a class in place.
pub(crate) fn isolate(class: &mut ClassFile) -> Result<(), DescriptorError> {
    class.name = sandboxed_reference(&class.name);
    class.super_name = class.super_name.as_deref().map(sandboxed_reference);
    for interface in &mut class.interfaces {
        *interface = sandboxed_reference(interface);
    }
    for field in &mut class.fields {
        rename_descriptor(&mut field.descriptor)?;
        if let Some(initial) = &mut field.initial {
            rename_constant(initial);
        }
    }
    for method in &mut class.methods {
        rename_descriptor(&mut method.descriptor)?;
        let Some(code) = &mut method.code else {
            continue;
        };
        for insn in &mut code.instructions {
            rename_instruction(insn)?;
        }
        for handler in &mut code.handlers {
            if let Some(catch_type) = &mut handler.catch_type {
                *catch_type = sandboxed_reference(catch_type);
            }
        }
    }
    Ok(())
}

/// Re-add stitched host interfaces next to their sandboxed twins.
/// `original_interfaces` are the interfaces before renaming.
pub(crate) fn stitch_interfaces(class: &mut ClassFile, original_interfaces: &[String]) -> bool {
    let mut changed = false;
    for interface in original_interfaces.iter().filter(|i| is_stitched_interface(i)) {
        if !class.interfaces.contains(interface) {
            class.interfaces.push(interface.clone());
            changed = true;
        }
    }
    changed
}
