use crate::jvm::class_file::{Constant, ConstantLookup};
use crate::jvm::code::{Instruction, Opcode, Operand};
use crate::jvm::{FieldType, MethodDescriptor, ParseDescriptor};
use crate::util::Width;

/// Operand stack slots popped and pushed by one instruction
///
/// Slots are counted the way the JVM counts them: `long` and `double` values take two.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct StackEffect {
    pub consuming: usize,
    pub producing: usize,
}

impl StackEffect {
    pub const fn new(consuming: usize, producing: usize) -> StackEffect {
        StackEffect {
            consuming,
            producing,
        }
    }

    /// Compute the effect of an instruction
    ///
    /// Most opcodes have a fixed effect. Field accesses, invocations, constant loads, and
    /// `multianewarray` depend on their operand, and return `None` when the constants they refer
    /// to cannot be resolved.
    pub fn of(instruction: &Instruction, constants: &impl ConstantLookup) -> Option<StackEffect> {
        if let Some((consuming, producing)) = instruction.opcode.fixed_stack_effect() {
            return Some(StackEffect::new(consuming.into(), producing.into()));
        }

        let effect = match instruction.opcode {
            Opcode::Ldc | Opcode::LdcW | Opcode::Ldc2W => {
                let width = match instruction.loaded_constant(constants) {
                    Some(Constant::Long(_) | Constant::Double(_)) => 2,
                    Some(Constant::Dynamic { .. }) => {
                        let descriptor = instruction
                            .constant_index()
                            .and_then(|index| constants.call_site(index).ok())
                            .map(|(_, descriptor)| descriptor);
                        descriptor.map_or(1, field_width)
                    }
                    Some(_) => 1,
                    None if instruction.opcode == Opcode::Ldc2W => 2,
                    None => 1,
                };
                StackEffect::new(0, width)
            }

            Opcode::Getstatic | Opcode::Putstatic | Opcode::Getfield | Opcode::Putfield => {
                let width = field_width(instruction.descriptor(constants)?);
                match instruction.opcode {
                    Opcode::Getstatic => StackEffect::new(0, width),
                    Opcode::Putstatic => StackEffect::new(width, 0),
                    Opcode::Getfield => StackEffect::new(1, width),
                    _ => StackEffect::new(1 + width, 0),
                }
            }

            Opcode::Invokevirtual
            | Opcode::Invokespecial
            | Opcode::Invokestatic
            | Opcode::Invokeinterface
            | Opcode::Invokedynamic => {
                let descriptor = MethodDescriptor::parse(instruction.descriptor(constants)?).ok()?;
                let has_receiver =
                    !matches!(instruction.opcode, Opcode::Invokestatic | Opcode::Invokedynamic);
                StackEffect::new(
                    descriptor.parameter_length(has_receiver),
                    descriptor.return_length(),
                )
            }

            Opcode::Multianewarray => match instruction.operand {
                Operand::MultiANewArray { dimensions, .. } => {
                    StackEffect::new(dimensions.into(), 1)
                }
                _ => return None,
            },

            _ => return None,
        };
        Some(effect)
    }
}

/// Slots taken by a value of the given field descriptor (one if the descriptor is malformed)
fn field_width(descriptor: &str) -> usize {
    FieldType::parse(descriptor).map_or(1, |field_type| field_type.width())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{ConstantIndex, ConstantsPool, NameAndTypeConstantIndex};
    use crate::jvm::code::{ConstantOperand, InstructionList};

    fn name_and_type(
        constants: &mut ConstantsPool,
        name: &str,
        descriptor: &str,
    ) -> NameAndTypeConstantIndex {
        let name = constants.get_utf8(name).unwrap();
        let descriptor = constants.get_utf8(descriptor).unwrap();
        constants.get_name_and_type(name, descriptor).unwrap()
    }

    fn single(opcode: Opcode, operand: Operand) -> Instruction {
        let mut instructions = InstructionList::new();
        instructions.push(opcode, operand).unwrap();
        instructions.into_vec().remove(0)
    }

    #[test]
    fn fixed_effects() {
        let constants = ConstantsPool::new();
        let iadd = single(Opcode::Iadd, Operand::None);
        assert_eq!(StackEffect::of(&iadd, &constants), Some(StackEffect::new(2, 1)));
        let dup2 = single(Opcode::Dup2, Operand::None);
        assert_eq!(StackEffect::of(&dup2, &constants), Some(StackEffect::new(2, 4)));
    }

    #[test]
    fn field_effects_use_the_descriptor() {
        let mut constants = ConstantsPool::new();
        let class = constants.get_class("Point").unwrap();
        let x = name_and_type(&mut constants, "x", "D");
        let y = name_and_type(&mut constants, "y", "I");
        let x = constants.get_field_ref(class, x).unwrap();
        let y = constants.get_field_ref(class, y).unwrap();

        let effect = |opcode, index: ConstantIndex| {
            StackEffect::of(&single(opcode, Operand::Reference(index)), &constants)
        };
        assert_eq!(effect(Opcode::Getfield, x.into()), Some(StackEffect::new(1, 2)));
        assert_eq!(effect(Opcode::Putfield, x.into()), Some(StackEffect::new(3, 0)));
        assert_eq!(effect(Opcode::Getstatic, y.into()), Some(StackEffect::new(0, 1)));
        assert_eq!(effect(Opcode::Putstatic, y.into()), Some(StackEffect::new(1, 0)));

        // Index points at the class, not a field
        assert_eq!(effect(Opcode::Getfield, class.into()), None);
        assert_eq!(effect(Opcode::Getfield, ConstantIndex(999)), None);
    }

    #[test]
    fn invocation_effects_count_the_receiver() {
        let mut constants = ConstantsPool::new();
        let class = constants.get_class("Calc").unwrap();
        let add = name_and_type(&mut constants, "add", "(IJ)D");
        let add = constants.get_method_ref(class, add, false).unwrap();
        let run = name_and_type(&mut constants, "run", "()V");
        let run = constants.get_method_ref(class, run, true).unwrap();

        let effect = |opcode, operand| StackEffect::of(&single(opcode, operand), &constants);
        assert_eq!(
            effect(Opcode::Invokestatic, Operand::Reference(add.into())),
            Some(StackEffect::new(3, 2))
        );
        assert_eq!(
            effect(Opcode::Invokevirtual, Operand::Reference(add.into())),
            Some(StackEffect::new(4, 2))
        );
        assert_eq!(
            effect(
                Opcode::Invokeinterface,
                Operand::InvokeInterface {
                    index: run.into(),
                    count: 1
                }
            ),
            Some(StackEffect::new(1, 0))
        );
    }

    #[test]
    fn dynamic_call_sites_have_no_receiver() {
        let mut constants = ConstantsPool::new();
        let apply = name_and_type(&mut constants, "apply", "(JLjava/lang/Object;)I");
        let call = constants.get_invoke_dynamic(0, apply).unwrap();
        let instruction = single(Opcode::Invokedynamic, Operand::InvokeDynamic(call.into()));
        assert_eq!(
            StackEffect::of(&instruction, &constants),
            Some(StackEffect::new(3, 1))
        );
    }

    #[test]
    fn constant_loads_use_the_constant_width() {
        let mut constants = ConstantsPool::new();
        let long = constants.get_long(1 << 40).unwrap();
        let int = constants.get_integer(7).unwrap();

        let effect = |opcode, operand| StackEffect::of(&single(opcode, operand), &constants);
        assert_eq!(
            effect(Opcode::Ldc2W, Operand::Constant(ConstantOperand::Wide(long.0))),
            Some(StackEffect::new(0, 2))
        );
        assert_eq!(
            effect(Opcode::Ldc, Operand::Constant(ConstantOperand::Narrow(int.0 as u8))),
            Some(StackEffect::new(0, 1))
        );
        // Unresolved constants fall back on the opcode
        assert_eq!(
            effect(Opcode::Ldc2W, Operand::Constant(ConstantOperand::Wide(50))),
            Some(StackEffect::new(0, 2))
        );
    }

    #[test]
    fn multianewarray_pops_each_dimension() {
        let mut constants = ConstantsPool::new();
        let class = constants.get_class("[[[I").unwrap();
        let instruction = single(
            Opcode::Multianewarray,
            Operand::MultiANewArray {
                index: class.into(),
                dimensions: 2,
            },
        );
        assert_eq!(
            StackEffect::of(&instruction, &constants),
            Some(StackEffect::new(2, 1))
        );
    }
}
