//! Textual listing of a program's methods, in the spirit of `javap -c`.
use std::fmt::{self, Write};

use byteorder::{BigEndian, ByteOrder};

use crate::bytecode::OPCode;
use crate::program::{Method, Program};

/// Displays every method of a program.
pub struct Disassembly<'a>(pub &'a Program);

impl fmt::Display for Disassembly<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "class {}", self.0.class_name())?;
        for method in self.0.methods() {
            f.write_char('\n')?;
            disassemble_method(self.0, method, f)?;
        }
        Ok(())
    }
}

/// Disassemble every method of `program`.
pub fn disassemble(program: &Program) -> String {
    Disassembly(program).to_string()
}

/// Disassemble a single method into `out`.
pub fn disassemble_method<W: Write>(
    program: &Program,
    method: &Method,
    out: &mut W,
) -> fmt::Result {
    writeln!(
        out,
        "{}{} (max_stack={}, max_locals={})",
        method.name(),
        method.descriptor(),
        method.max_stack(),
        method.max_locals()
    )?;
    let Some(code) = method.code() else {
        return out.write_str("  <no code>\n");
    };

    let mut pc = 0;
    while pc < code.len() {
        let opcode = match OPCode::try_from(code[pc]) {
            Ok(opcode) => opcode,
            Err(byte) => return writeln!(out, "  {pc:4}: <unknown {byte:#04x}>"),
        };
        let Some(operands) = code.get(pc + 1..pc + opcode.width()) else {
            return writeln!(out, "  {pc:4}: {opcode} <truncated>");
        };
        write!(out, "  {pc:4}: {opcode}")?;
        write_operands(program, opcode, pc, operands, out)?;
        out.write_char('\n')?;
        pc += opcode.width();
    }
    Ok(())
}

fn write_operands<W: Write>(
    program: &Program,
    opcode: OPCode,
    pc: usize,
    operands: &[u8],
    out: &mut W,
) -> fmt::Result {
    match opcode {
        OPCode::BiPush => write!(out, " {}", operands[0] as i8),
        OPCode::SiPush => write!(out, " {}", BigEndian::read_i16(operands)),
        OPCode::Ldc => {
            let index = operands[0];
            match program.integer_constant(u16::from(index)) {
                Ok(value) => write!(out, " #{index} // int {value}"),
                Err(_) => write!(out, " #{index}"),
            }
        }
        OPCode::ILoad | OPCode::ALoad | OPCode::IStore | OPCode::AStore => {
            write!(out, " {}", operands[0])
        }
        OPCode::IInc => write!(out, " {}, {}", operands[0], operands[1] as i8),
        OPCode::NewArray => write!(out, " {}", array_type(operands[0])),
        OPCode::GetStatic | OPCode::InvokeVirtual => {
            write!(out, " #{}", BigEndian::read_u16(operands))
        }
        OPCode::InvokeStatic => {
            let index = BigEndian::read_u16(operands);
            match program.constant_pool().method_ref(index as usize) {
                Ok((name, descriptor)) => write!(out, " #{index} // {name}{descriptor}"),
                Err(_) => write!(out, " #{index}"),
            }
        }
        op if op.is_branch() => {
            let target = pc as i64 + i64::from(BigEndian::read_i16(operands));
            write!(out, " {target}")
        }
        _ => Ok(()),
    }
}

fn array_type(atype: u8) -> &'static str {
    match atype {
        4 => "boolean",
        5 => "char",
        6 => "float",
        7 => "double",
        8 => "byte",
        9 => "short",
        10 => "int",
        11 => "long",
        _ => "?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvm::ConstantPool;
    use pretty_assertions::assert_eq;

    #[test]
    fn lists_instructions_with_operands() {
        let code = vec![
            u8::from(OPCode::BiPush),
            0xfb,
            u8::from(OPCode::IStore1),
            u8::from(OPCode::IInc),
            1,
            0xff,
            u8::from(OPCode::ILoad1),
            u8::from(OPCode::IfNe),
            0xff,
            0xfc,
            u8::from(OPCode::Return),
        ];
        let method = Method::new("main", "([Ljava/lang/String;)V", 1, 2, code).unwrap();
        let program = Program::from_parts("Loop", ConstantPool::default(), vec![method]);
        assert_eq!(
            disassemble(&program),
            "class Loop\n\
             \n\
             main([Ljava/lang/String;)V (max_stack=1, max_locals=2)\n\
             \x20    0: bipush -5\n\
             \x20    2: istore_1\n\
             \x20    3: iinc 1, -1\n\
             \x20    6: iload_1\n\
             \x20    7: ifne 3\n\
             \x20   10: return\n"
        );
    }

    #[test]
    fn stops_at_unknown_opcode() {
        let method = Method::new("f", "()V", 0, 0, vec![0x00, 0xca, 0xb1]).unwrap();
        let program = Program::from_parts("Bad", ConstantPool::default(), vec![method.clone()]);
        let mut out = String::new();
        disassemble_method(&program, &method, &mut out).unwrap();
        assert_eq!(
            out,
            "f()V (max_stack=0, max_locals=0)\n     0: nop\n     1: <unknown 0xca>\n"
        );
    }
}
