//! Bytecode disassembler. Same shape as the teacher's `debug.rs`
//! (`disassemble_chunk`/`disassemble_instruction` walking the flat code
//! array, one print-helper per operand encoding), expanded to cover every
//! opcode the compiler now emits. Gated behind the `debug_print_code` and
//! `debug_trace_execution` features so it costs nothing in a release build.

use crate::chunk::{Chunk, OpCode};
use crate::value::format_value;

pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    println!("== {name} ==");
    let mut offset = 0;
    while offset < chunk.len() {
        offset = disassemble_instruction(chunk, offset);
    }
}

pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> usize {
    print!("{offset:04} ");
    if offset > 0 && chunk.line_at(offset) == chunk.line_at(offset - 1) {
        print!("   | ");
    } else {
        print!("{:4} ", chunk.line_at(offset));
    }

    let byte = chunk.code[offset];
    let Some(op) = OpCode::from_byte(byte) else {
        println!("Unknown opcode {byte}");
        return offset + 1;
    };

    match op {
        OpCode::Constant => constant_instruction("OP_CONSTANT", chunk, offset),
        OpCode::Nil => simple_instruction("OP_NIL", offset),
        OpCode::True => simple_instruction("OP_TRUE", offset),
        OpCode::False => simple_instruction("OP_FALSE", offset),
        OpCode::Pop => simple_instruction("OP_POP", offset),
        OpCode::GetLocal => byte_instruction("OP_GET_LOCAL", chunk, offset),
        OpCode::SetLocal => byte_instruction("OP_SET_LOCAL", chunk, offset),
        OpCode::GetGlobal => constant_instruction("OP_GET_GLOBAL", chunk, offset),
        OpCode::DefineGlobal => constant_instruction("OP_DEFINE_GLOBAL", chunk, offset),
        OpCode::SetGlobal => constant_instruction("OP_SET_GLOBAL", chunk, offset),
        OpCode::GetUpvalue => byte_instruction("OP_GET_UPVALUE", chunk, offset),
        OpCode::SetUpvalue => byte_instruction("OP_SET_UPVALUE", chunk, offset),
        OpCode::GetProperty => constant_instruction("OP_GET_PROPERTY", chunk, offset),
        OpCode::SetProperty => constant_instruction("OP_SET_PROPERTY", chunk, offset),
        OpCode::GetSuper => constant_instruction("OP_GET_SUPER", chunk, offset),
        OpCode::GetIndex => simple_instruction("OP_GET_INDEX", offset),
        OpCode::SetIndex => simple_instruction("OP_SET_INDEX", offset),
        OpCode::ListInit => simple_instruction("OP_LIST_INIT", offset),
        OpCode::ListData => simple_instruction("OP_LIST_DATA", offset),
        OpCode::MapInit => simple_instruction("OP_MAP_INIT", offset),
        OpCode::MapData => simple_instruction("OP_MAP_DATA", offset),
        OpCode::Equal => simple_instruction("OP_EQUAL", offset),
        OpCode::Greater => simple_instruction("OP_GREATER", offset),
        OpCode::Less => simple_instruction("OP_LESS", offset),
        OpCode::Add => simple_instruction("OP_ADD", offset),
        OpCode::Subtract => simple_instruction("OP_SUBTRACT", offset),
        OpCode::Multiply => simple_instruction("OP_MULTIPLY", offset),
        OpCode::Divide => simple_instruction("OP_DIVIDE", offset),
        OpCode::Not => simple_instruction("OP_NOT", offset),
        OpCode::Negate => simple_instruction("OP_NEGATE", offset),
        OpCode::Print => simple_instruction("OP_PRINT", offset),
        OpCode::Jump => jump_instruction("OP_JUMP", 1, chunk, offset),
        OpCode::JumpIfFalse => jump_instruction("OP_JUMP_IF_FALSE", 1, chunk, offset),
        OpCode::Loop => jump_instruction("OP_LOOP", -1, chunk, offset),
        OpCode::Call => byte_instruction("OP_CALL", chunk, offset),
        OpCode::Invoke => invoke_instruction("OP_INVOKE", chunk, offset),
        OpCode::SuperInvoke => invoke_instruction("OP_SUPER_INVOKE", chunk, offset),
        OpCode::Closure => closure_instruction(chunk, offset),
        OpCode::CloseUpvalue => simple_instruction("OP_CLOSE_UPVALUE", offset),
        OpCode::Return => simple_instruction("OP_RETURN", offset),
        OpCode::Class => constant_instruction("OP_CLASS", chunk, offset),
        OpCode::Inherit => simple_instruction("OP_INHERIT", offset),
        OpCode::Method => constant_instruction("OP_METHOD", chunk, offset),
    }
}

fn simple_instruction(name: &str, offset: usize) -> usize {
    println!("{name}");
    offset + 1
}

fn byte_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let slot = chunk.code[offset + 1];
    println!("{name:<20} {slot:4}");
    offset + 2
}

fn constant_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let constant = chunk.code[offset + 1] as usize;
    print!("{name:<20} {constant:4} '");
    print!("{}", format_value(&chunk.constants[constant]));
    println!("'");
    offset + 2
}

fn invoke_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let constant = chunk.code[offset + 1] as usize;
    let argument_count = chunk.code[offset + 2];
    print!("{name:<20} ({argument_count} args) {constant:4} '");
    print!("{}", format_value(&chunk.constants[constant]));
    println!("'");
    offset + 3
}

fn jump_instruction(name: &str, sign: i32, chunk: &Chunk, offset: usize) -> usize {
    let high = chunk.code[offset + 1] as u16;
    let low = chunk.code[offset + 2] as u16;
    let jump = ((high << 8) | low) as i32;
    let target = offset as i32 + 3 + sign * jump;
    println!("{name:<20} {offset:4} -> {target}");
    offset + 3
}

fn closure_instruction(chunk: &Chunk, offset: usize) -> usize {
    let mut offset = offset + 1;
    let constant = chunk.code[offset] as usize;
    offset += 1;
    print!("OP_CLOSURE           {constant:4} '");
    print!("{}", format_value(&chunk.constants[constant]));
    println!("'");

    if let crate::value::Value::Obj(ptr) = chunk.constants[constant] {
        let upvalue_count = unsafe {
            if (*ptr).obj_type == crate::objects::object::ObjType::Function {
                (*(ptr as *const crate::objects::object_function::ObjectFunction)).upvalue_count
            } else {
                0
            }
        };
        for _ in 0..upvalue_count {
            let is_local = chunk.code[offset];
            offset += 1;
            let index = chunk.code[offset];
            offset += 1;
            println!(
                "{offset:04}      |                     {} {index}",
                if is_local != 0 { "local" } else { "upvalue" }
            );
        }
    }

    offset
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn disassembles_simple_chunk_without_panicking() {
        let mut chunk = Chunk::new();
        let index = chunk.add_constant(Value::Number(1.0));
        chunk.write_op(OpCode::Constant, 1);
        chunk.write(index as u8, 1);
        chunk.write_op(OpCode::Return, 1);
        disassemble_chunk(&chunk, "test");
    }
}
