//! Closed error taxonomies for compile-time and run-time failures.
//!
//! The reference VM reports each of these as a one-line diagnostic and
//! keeps going (compile errors via panic-mode recovery, runtime errors by
//! unwinding the whole program). A plain `Display`-able enum is enough here;
//! there is no recoverable-from-within-the-language exception mechanism to
//! compose errors around, so `anyhow`/`thiserror` would add ceremony without
//! buying anything the teacher crate's own error handling doesn't already do
//! with hand-written `Display` impls.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    UnexpectedToken { expected: &'static str, found: String },
    InvalidAssignmentTarget,
    TooManyConstants,
    TooManyLocals,
    TooManyUpvalues,
    TooManyParameters,
    TooManyArguments,
    LocalReadInOwnInitializer(String),
    DuplicateLocalInScope(String),
    ReturnFromTopLevel,
    ReturnValueFromInitializer,
    ThisOutsideClass,
    SuperOutsideClass,
    SuperWithoutSuperclass,
    SelfInheritance,
    LoopBodyTooLarge,
    JumpTooLarge,
    Lexical(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UnexpectedToken { expected, found } => {
                write!(f, "Expect {expected}, found '{found}'.")
            }
            CompileError::InvalidAssignmentTarget => write!(f, "Invalid assignment target."),
            CompileError::TooManyConstants => write!(f, "Too many constants in one chunk."),
            CompileError::TooManyLocals => write!(f, "Too many local variables in function."),
            CompileError::TooManyUpvalues => write!(f, "Too many closure variables in function."),
            CompileError::TooManyParameters => write!(f, "Can't have more than 255 parameters."),
            CompileError::TooManyArguments => write!(f, "Can't have more than 255 arguments."),
            CompileError::LocalReadInOwnInitializer(name) => {
                write!(f, "Can't read local variable '{name}' in its own initializer.")
            }
            CompileError::DuplicateLocalInScope(name) => {
                write!(f, "Already a variable named '{name}' in this scope.")
            }
            CompileError::ReturnFromTopLevel => write!(f, "Can't return from top-level code."),
            CompileError::ReturnValueFromInitializer => {
                write!(f, "Can't return a value from an initializer.")
            }
            CompileError::ThisOutsideClass => write!(f, "Can't use 'this' outside of a class."),
            CompileError::SuperOutsideClass => write!(f, "Can't use 'super' outside of a class."),
            CompileError::SuperWithoutSuperclass => {
                write!(f, "Can't use 'super' in a class with no superclass.")
            }
            CompileError::SelfInheritance => write!(f, "A class can't inherit from itself."),
            CompileError::LoopBodyTooLarge => write!(f, "Loop body too large."),
            CompileError::JumpTooLarge => write!(f, "Too much code to jump over."),
            CompileError::Lexical(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for CompileError {}

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    UndefinedVariable(String),
    UndefinedProperty(String),
    TypeMismatch(String),
    ArityMismatch { expected: usize, got: usize },
    IndexOutOfBounds { kind: &'static str, index: f64, bounds: usize },
    NonWholeNumberIndex { kind: &'static str },
    StackOverflow,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::UndefinedVariable(name) => write!(f, "Undefined variable '{name}'."),
            RuntimeError::UndefinedProperty(name) => write!(f, "Undefined property '{name}'."),
            RuntimeError::TypeMismatch(message) => write!(f, "{message}"),
            RuntimeError::ArityMismatch { expected, got } => {
                write!(f, "Expected {expected} arguments but got {got}.")
            }
            RuntimeError::IndexOutOfBounds { kind, index, bounds } => {
                write!(f, "{kind} index ({index}) out of bounds ({bounds})")
            }
            RuntimeError::NonWholeNumberIndex { kind } => {
                write!(f, "{kind} index must be a whole number.")
            }
            RuntimeError::StackOverflow => write!(f, "Stack overflow."),
        }
    }
}

impl std::error::Error for RuntimeError {}
