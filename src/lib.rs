//! Exception propagation and native stack walking for a JIT-compiling JVM runtime
//!
//! The crate is organized leaves first:
//!
//!   * [`jvm`] has the class graph the runtime consults (names, access flags, subtyping)
//!   * [`runtime::code`] holds the method metadata blocks emitted in front of compiled code
//!   * [`runtime`] has the frame descriptor chain, the stack walker, the exception dispatcher and
//!     unwinder, and the factory for the VM's own exceptions
//!
//! ### Simple example
//!
//! ```
//! use jvm_unwind::jvm::class_graph::{ClassGraph, ClassGraphArenas};
//! use jvm_unwind::runtime::{BuiltinException, ExceptionInit, Runtime, Settings};
//!
//! # fn main() -> Result<(), jvm_unwind::runtime::Error> {
//! let arenas = ClassGraphArenas::new();
//! let classes = ClassGraph::new(&arenas);
//! classes.insert_java_library_types()?;
//!
//! let runtime = Runtime::new(&classes, Settings::new());
//! let mut thread = runtime.attach_thread("main");
//!
//! let exception = runtime.throw_exception(
//!     &mut thread,
//!     BuiltinException::ArithmeticException,
//!     ExceptionInit::Message(String::from("/ by zero")),
//! )?;
//! assert_eq!(thread.pending_exception(), Some(exception));
//! assert_eq!(
//!     runtime.heap.describe(exception)?,
//!     "java.lang.ArithmeticException: / by zero"
//! );
//! # Ok(())
//! # }
//! ```

pub mod jvm;
pub mod runtime;
pub mod util;
