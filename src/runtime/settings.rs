use super::arch::{Architecture, X86_64};
use super::{AbortOnFatal, FatalHandler, DEFAULT_STACK_BASE};
use crate::runtime::Address;

pub struct Settings {
    /// Frame layout of the target
    pub architecture: Box<dyn Architecture>,

    /// Initial capacity of stack trace buffers
    ///
    /// Buffers grow geometrically, so this only matters for how often short traces reallocate.
    pub initial_trace_capacity: usize,

    /// Address one past the top of each thread's machine stack
    pub stack_base: Address,

    /// Size of each thread's machine stack, in words
    pub stack_words: usize,

    /// What to do on a fatal error (invalid stack shape, missing bootstrap class, unknown fault)
    pub fatal_handler: Box<dyn FatalHandler>,
}

impl Settings {
    pub fn new() -> Settings {
        Settings {
            architecture: Box::new(X86_64),
            initial_trace_capacity: 16,
            stack_base: DEFAULT_STACK_BASE,
            stack_words: 64 * 1024,
            fatal_handler: Box::new(AbortOnFatal),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}
