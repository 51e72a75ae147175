//! Exception propagation and stack walking
//!
//! A [`Runtime`] ties together the class graph, the installed code, the heap and the pluggable
//! collaborators (class loading, monitors, architecture). Per-thread state lives in a separate
//! [`ThreadContext`] so that operations can borrow the runtime shared and the thread mutably.
//!
//! The main operations are:
//!
//!   * frame descriptors: [`Runtime::push_native_frame`], [`Runtime::push_extern_frame`],
//!     [`ThreadContext::pop_frame`] and their scoped versions
//!   * exception dispatch: [`Runtime::find_handler`] for one frame and [`Runtime::throw`] to
//!     unwind until a handler is found
//!   * stack traces: [`Runtime::build_trace`], [`Runtime::fill_in_stack_trace`] and
//!     [`Runtime::print_stack_trace`]
//!   * the VM's own exceptions: [`Runtime::new_exception`], [`Runtime::throw_exception`] and
//!     [`Runtime::handle_hardware_fault`]

mod address;
pub mod arch;
pub mod code;
mod dispatch;
mod errors;
mod exceptions;
mod frame;
mod harness;
mod loader;
mod monitor;
mod object;
mod settings;
mod simulator;
mod stack;
mod stacktrace;
mod thread;

pub use address::*;
pub use dispatch::*;
pub use errors::*;
pub use exceptions::*;
pub use frame::*;
pub use harness::*;
pub use loader::*;
pub use monitor::*;
pub use object::*;
pub use settings::*;
pub use simulator::*;
pub use stack::*;
pub use stacktrace::*;
pub use thread::*;

use crate::jvm::class_graph::ClassGraph;
use code::{CodeHandle, CodeRegistry};
use std::sync::atomic::{AtomicU32, Ordering};

/// Shared by every attached thread: all of its state is either immutable or internally synchronized
pub struct Runtime<'g> {
    /// Every class known to the runtime
    pub classes: &'g ClassGraph<'g>,

    /// Installed code
    pub code: CodeRegistry<'g>,

    pub heap: Heap<'g>,
    pub loader: Box<dyn ClassLoader<'g> + 'g>,
    pub monitors: Box<dyn Monitors>,
    pub settings: Settings,

    next_thread_id: AtomicU32,
}

impl<'g> Runtime<'g> {
    /// Runtime loading classes from the graph, with recursive in-object monitors
    pub fn new(classes: &'g ClassGraph<'g>, settings: Settings) -> Runtime<'g> {
        Runtime {
            classes,
            code: CodeRegistry::new(classes),
            heap: Heap::new(),
            loader: Box::new(GraphLoader::new(classes)),
            monitors: Box::new(RecursiveMonitors),
            settings,
            next_thread_id: AtomicU32::new(1),
        }
    }

    pub fn with_loader(mut self, loader: Box<dyn ClassLoader<'g> + 'g>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_monitors(mut self, monitors: Box<dyn Monitors>) -> Self {
        self.monitors = monitors;
        self
    }

    /// Set up the per-thread state of a new thread
    pub fn attach_thread(&self, name: &str) -> ThreadContext<'g> {
        let id = ThreadId(self.next_thread_id.fetch_add(1, Ordering::Relaxed));
        log::debug!("Attaching thread {:?} ({})", id, name);
        ThreadContext::new(
            id,
            name.to_owned(),
            self.settings.stack_base,
            self.settings.stack_words,
        )
    }

    /// Tear down a thread, returning the exception it was left with
    pub fn detach_thread(&self, thread: ThreadContext<'g>) -> Result<Option<ObjectHandle>, Error> {
        log::debug!("Detaching thread {:?} ({})", thread.id, thread.name);
        if !thread.frames().is_empty() {
            return Err(Error::FramesStillLive(thread.frames().depth()));
        }
        Ok(thread.pending_exception())
    }

    /// Entry point of installed code
    pub fn entry_of(&self, code: CodeHandle) -> Result<Address, Error> {
        self.code
            .code(code)
            .map(|code| code.entry)
            .ok_or(Error::UnknownCode(code))
    }

    /// Hand a fatal error to the configured handler
    pub fn fatal(&self, error: FatalError) -> ! {
        log::error!("Fatal error: {:?}", error);
        self.settings.fatal_handler.fatal(&error)
    }
}
