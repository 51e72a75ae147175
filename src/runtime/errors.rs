use super::{Address, CodeHandle, MonitorError, ObjectHandle};
use crate::jvm;
use crate::jvm::BinaryName;
use log::error;

/// Failures of the runtime core itself
///
/// Java-level failures are never reported through this type: those are exception objects left in
/// the thread's current-exception cell.
#[derive(Debug)]
pub enum Error {
    /// Stack access outside of the thread's machine stack
    StackOutOfBounds(Address),

    /// Stack access that is not word aligned
    UnalignedStackAccess(Address),

    /// A program counter that is not inside any installed code region
    UnmappedPc(Address),

    /// Walking reached a frame whose caller is not above it on the stack
    InvalidFrame { sp: Address, caller_sp: Address },

    /// Frame descriptors were not popped in the reverse order they were pushed
    UnbalancedFramePop { expected_depth: usize, actual_depth: usize },

    /// A thread was detached with frame descriptors still live
    FramesStillLive(usize),

    /// Handle that does not refer to any installed code
    UnknownCode(CodeHandle),

    /// Metadata cannot be emitted or decoded
    MalformedMetadata(String),

    /// Handle that does not refer to any heap object
    UnknownObject(ObjectHandle),

    /// Class was expected to be a subclass of `java/lang/Throwable`
    NotThrowable(BinaryName),

    /// Monitor operation refused while laying out frames
    Monitor(MonitorError),

    Jvm(jvm::Error),
    IoError(std::io::Error),
}

impl From<jvm::Error> for Error {
    fn from(err: jvm::Error) -> Error {
        Error::Jvm(err)
    }
}

impl From<MonitorError> for Error {
    fn from(err: MonitorError) -> Error {
        Error::Monitor(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

/// Conditions the runtime cannot recover from
#[derive(Debug)]
pub enum FatalError {
    /// A class needed to report errors at all could not be loaded
    Bootstrap(BinaryName),

    /// The stack cannot be interpreted (eg. a return address outside of any code)
    InvalidStack(Error),

    /// Hardware fault code with no known mapping to an exception
    UnknownFault(usize),
}

/// Where fatal errors go
///
/// The handler must not return. The default logs the error and aborts the process; embedders
/// (and tests) can substitute their own.
pub trait FatalHandler: Send + Sync {
    fn fatal(&self, error: &FatalError) -> !;
}

/// Log the error and abort the process
pub struct AbortOnFatal;

impl FatalHandler for AbortOnFatal {
    fn fatal(&self, err: &FatalError) -> ! {
        error!("Fatal runtime error: {:?}", err);
        std::process::abort()
    }
}
