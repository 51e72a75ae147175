//! Laying out frames the way compiled code would
//!
//! Nothing in this crate executes machine code. To exercise the walker and the unwinder, callers
//! (tests, the command line tool) build the stack a real execution would have produced: each call
//! writes the return address and spills callee-saved registers exactly where the architecture's
//! calling convention puts them, and calls into native code push the matching frame descriptors.

use super::code::{CodeHandle, MethodMetadata};
use super::{Address, Error, FrameScope, ObjectHandle, Runtime, ThreadContext};

/// Compiled frame live on a thread's stack
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Activation {
    pub code: CodeHandle,

    /// Entry point of the code
    pub entry: Address,

    /// Stack pointer of the frame
    pub sp: Address,
}

impl Activation {
    /// Program counter `offset` bytes into the code
    pub fn pc(&self, offset: usize) -> Address {
        self.entry + offset
    }
}

impl<'g> Runtime<'g> {
    fn valid_metadata(&self, code: CodeHandle) -> Result<MethodMetadata<'_, 'g>, Error> {
        self.code.metadata(code).ok_or(Error::UnknownCode(code))
    }

    fn push_activation(
        &self,
        thread: &mut ThreadContext<'g>,
        caller_sp: Address,
        return_address: Address,
        code: CodeHandle,
    ) -> Result<Activation, Error> {
        let metadata = self.valid_metadata(code)?;
        let sp = self.settings.architecture.push_frame(
            &mut thread.stack,
            &mut thread.registers,
            caller_sp,
            return_address,
            &metadata.frame_shape(),
        )?;
        log::trace!("Pushed frame of {:?} at {:?}", code, sp);
        Ok(Activation {
            code,
            entry: metadata.entry(),
            sp,
        })
    }

    /// Native code calling into compiled code through a call trampoline
    ///
    /// The trampoline frame goes right below the thread's current stack pointer. It has no
    /// return address into compiled code.
    pub fn enter(
        &self,
        thread: &mut ThreadContext<'g>,
        trampoline: CodeHandle,
    ) -> Result<Activation, Error> {
        let caller_sp = thread.registers.sp;
        self.push_activation(thread, caller_sp, Address::NULL, trampoline)
    }

    /// Compiled code calling compiled code, from `return_offset` bytes into the caller
    pub fn call(
        &self,
        thread: &mut ThreadContext<'g>,
        caller: Activation,
        return_offset: usize,
        callee: CodeHandle,
    ) -> Result<Activation, Error> {
        self.push_activation(thread, caller.sp, caller.pc(return_offset), callee)
    }

    /// Call a synchronized method: store the lock object in its frame and acquire its monitor
    pub fn call_synchronized(
        &self,
        thread: &mut ThreadContext<'g>,
        caller: Activation,
        return_offset: usize,
        callee: CodeHandle,
        lock: ObjectHandle,
    ) -> Result<Activation, Error> {
        let activation = self.call(thread, caller, return_offset, callee)?;
        let offset = self
            .valid_metadata(callee)?
            .sync_slot_offset()
            .ok_or_else(|| {
                Error::MalformedMetadata(format!("{:?} is not synchronized", callee))
            })?;
        thread.stack.write(activation.sp + offset, lock.to_word())?;
        self.monitors.acquire(self.heap.object(lock)?, thread.id)?;
        Ok(activation)
    }

    /// Compiled code calling native code, through the stub `stub` if there is one
    ///
    /// The native frame descriptor stays pushed for as long as the returned scope lives.
    pub fn call_native<'t>(
        &self,
        thread: &'t mut ThreadContext<'g>,
        caller: Activation,
        return_offset: usize,
        stub: Option<CodeHandle>,
    ) -> Result<FrameScope<'t, 'g>, Error> {
        let pv = match stub {
            Some(stub) => Some(self.valid_metadata(stub)?.entry()),
            None => None,
        };
        self.native_scope(thread, pv, caller.sp, caller.pc(return_offset))
    }
}
