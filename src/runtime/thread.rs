use super::{Address, FrameChain, MachineStack, ObjectHandle, RegisterFile};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u32);

/// Everything the runtime keeps per thread
///
/// None of this is ever shared: a thread's frame descriptors, current exception and register
/// shadow are only touched by the thread itself. Contexts are created with
/// [`super::Runtime::attach_thread`] and torn down with [`super::Runtime::detach_thread`].
pub struct ThreadContext<'g> {
    pub id: ThreadId,
    pub name: String,
    pub stack: MachineStack,
    pub registers: RegisterFile,
    pub(super) frames: FrameChain<'g>,
    exception: Option<ObjectHandle>,
}

impl<'g> ThreadContext<'g> {
    pub(super) fn new(id: ThreadId, name: String, stack_base: Address, stack_words: usize) -> Self {
        let stack = MachineStack::new(stack_base, stack_words);
        let registers = RegisterFile::new(stack.base());
        ThreadContext {
            id,
            name,
            stack,
            registers,
            frames: FrameChain::new(),
            exception: None,
        }
    }

    /// Live frame descriptors
    pub fn frames(&self) -> &FrameChain<'g> {
        &self.frames
    }

    /// Exception in flight, if any
    pub fn pending_exception(&self) -> Option<ObjectHandle> {
        self.exception
    }

    pub fn set_pending_exception(&mut self, exception: ObjectHandle) {
        log::trace!("Thread {:?} has pending {:?}", self.id, exception);
        self.exception = Some(exception);
    }

    pub fn clear_pending_exception(&mut self) {
        self.exception = None;
    }

    /// Clear the cell, returning what was in it
    pub fn take_pending_exception(&mut self) -> Option<ObjectHandle> {
        self.exception.take()
    }
}
