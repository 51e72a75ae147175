use super::{Address, Error, Runtime, ThreadContext};
use crate::jvm::class_graph::MethodId;
use std::iter::Rev;
use std::ops::{Deref, DerefMut};
use std::slice;

/// Record bridging a stretch of stack the walker cannot interpret on its own
///
/// Two flavours exist:
///
///   * native boundaries (`pv` is `None`), pushed when compiled code calls into native code. The
///     stack above `sp` belongs to compiled code, which returns to `ra`.
///   * extern frames (`pv` is the entry of some compiled code), pushed by fault handlers and
///     assembly stubs that interrupt a compiled method at exactly `xpc`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameDescriptor<'g> {
    /// Method the frame belongs to (`None` for synthetic stub frames)
    pub method: Option<MethodId<'g>>,

    /// Entry of the code the frame belongs to
    pub pv: Option<Address>,

    /// Stack pointer at the time of the transition
    pub sp: Address,

    /// Return address into compiled code
    pub ra: Address,

    /// Exact program counter of the exception, for extern frames
    pub xpc: Option<Address>,
}

impl<'g> FrameDescriptor<'g> {
    pub fn is_native_boundary(&self) -> bool {
        self.pv.is_none()
    }
}

/// Proof of a push, to be handed back to pop the same descriptor
#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub struct FrameToken {
    depth: usize,
}

/// Per-thread chain of frame descriptors, most recent last
pub struct FrameChain<'g> {
    descriptors: Vec<FrameDescriptor<'g>>,
}

impl<'g> FrameChain<'g> {
    pub(super) fn new() -> Self {
        FrameChain {
            descriptors: vec![],
        }
    }

    pub fn depth(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Head of the chain
    pub fn current(&self) -> Option<&FrameDescriptor<'g>> {
        self.descriptors.last()
    }

    /// Descriptors from the head of the chain down
    pub fn iter(&self) -> Rev<slice::Iter<'_, FrameDescriptor<'g>>> {
        self.descriptors.iter().rev()
    }

    fn push(&mut self, descriptor: FrameDescriptor<'g>) -> FrameToken {
        self.descriptors.push(descriptor);
        FrameToken {
            depth: self.descriptors.len(),
        }
    }

    fn pop(&mut self, token: FrameToken) -> Result<FrameDescriptor<'g>, Error> {
        let unbalanced = Error::UnbalancedFramePop {
            expected_depth: token.depth,
            actual_depth: self.descriptors.len(),
        };
        if token.depth != self.descriptors.len() {
            return Err(unbalanced);
        }
        self.descriptors.pop().ok_or(unbalanced)
    }
}

impl<'g> ThreadContext<'g> {
    /// Pop the head of the chain, which must be the descriptor `token` was issued for
    pub fn pop_frame(&mut self, token: FrameToken) -> Result<FrameDescriptor<'g>, Error> {
        let descriptor = self.frames.pop(token)?;
        log::trace!("Thread {:?} popped {:?}", self.id, descriptor);
        Ok(descriptor)
    }
}

/// Descriptor pushed for the duration of a scope
///
/// Dereferences to the thread, so the scope can be used wherever the thread is needed while the
/// descriptor is live. The descriptor is popped when the scope ends, on every exit path.
pub struct FrameScope<'t, 'g> {
    thread: &'t mut ThreadContext<'g>,
    token: Option<FrameToken>,
}

impl<'t, 'g> FrameScope<'t, 'g> {
    /// End the scope, reporting a pop that is out of order
    pub fn finish(mut self) -> Result<FrameDescriptor<'g>, Error> {
        let token = self.token.take().expect("frame scope already finished");
        self.thread.pop_frame(token)
    }
}

impl<'t, 'g> Deref for FrameScope<'t, 'g> {
    type Target = ThreadContext<'g>;

    fn deref(&self) -> &ThreadContext<'g> {
        self.thread
    }
}

impl<'t, 'g> DerefMut for FrameScope<'t, 'g> {
    fn deref_mut(&mut self) -> &mut ThreadContext<'g> {
        self.thread
    }
}

impl<'t, 'g> Drop for FrameScope<'t, 'g> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(err) = self.thread.pop_frame(token) {
                log::error!("Frame scope ended out of order: {:?}", err);
            }
        }
    }
}

impl<'g> Runtime<'g> {
    /// Record a call from compiled code into native code
    ///
    /// `pv` is the entry of the native stub being called. Without a stub (builtins called straight
    /// from compiled code) there is no method to attribute the native frame to, so the descriptor
    /// has none and `ra` only has to land in known code.
    pub fn push_native_frame(
        &self,
        thread: &mut ThreadContext<'g>,
        pv: Option<Address>,
        sp: Address,
        ra: Address,
    ) -> Result<FrameToken, Error> {
        let method = match pv {
            Some(pv) => self.code.lookup(pv).ok_or(Error::UnmappedPc(pv))?.method(),
            None => {
                let call_site = self.settings.architecture.call_site(ra);
                self.code
                    .lookup(call_site)
                    .ok_or(Error::UnmappedPc(call_site))?;
                None
            }
        };

        let descriptor = FrameDescriptor {
            method,
            pv: None,
            sp,
            ra,
            xpc: None,
        };
        log::trace!("Thread {:?} pushed native {:?}", thread.id, descriptor);
        Ok(thread.frames.push(descriptor))
    }

    /// Record an interruption of compiled code at `xpc` (fault handlers, assembly stubs)
    ///
    /// `pv` defaults to the entry of the code containing `xpc`. Without `ra`, the return address
    /// is recovered from the interrupted frame (or the link register, for leaf methods).
    pub fn push_extern_frame(
        &self,
        thread: &mut ThreadContext<'g>,
        pv: Option<Address>,
        sp: Address,
        ra: Option<Address>,
        xpc: Address,
    ) -> Result<FrameToken, Error> {
        let code_pc = pv.unwrap_or(xpc);
        let metadata = self
            .code
            .lookup(code_pc)
            .ok_or(Error::UnmappedPc(code_pc))?;
        let ra = match ra {
            Some(ra) => ra,
            None => self.settings.architecture.return_address(
                &thread.stack,
                &thread.registers,
                sp,
                &metadata.frame_shape(),
            )?,
        };

        let descriptor = FrameDescriptor {
            method: metadata.method(),
            pv: Some(metadata.entry()),
            sp,
            ra,
            xpc: Some(xpc),
        };
        log::trace!("Thread {:?} pushed extern {:?}", thread.id, descriptor);
        Ok(thread.frames.push(descriptor))
    }

    /// Native frame descriptor popped at the end of the returned scope
    pub fn native_scope<'t>(
        &self,
        thread: &'t mut ThreadContext<'g>,
        pv: Option<Address>,
        sp: Address,
        ra: Address,
    ) -> Result<FrameScope<'t, 'g>, Error> {
        let token = self.push_native_frame(thread, pv, sp, ra)?;
        Ok(FrameScope {
            thread,
            token: Some(token),
        })
    }

    /// Extern frame descriptor popped at the end of the returned scope
    pub fn extern_scope<'t>(
        &self,
        thread: &'t mut ThreadContext<'g>,
        pv: Option<Address>,
        sp: Address,
        ra: Option<Address>,
        xpc: Address,
    ) -> Result<FrameScope<'t, 'g>, Error> {
        let token = self.push_extern_frame(thread, pv, sp, ra, xpc)?;
        Ok(FrameScope {
            thread,
            token: Some(token),
        })
    }
}
