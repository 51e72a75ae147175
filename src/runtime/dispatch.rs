use super::code::{CatchType, CodeKind, ExceptionEntry, MethodMetadata};
use super::stacktrace::{check_caller, check_frame};
use super::{
    Address, BuiltinException, Error, ExceptionInit, FatalError, LoadError, ObjectHandle, Runtime,
    ThreadContext,
};
use crate::jvm::class_graph::{Assignable, LoaderId};
use crate::jvm::Name;

/// Outcome of looking for a handler in one frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Continue at this handler, in the same frame
    Handler(Address),

    /// Nothing in this frame handles the exception: unwind it and retry in the caller
    Unwind,

    /// A catch type failed to resolve or link
    ///
    /// The failure is the new pending exception, and it replaces the exception being dispatched.
    /// The frame has to be unwound like for [`Dispatch::Unwind`].
    Replaced(ObjectHandle),
}

/// Where execution continues once a handler is found
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Resume {
    /// Handler to jump to
    pub pc: Address,

    /// Stack pointer of the frame the handler belongs to
    pub sp: Address,

    /// Exception the handler receives (not necessarily the one thrown)
    pub exception: ObjectHandle,

    /// The handler is a call trampoline's: control returns to native code, with the exception
    /// still pending in the thread
    pub at_trampoline: bool,
}

impl<'g> Runtime<'g> {
    /// Look for a handler for `exception`, thrown at `xpc` in the frame at `sp`
    ///
    /// Exception table entries are tried in reverse order of declaration, so the innermost
    /// handler wins. A catch-all protecting exactly the range of a typed entry wins over it, in
    /// whichever order the two were declared. Catch types are resolved with the loader of the class defining the method
    /// (the exception's own class may come from another loader) and cached in the entry. If no
    /// entry matches and the method is synchronized, its monitor is released before returning
    /// [`Dispatch::Unwind`].
    pub fn find_handler(
        &self,
        thread: &mut ThreadContext<'g>,
        exception: ObjectHandle,
        xpc: Address,
        metadata: MethodMetadata<'_, 'g>,
        sp: Address,
    ) -> Result<Dispatch, Error> {
        let thrown = self.heap.object(exception)?.class;

        for entry in metadata.exception_entries().rev() {
            if entry.is_trampoline_marker() {
                log::trace!("{:?} reached trampoline {:?}", exception, metadata.code_handle());
                return Ok(Dispatch::Handler(entry.handler()));
            }
            if !entry.covers(xpc) {
                continue;
            }

            let declared = entry.catch_type()?;
            if !matches!(declared, CatchType::Any) {
                if let Some(handler) = earlier_catch_all(metadata, &entry) {
                    log::trace!("Entry {} is shadowed by a catch-all", entry.index());
                    return Ok(Dispatch::Handler(handler));
                }
            }

            let catch_type = match declared {
                CatchType::Any => {
                    log::trace!("Entry {} catches everything", entry.index());
                    return Ok(Dispatch::Handler(entry.handler()));
                }
                CatchType::Resolved(class) => class,
                CatchType::Unresolved(name) => {
                    let loader = metadata
                        .method()
                        .map_or(LoaderId::BOOTSTRAP, |method| method.class.loader);
                    log::debug!("Resolving catch type {:?} with {:?}", name, loader);
                    match self.loader.resolve(name, loader) {
                        Ok(class) => entry.cache_resolved(class)?,
                        Err(err) => return self.dispatch_failed(thread, metadata, sp, xpc, err),
                    }
                }
            };

            if let Err(err) = self.loader.link(catch_type) {
                return self.dispatch_failed(thread, metadata, sp, xpc, err);
            }

            log::trace!(
                "Entry {} of {:?}: is {:?} a {:?}?",
                entry.index(),
                metadata.code_handle(),
                thrown,
                catch_type
            );
            if thrown.is_assignable(&catch_type) {
                return Ok(Dispatch::Handler(entry.handler()));
            }
        }

        self.release_frame_monitor(thread, metadata, sp)?;
        Ok(Dispatch::Unwind)
    }

    /// Release the monitor of a synchronized method whose frame is about to be unwound
    pub fn release_frame_monitor(
        &self,
        thread: &ThreadContext<'g>,
        metadata: MethodMetadata<'_, 'g>,
        sp: Address,
    ) -> Result<(), Error> {
        let offset = match metadata.sync_slot_offset() {
            Some(offset) => offset,
            None => return Ok(()),
        };

        let lock = match ObjectHandle::from_word(thread.stack.read(sp + offset)?) {
            Some(lock) => lock,
            None => {
                log::warn!("Synchronized frame at {:?} has no lock object", sp);
                return Ok(());
            }
        };
        let object = self.heap.object(lock)?;
        match self.monitors.release(object, thread.id) {
            Ok(()) => log::debug!("Released monitor of {:?} unwinding {:?}", lock, sp),
            Err(err) => log::warn!("Could not release monitor of {:?}: {:?}", lock, err),
        }
        Ok(())
    }

    /// Turn a catch type that cannot be used into the exception to propagate instead
    fn dispatch_failed(
        &self,
        thread: &mut ThreadContext<'g>,
        metadata: MethodMetadata<'_, 'g>,
        sp: Address,
        xpc: Address,
        err: LoadError,
    ) -> Result<Dispatch, Error> {
        log::debug!("Catch type failed in {:?}: {:?}", metadata.code_handle(), err);
        self.release_frame_monitor(thread, metadata, sp)?;

        let (kind, message) = match err {
            LoadError::NotFound(name) => (
                BuiltinException::NoClassDefFoundError,
                name.as_str().to_owned(),
            ),
            LoadError::LinkFailed { class, reason } => (
                BuiltinException::LinkageError,
                format!("{}: {}", class.to_java_name(), reason),
            ),
        };

        // Created while the frame is still described, so its trace starts at `xpc`
        let scope = self.extern_scope(thread, Some(metadata.entry()), sp, None, xpc)?;
        let replacement = self.new_exception(&scope, kind, ExceptionInit::Message(message));
        scope.finish()?;
        let replacement = replacement?;

        thread.set_pending_exception(replacement);
        Ok(Dispatch::Replaced(replacement))
    }

    /// Propagate `exception`, thrown at `xpc` with the stack pointer at `sp`, to its handler
    ///
    /// The exception is made pending, then frames are tried innermost first. Every frame without
    /// a handler is unwound (restoring the callee-saved registers it spilled) before trying its
    /// caller. Running into a program counter outside of any code, or into frames that do not climb
    /// the stack, is fatal.
    pub fn throw(
        &self,
        thread: &mut ThreadContext<'g>,
        exception: ObjectHandle,
        xpc: Address,
        sp: Address,
    ) -> Resume {
        match self.try_throw(thread, exception, xpc, sp) {
            Ok(resume) => resume,
            Err(err) => self.fatal(FatalError::InvalidStack(err)),
        }
    }

    /// Like [`Runtime::throw`], but reporting an invalid stack instead of treating it as fatal
    pub fn try_throw(
        &self,
        thread: &mut ThreadContext<'g>,
        exception: ObjectHandle,
        xpc: Address,
        sp: Address,
    ) -> Result<Resume, Error> {
        let architecture = &self.settings.architecture;
        let (mut exception, mut pc, mut sp) = (exception, xpc, sp);
        let mut callee_sp: Option<Address> = None;
        thread.set_pending_exception(exception);

        loop {
            let metadata = self.code.lookup(pc).ok_or(Error::UnmappedPc(pc))?;
            if let Some(callee_sp) = callee_sp {
                check_caller(metadata, callee_sp, sp)?;
            }
            log::debug!(
                "Dispatching {:?} in {:?} at {:?}",
                exception,
                metadata.code_handle(),
                pc
            );

            match self.find_handler(thread, exception, pc, metadata, sp)? {
                Dispatch::Handler(handler) => {
                    let at_trampoline = metadata.code().kind == CodeKind::CallTrampoline;
                    if !at_trampoline {
                        thread.clear_pending_exception();
                    }
                    thread.registers.sp = sp;
                    log::debug!("Resuming {:?} at {:?}", exception, handler);
                    return Ok(Resume {
                        pc: handler,
                        sp,
                        exception,
                        at_trampoline,
                    });
                }
                Dispatch::Replaced(replacement) => exception = replacement,
                Dispatch::Unwind => (),
            }

            let shape = metadata.frame_shape();
            let (return_address, caller_sp) =
                architecture.unwind_frame(&thread.stack, &mut thread.registers, sp, &shape)?;
            if return_address.is_null() {
                return Err(Error::UnmappedPc(return_address));
            }
            check_frame(sp, caller_sp, shape.leaf)?;
            log::debug!("Unwound {:?}, returning to {:?}", sp, return_address);
            pc = architecture.call_site(return_address);
            callee_sp = Some(sp);
            sp = caller_sp;
        }
    }
}

/// Handler of the innermost catch-all declared before `entry` over exactly the same range
///
/// Entries declared after it have already been tried by the reverse scan.
fn earlier_catch_all(
    metadata: MethodMetadata<'_, '_>,
    entry: &ExceptionEntry<'_, '_>,
) -> Option<Address> {
    let (start, end) = (entry.start(), entry.end());
    metadata
        .exception_entries()
        .take(entry.index())
        .rev()
        .find(|other| {
            other.start() == start
                && other.end() == end
                && matches!(other.catch_type(), Ok(CatchType::Any))
        })
        .map(|other| other.handler())
}
