use super::code::{CodeKind, MethodMetadata};
use super::{Address, Error, FrameDescriptor, ObjectHandle, Runtime, ThreadContext};
use crate::jvm::class_graph::{ClassId, LoaderId, MethodId};
use crate::jvm::Name;
use std::io::Write;
use std::iter::Rev;
use std::sync::Arc;
use std::slice;

/// One frame of a stack trace
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StackTraceEntry<'g> {
    /// Method running in the frame (`None` for stub frames)
    pub method: Option<MethodId<'g>>,

    /// Program counter in the frame (null for native frames)
    pub pc: Address,

    /// Source line of `pc`, or 0 if unknown
    pub line: u32,
}

impl<'g> StackTraceEntry<'g> {
    /// Frames that show up in Java-level traces
    pub fn is_java_visible(&self) -> bool {
        self.method.is_some()
    }

    pub fn is_native(&self) -> bool {
        self.pc.is_null() || self.method.map_or(false, |method| method.is_native())
    }
}

/// Immutable snapshot of a walk, innermost frame first
#[derive(Debug, PartialEq, Eq)]
pub struct StackTrace<'g> {
    entries: Box<[StackTraceEntry<'g>]>,
}

impl<'g> StackTrace<'g> {
    pub fn new(entries: Vec<StackTraceEntry<'g>>) -> StackTrace<'g> {
        StackTrace {
            entries: entries.into_boxed_slice(),
        }
    }

    pub fn entries(&self) -> &[StackTraceEntry<'g>] {
        &self.entries
    }

    /// Entries with a method, in order
    pub fn java_entries(&self) -> impl Iterator<Item = &StackTraceEntry<'g>> {
        self.entries.iter().filter(|entry| entry.is_java_visible())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Where a walk starts
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TraceStart {
    /// At the head of the thread's frame descriptor chain
    Chain,

    /// Inside compiled code that was interrupted without pushing a descriptor
    ///
    /// `pv` defaults to the entry of the code containing `xpc`.
    Inline {
        pv: Option<Address>,
        sp: Address,
        xpc: Address,
    },
}

#[derive(Copy, Clone)]
enum WalkState<'r, 'g> {
    /// Next frame comes from the descriptor chain
    Descriptors,

    /// Next frame is a compiled frame, found by frame size arithmetic
    Compiled {
        metadata: MethodMetadata<'r, 'g>,
        sp: Address,
        pc: Address,
    },

    Done,
}

/// Iterator over the frames of a thread, innermost first
///
/// The walk alternates between following the frame descriptor chain and following compiled frames
/// through the frame sizes recorded in their metadata:
///
///   * a native boundary descriptor records its method (with no pc) and hands over to the
///     compiled frame returning to its `ra`
///   * an extern descriptor records the interrupted frame at its exact pc and hands over to that
///     frame's caller
///   * a compiled frame records its method at its pc and hands over to its caller. Callers that
///     are not compiled code (null return addresses, call trampolines) hand back to the chain.
///
/// The walk is over once the chain is exhausted. Errors end the walk: a frame whose caller cannot
/// be found is still yielded, and the error comes right after it.
pub struct StackWalker<'r, 'g> {
    runtime: &'r Runtime<'g>,
    thread: &'r ThreadContext<'g>,
    descriptors: Rev<slice::Iter<'r, FrameDescriptor<'g>>>,
    state: WalkState<'r, 'g>,
    failed: Option<Error>,
}

impl<'r, 'g> StackWalker<'r, 'g> {
    fn lookup(&self, pc: Address) -> Result<MethodMetadata<'r, 'g>, Error> {
        self.runtime.code.lookup(pc).ok_or(Error::UnmappedPc(pc))
    }

    /// Move on to the frame returning to `return_address`, whose stack pointer is `sp`
    ///
    /// `callee_sp` is the stack pointer of the frame being left.
    fn continue_at(
        &mut self,
        return_address: Address,
        callee_sp: Address,
        sp: Address,
    ) -> Result<(), Error> {
        if return_address.is_null() {
            self.state = WalkState::Descriptors;
            return Ok(());
        }
        let pc = self.runtime.settings.architecture.call_site(return_address);
        let metadata = self.lookup(pc)?;
        check_caller(metadata, callee_sp, sp)?;
        self.state = WalkState::Compiled { metadata, sp, pc };
        Ok(())
    }

    /// Move on to the caller of the compiled frame at `sp`
    fn leave_compiled(
        &mut self,
        metadata: MethodMetadata<'r, 'g>,
        sp: Address,
    ) -> Result<(), Error> {
        let runtime = self.runtime;
        let architecture = &runtime.settings.architecture;
        let shape = metadata.frame_shape();
        let return_address =
            architecture.return_address(&self.thread.stack, &self.thread.registers, sp, &shape)?;
        let caller_sp = architecture.caller_sp(sp, &shape);
        check_frame(sp, caller_sp, shape.leaf)?;
        self.continue_at(return_address, sp, caller_sp)
    }

    /// Yield a frame, keeping the failure to move past it for the next step
    fn yield_frame(
        &mut self,
        entry: StackTraceEntry<'g>,
        moved_on: Result<(), Error>,
    ) -> Result<Option<StackTraceEntry<'g>>, Error> {
        if let Err(err) = moved_on {
            self.state = WalkState::Done;
            self.failed = Some(err);
        }
        Ok(Some(entry))
    }

    fn step(&mut self) -> Result<Option<StackTraceEntry<'g>>, Error> {
        if let Some(err) = self.failed.take() {
            return Err(err);
        }
        match self.state {
            WalkState::Done => Ok(None),

            WalkState::Descriptors => {
                let descriptor: FrameDescriptor<'g> = match self.descriptors.next() {
                    Some(descriptor) => *descriptor,
                    None => {
                        self.state = WalkState::Done;
                        return Ok(None);
                    }
                };
                log::trace!("Walking descriptor {:?}", descriptor);

                match descriptor.xpc {
                    None => {
                        let entry = StackTraceEntry {
                            method: descriptor.method,
                            pc: Address::NULL,
                            line: 0,
                        };
                        let moved_on =
                            self.continue_at(descriptor.ra, descriptor.sp, descriptor.sp);
                        self.yield_frame(entry, moved_on)
                    }
                    Some(xpc) => {
                        let metadata = self.lookup(descriptor.pv.unwrap_or(xpc))?;
                        let entry = StackTraceEntry {
                            method: descriptor.method,
                            pc: xpc,
                            line: metadata.line_for_pc(xpc),
                        };
                        let shape = metadata.frame_shape();
                        let caller_sp = self
                            .runtime
                            .settings
                            .architecture
                            .caller_sp(descriptor.sp, &shape);
                        let moved_on = check_frame(descriptor.sp, caller_sp, shape.leaf)
                            .and_then(|()| {
                                self.continue_at(descriptor.ra, descriptor.sp, caller_sp)
                            });
                        self.yield_frame(entry, moved_on)
                    }
                }
            }

            WalkState::Compiled { metadata, sp, pc } => {
                log::trace!("Walking {:?} at {:?}", metadata.code_handle(), pc);
                let entry = StackTraceEntry {
                    method: metadata.method(),
                    pc,
                    line: metadata.line_for_pc(pc),
                };

                // Trampolines are called from native code, described further down the chain
                if metadata.code().kind == CodeKind::CallTrampoline {
                    self.state = WalkState::Descriptors;
                    return Ok(Some(entry));
                }

                let moved_on = self.leave_compiled(metadata, sp);
                self.yield_frame(entry, moved_on)
            }
        }
    }
}

impl<'r, 'g> Iterator for StackWalker<'r, 'g> {
    type Item = Result<StackTraceEntry<'g>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(entry) => entry.map(Ok),
            Err(err) => {
                self.state = WalkState::Done;
                Some(Err(err))
            }
        }
    }
}

/// Callers are strictly higher up the stack, except above a leaf that has no frame at all
pub(super) fn check_frame(sp: Address, caller_sp: Address, leaf: bool) -> Result<(), Error> {
    if caller_sp > sp || (caller_sp == sp && leaf) {
        Ok(())
    } else {
        Err(Error::InvalidFrame { sp, caller_sp })
    }
}

/// Code reached through a return address made a call, so it cannot be a leaf
///
/// A leaf is only ever the innermost frame of a run of compiled frames. Together with
/// [`check_frame`] this makes every walk strictly climb the stack.
pub(super) fn check_caller(
    caller: MethodMetadata<'_, '_>,
    sp: Address,
    caller_sp: Address,
) -> Result<(), Error> {
    if caller.frame_shape().leaf {
        Err(Error::InvalidFrame { sp, caller_sp })
    } else {
        Ok(())
    }
}

impl<'g> Runtime<'g> {
    /// Walk the frames of a thread
    pub fn walk_stack<'r>(
        &'r self,
        thread: &'r ThreadContext<'g>,
        start: TraceStart,
    ) -> Result<StackWalker<'r, 'g>, Error> {
        let mut walker = StackWalker {
            runtime: self,
            thread,
            descriptors: thread.frames().iter(),
            state: WalkState::Descriptors,
            failed: None,
        };
        if let TraceStart::Inline { pv, sp, xpc } = start {
            let metadata = walker.lookup(pv.unwrap_or(xpc))?;
            walker.state = WalkState::Compiled {
                metadata,
                sp,
                pc: xpc,
            };
        }
        Ok(walker)
    }

    /// Snapshot of the frames of a thread
    pub fn build_trace(
        &self,
        thread: &ThreadContext<'g>,
        start: TraceStart,
    ) -> Result<StackTrace<'g>, Error> {
        let mut entries = Vec::with_capacity(self.settings.initial_trace_capacity);
        for entry in self.walk_stack(thread, start)? {
            entries.push(entry?);
        }
        log::debug!(
            "Built trace of {} frames for thread {:?}",
            entries.len(),
            thread.id
        );
        Ok(StackTrace::new(entries))
    }

    /// Snapshot of the frames below the current frame descriptor
    pub fn capture(&self, thread: &ThreadContext<'g>) -> Result<Arc<StackTrace<'g>>, Error> {
        self.build_trace(thread, TraceStart::Chain).map(Arc::new)
    }

    /// `Throwable.fillInStackTrace` for the pending exception
    ///
    /// The exception is taken out of the thread's cell while the trace is built and returned
    /// without being put back: re-installing it is up to the caller. A trace is only attached the
    /// first time. If the walk fails, the exception is left pending.
    pub fn fill_in_stack_trace(
        &self,
        thread: &mut ThreadContext<'g>,
    ) -> Result<Option<ObjectHandle>, Error> {
        let exception = match thread.take_pending_exception() {
            Some(exception) => exception,
            None => return Ok(None),
        };

        let filled = self.heap.object(exception).and_then(|object| {
            if object.stack_trace().is_none() {
                object.attach_stack_trace(self.capture(thread)?);
            }
            Ok(())
        });
        if let Err(err) = filled {
            thread.set_pending_exception(exception);
            return Err(err);
        }
        Ok(Some(exception))
    }

    /// Class of the Java method `skip` frames below the innermost Java frame
    pub fn calling_class(
        &self,
        thread: &ThreadContext<'g>,
        skip: usize,
    ) -> Result<Option<ClassId<'g>>, Error> {
        let trace = self.build_trace(thread, TraceStart::Chain)?;
        let class = trace
            .java_entries()
            .filter_map(|entry| entry.method)
            .nth(skip)
            .map(|method| method.class);
        Ok(class)
    }

    /// Classes of every Java frame, innermost first
    pub fn class_context(&self, thread: &ThreadContext<'g>) -> Result<Vec<ClassId<'g>>, Error> {
        let trace = self.build_trace(thread, TraceStart::Chain)?;
        Ok(trace
            .java_entries()
            .filter_map(|entry| entry.method)
            .map(|method| method.class)
            .collect())
    }

    /// Defining loader of the innermost Java frame not loaded by the bootstrap loader
    pub fn current_class_loader(
        &self,
        thread: &ThreadContext<'g>,
    ) -> Result<Option<LoaderId>, Error> {
        Ok(self
            .class_context(thread)?
            .into_iter()
            .map(|class| class.loader)
            .find(|loader| !loader.is_bootstrap()))
    }

    /// `Throwable.printStackTrace`: the exception, its trace, then each cause and its trace
    ///
    /// Frames a cause has in common with the trace of the exception it caused are elided.
    pub fn print_stack_trace<W: Write>(
        &self,
        exception: ObjectHandle,
        out: &mut W,
    ) -> Result<(), Error> {
        let object = self.heap.object(exception)?;
        writeln!(out, "{}", self.heap.describe(exception)?)?;
        let mut enclosing = object.stack_trace();
        print_frames(out, enclosing.as_deref(), None)?;

        let mut seen = vec![exception];
        let mut cause = object.cause();
        while let Some(handle) = cause {
            let description = self.heap.describe(handle)?;
            if seen.contains(&handle) {
                writeln!(out, "Caused by: [CIRCULAR REFERENCE: {}]", description)?;
                break;
            }
            seen.push(handle);

            let object = self.heap.object(handle)?;
            writeln!(out, "Caused by: {}", description)?;
            let trace = object.stack_trace();
            print_frames(out, trace.as_deref(), enclosing.as_deref())?;
            enclosing = trace;
            cause = object.cause();
        }
        Ok(())
    }
}

/// Java frames of `trace`, eliding the outermost ones it shares with `enclosing`
fn print_frames<'g, W: Write>(
    out: &mut W,
    trace: Option<&StackTrace<'g>>,
    enclosing: Option<&StackTrace<'g>>,
) -> Result<(), Error> {
    let frames: Vec<&StackTraceEntry<'g>> = match trace {
        Some(trace) => trace.java_entries().collect(),
        None => return Ok(()),
    };
    let enclosing: Vec<&StackTraceEntry<'g>> = enclosing
        .map(|trace| trace.java_entries().collect())
        .unwrap_or_default();

    let in_common = frames
        .iter()
        .rev()
        .zip(enclosing.iter().rev())
        .take_while(|(frame, other)| frame == other)
        .count();

    for frame in &frames[..frames.len() - in_common] {
        if let Some(method) = frame.method {
            writeln!(
                out,
                "\tat {}.{}({})",
                method.class.name.to_java_name(),
                method.name.as_str(),
                source_location(frame, method.class),
            )?;
        }
    }
    if in_common > 0 {
        writeln!(out, "\t... {} more", in_common)?;
    }
    Ok(())
}

fn source_location(frame: &StackTraceEntry<'_>, class: ClassId<'_>) -> String {
    if frame.is_native() {
        return String::from("Native Method");
    }
    match (&class.source_file, frame.line) {
        (Some(file), 0) => file.clone(),
        (Some(file), line) => format!("{}:{}", file, line),
        (None, _) => String::from("Unknown Source"),
    }
}
