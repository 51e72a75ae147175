use super::{Error, MonitorState, StackTrace};
use crate::jvm::class_graph::ClassId;
use elsa::sync::FrozenVec;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Word-sized reference to a heap object
///
/// Handles are assigned from 1 so that the zero word can stand for `null` in stack slots.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ObjectHandle(pub usize);

impl ObjectHandle {
    /// Object referenced by a machine word, if it is not `null`
    pub fn from_word(word: usize) -> Option<ObjectHandle> {
        if word == 0 {
            None
        } else {
            Some(ObjectHandle(word))
        }
    }

    pub fn to_word(self) -> usize {
        self.0
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Fields of `java.lang.Throwable` the runtime manages
#[derive(Default)]
struct ThrowableState<'g> {
    detail_message: Option<String>,
    cause: Option<ObjectHandle>,
    payload: Option<i32>,
    stack_trace: Option<Arc<StackTrace<'g>>>,
}

pub struct Object<'g> {
    pub class: ClassId<'g>,
    pub handle: ObjectHandle,

    /// Monitor, for `synchronized`
    monitor: Mutex<MonitorState>,

    /// Only present on instances of `java/lang/Throwable` subclasses
    throwable: Option<Mutex<ThrowableState<'g>>>,
}

impl<'g> Object<'g> {
    pub fn is_throwable(&self) -> bool {
        self.throwable.is_some()
    }

    /// Current owner and recursion count of the monitor
    pub fn monitor_state(&self) -> MonitorState {
        *self.monitor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read-modify-write the monitor state atomically
    pub fn update_monitor<R>(&self, update: impl FnOnce(&mut MonitorState) -> R) -> R {
        update(&mut self.monitor.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn with_throwable<R: Default>(&self, f: impl FnOnce(&mut ThrowableState<'g>) -> R) -> R {
        match &self.throwable {
            Some(state) => f(&mut state.lock().unwrap_or_else(PoisonError::into_inner)),
            None => R::default(),
        }
    }

    pub fn detail_message(&self) -> Option<String> {
        self.with_throwable(|state| state.detail_message.clone())
    }

    pub fn set_detail_message(&self, message: Option<String>) {
        self.with_throwable(|state| state.detail_message = message)
    }

    pub fn cause(&self) -> Option<ObjectHandle> {
        self.with_throwable(|state| state.cause)
    }

    pub fn set_cause(&self, cause: Option<ObjectHandle>) {
        self.with_throwable(|state| state.cause = cause)
    }

    /// Integer carried by the exception (eg. the offending array index)
    pub fn payload(&self) -> Option<i32> {
        self.with_throwable(|state| state.payload)
    }

    pub fn set_payload(&self, payload: Option<i32>) {
        self.with_throwable(|state| state.payload = payload)
    }

    pub fn stack_trace(&self) -> Option<Arc<StackTrace<'g>>> {
        self.with_throwable(|state| state.stack_trace.clone())
    }

    /// Attach a trace snapshot unless one is already attached
    ///
    /// Returns whether the snapshot was attached.
    pub fn attach_stack_trace(&self, trace: Arc<StackTrace<'g>>) -> bool {
        self.with_throwable(|state| {
            if state.stack_trace.is_some() {
                false
            } else {
                state.stack_trace = Some(trace);
                true
            }
        })
    }
}

/// Append-only object store
///
/// Collection is out of scope here: objects live as long as the runtime. Allocation is serialized
/// so handles stay dense.
pub struct Heap<'g> {
    objects: FrozenVec<Box<Object<'g>>>,
    allocation: Mutex<()>,
}

impl<'g> Heap<'g> {
    pub fn new() -> Heap<'g> {
        Heap {
            objects: FrozenVec::new(),
            allocation: Mutex::new(()),
        }
    }

    pub fn allocate(&self, class: ClassId<'g>) -> ObjectHandle {
        let throwable = if class.is_throwable() {
            Some(Mutex::new(ThrowableState::default()))
        } else {
            None
        };

        let _allocation = self.allocation.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = ObjectHandle(self.objects.len() + 1);
        self.objects.push(Box::new(Object {
            class,
            handle,
            monitor: Mutex::new(MonitorState::default()),
            throwable,
        }));
        log::trace!("Allocated {:?} of {:?}", handle, class);
        handle
    }

    pub fn get(&self, handle: ObjectHandle) -> Option<&Object<'g>> {
        self.objects.get(handle.0.checked_sub(1)?)
    }

    pub fn object(&self, handle: ObjectHandle) -> Result<&Object<'g>, Error> {
        self.get(handle).ok_or(Error::UnknownObject(handle))
    }

    /// Equivalent of `Throwable.toString()`: the class name, then the message if there is one
    pub fn describe(&self, handle: ObjectHandle) -> Result<String, Error> {
        let object = self.object(handle)?;
        let class_name = object.class.name.to_java_name();
        Ok(match object.detail_message() {
            Some(message) => format!("{}: {}", class_name, message),
            None => class_name,
        })
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl<'g> Default for Heap<'g> {
    fn default() -> Self {
        Self::new()
    }
}
