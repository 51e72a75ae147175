use super::{Object, ThreadId};

/// Owner and recursion count of an object's monitor
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct MonitorState {
    pub owner: Option<ThreadId>,
    pub count: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum MonitorError {
    /// Monitor is held by another thread
    Contended { owner: ThreadId },

    /// Releasing a monitor the thread does not hold
    NotOwner { owner: Option<ThreadId> },
}

/// Monitor operations the dispatcher relies on
pub trait Monitors: Send + Sync {
    fn acquire(&self, object: &Object<'_>, thread: ThreadId) -> Result<(), MonitorError>;
    fn release(&self, object: &Object<'_>, thread: ThreadId) -> Result<(), MonitorError>;
}

/// Recursive monitors stored directly in the object
///
/// There is no blocking: acquiring a monitor held by another thread fails.
pub struct RecursiveMonitors;

impl Monitors for RecursiveMonitors {
    fn acquire(&self, object: &Object<'_>, thread: ThreadId) -> Result<(), MonitorError> {
        object.update_monitor(|state| match state.owner {
            Some(owner) if owner != thread => Err(MonitorError::Contended { owner }),
            _ => {
                state.owner = Some(thread);
                state.count += 1;
                Ok(())
            }
        })
    }

    fn release(&self, object: &Object<'_>, thread: ThreadId) -> Result<(), MonitorError> {
        object.update_monitor(|state| {
            if state.owner != Some(thread) || state.count == 0 {
                return Err(MonitorError::NotOwner { owner: state.owner });
            }
            state.count -= 1;
            if state.count == 0 {
                state.owner = None;
            }
            Ok(())
        })
    }
}
