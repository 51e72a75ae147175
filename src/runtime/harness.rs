use super::{Error, ObjectHandle, Runtime, ThreadContext};
use std::io;
use std::io::Write;

/// Exit status of a program that ended with an uncaught exception
pub const UNCAUGHT_EXCEPTION_STATUS: i32 = 1;

impl<'g> Runtime<'g> {
    /// Run the body of a thread, reporting an exception it leaves pending
    ///
    /// Returns the exit status of the program: 0 if the body returned normally, and
    /// [`UNCAUGHT_EXCEPTION_STATUS`] if an exception escaped (after printing it to stderr).
    pub fn run_main<F>(&self, thread: &mut ThreadContext<'g>, body: F) -> Result<i32, Error>
    where
        F: FnOnce(&Runtime<'g>, &mut ThreadContext<'g>) -> Result<(), Error>,
    {
        log::info!("Running thread {:?} ({})", thread.id, thread.name);
        body(self, thread)?;

        match thread.take_pending_exception() {
            None => {
                log::info!("Thread {:?} finished normally", thread.id);
                Ok(0)
            }
            Some(exception) => {
                log::info!("Thread {:?} ended with {:?}", thread.id, exception);
                let stderr = io::stderr();
                self.report_uncaught(thread, exception, &mut stderr.lock())?;
                Ok(UNCAUGHT_EXCEPTION_STATUS)
            }
        }
    }

    /// Print an exception that escaped a thread, the way the default uncaught exception handler
    /// does
    pub fn report_uncaught<W: Write>(
        &self,
        thread: &ThreadContext<'g>,
        exception: ObjectHandle,
        out: &mut W,
    ) -> Result<(), Error> {
        write!(out, "Exception in thread \"{}\" ", thread.name)?;
        self.print_stack_trace(exception, out)
    }
}
