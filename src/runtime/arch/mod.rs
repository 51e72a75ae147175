//! Architecture specific frame layouts
//!
//! Everything the runtime knows about how a call lays out a frame lives behind [`Architecture`]:
//! where the return address is kept, where callee-saved registers are spilled, and how far up the
//! stack the caller's frame starts.

use super::{Address, Error, MachineStack, RegisterFile};

mod aarch64;
mod x86_64;

pub use aarch64::AArch64;
pub use x86_64::X86_64;

/// Names accepted by [`architecture_by_name`]
pub const ARCHITECTURE_NAMES: [&str; 2] = [X86_64::NAME, AArch64::NAME];

/// Shape of one compiled frame, as recorded in its method's metadata
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameShape {
    /// Frame size in words (not counting a return address pushed by the call)
    pub frame_size: usize,

    /// Leaf methods make no calls
    pub leaf: bool,

    /// Number of callee-saved integer registers spilled in the frame
    pub int_saved: usize,

    /// Number of callee-saved floating point registers spilled in the frame
    pub float_saved: usize,
}

pub trait Architecture: Send + Sync {
    fn name(&self) -> &'static str;

    /// Offset in words from the stack pointer one past the highest callee-saved register slot
    ///
    /// Integer registers are spilled downwards from there, followed by float registers.
    fn save_area_end(&self, shape: &FrameShape) -> usize;

    /// Return address of a frame whose stack pointer is `sp`
    fn return_address(
        &self,
        stack: &MachineStack,
        registers: &RegisterFile,
        sp: Address,
        shape: &FrameShape,
    ) -> Result<Address, Error>;

    /// Stack pointer of the caller once the frame at `sp` is gone
    fn caller_sp(&self, sp: Address, shape: &FrameShape) -> Address;

    /// Lay out the frame for a call, the way the call instruction and the callee prologue would
    ///
    /// Returns the callee's stack pointer (also left in `registers.sp`).
    fn push_frame(
        &self,
        stack: &mut MachineStack,
        registers: &mut RegisterFile,
        caller_sp: Address,
        return_address: Address,
        shape: &FrameShape,
    ) -> Result<Address, Error>;

    /// Program counter inside the call instruction a return address comes back to
    ///
    /// Return addresses point after the call, which may already be outside the exception range
    /// (or even the method) making the call.
    fn call_site(&self, return_address: Address) -> Address {
        return_address - 1
    }

    fn int_save_slot(&self, sp: Address, shape: &FrameShape, index: usize) -> Address {
        sp.add_words(self.save_area_end(shape).saturating_sub(1 + index))
    }

    fn float_save_slot(&self, sp: Address, shape: &FrameShape, index: usize) -> Address {
        sp.add_words(
            self.save_area_end(shape)
                .saturating_sub(1 + shape.int_saved + index),
        )
    }

    /// Spill callee-saved registers into the frame (prologue)
    fn save_registers(
        &self,
        stack: &mut MachineStack,
        registers: &RegisterFile,
        sp: Address,
        shape: &FrameShape,
    ) -> Result<(), Error> {
        for index in 0..shape.int_saved {
            stack.write(self.int_save_slot(sp, shape, index), registers.int[index])?;
        }
        for index in 0..shape.float_saved {
            let value = registers.float[index] as usize;
            stack.write(self.float_save_slot(sp, shape, index), value)?;
        }
        Ok(())
    }

    /// Remove one frame: restore callee-saved registers and the stack pointer
    ///
    /// Returns the frame's return address and the caller's stack pointer.
    fn unwind_frame(
        &self,
        stack: &MachineStack,
        registers: &mut RegisterFile,
        sp: Address,
        shape: &FrameShape,
    ) -> Result<(Address, Address), Error> {
        for index in 0..shape.int_saved {
            registers.int[index] = stack.read(self.int_save_slot(sp, shape, index))?;
        }
        for index in 0..shape.float_saved {
            registers.float[index] = stack.read(self.float_save_slot(sp, shape, index))? as u64;
        }
        let return_address = self.return_address(stack, registers, sp, shape)?;
        let caller_sp = self.caller_sp(sp, shape);
        registers.sp = caller_sp;
        Ok((return_address, caller_sp))
    }
}

pub fn architecture_by_name(name: &str) -> Option<Box<dyn Architecture>> {
    match name {
        X86_64::NAME => Some(Box::new(X86_64)),
        AArch64::NAME => Some(Box::new(AArch64)),
        _ => None,
    }
}

/// Check the new stack pointer fits in the stack before anything is written
fn check_stack_room(stack: &MachineStack, sp: Address) -> Result<(), Error> {
    if sp < stack.limit() {
        Err(Error::StackOutOfBounds(sp))
    } else {
        Ok(())
    }
}
