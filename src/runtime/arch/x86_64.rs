use super::{check_stack_room, Architecture, FrameShape};
use crate::runtime::{Address, Error, MachineStack, RegisterFile};

/// Calls push the return address, which ends up just above the callee's frame
///
/// ```text
///   caller_sp ->  +----------------+
///                 | return address |
///                 +----------------+  sp + frame_size
///                 | int saved 0..  |
///                 | float saved 0..|
///                 | locals         |
///          sp ->  +----------------+
/// ```
pub struct X86_64;

impl X86_64 {
    pub const NAME: &'static str = "x86_64";
}

impl Architecture for X86_64 {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn save_area_end(&self, shape: &FrameShape) -> usize {
        shape.frame_size
    }

    fn return_address(
        &self,
        stack: &MachineStack,
        _registers: &RegisterFile,
        sp: Address,
        shape: &FrameShape,
    ) -> Result<Address, Error> {
        stack.read(sp.add_words(shape.frame_size)).map(Address)
    }

    fn caller_sp(&self, sp: Address, shape: &FrameShape) -> Address {
        sp.add_words(shape.frame_size + 1)
    }

    fn push_frame(
        &self,
        stack: &mut MachineStack,
        registers: &mut RegisterFile,
        caller_sp: Address,
        return_address: Address,
        shape: &FrameShape,
    ) -> Result<Address, Error> {
        let return_slot = caller_sp.sub_words(1);
        let sp = return_slot.sub_words(shape.frame_size);
        check_stack_room(stack, sp)?;

        stack.write(return_slot, return_address.0)?;
        self.save_registers(stack, registers, sp, shape)?;
        registers.sp = sp;
        Ok(sp)
    }
}
