use super::{check_stack_room, Architecture, FrameShape};
use crate::runtime::{Address, Error, MachineStack, RegisterFile};

/// Calls leave the return address in the link register
///
/// Non-leaf methods spill it to the top slot of their frame. Leaf methods never overwrite the link
/// register, so it still holds their return address.
pub struct AArch64;

impl AArch64 {
    pub const NAME: &'static str = "aarch64";
}

impl Architecture for AArch64 {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn save_area_end(&self, shape: &FrameShape) -> usize {
        if shape.leaf {
            shape.frame_size
        } else {
            shape.frame_size.saturating_sub(1)
        }
    }

    fn return_address(
        &self,
        stack: &MachineStack,
        registers: &RegisterFile,
        sp: Address,
        shape: &FrameShape,
    ) -> Result<Address, Error> {
        if shape.leaf {
            Ok(registers.link)
        } else {
            let slot = sp.add_words(shape.frame_size.saturating_sub(1));
            stack.read(slot).map(Address)
        }
    }

    fn caller_sp(&self, sp: Address, shape: &FrameShape) -> Address {
        sp.add_words(shape.frame_size)
    }

    fn push_frame(
        &self,
        stack: &mut MachineStack,
        registers: &mut RegisterFile,
        caller_sp: Address,
        return_address: Address,
        shape: &FrameShape,
    ) -> Result<Address, Error> {
        let sp = caller_sp.sub_words(shape.frame_size);
        check_stack_room(stack, sp)?;

        registers.link = return_address;
        if !shape.leaf {
            stack.write(sp.add_words(shape.frame_size - 1), return_address.0)?;
        }
        self.save_registers(stack, registers, sp, shape)?;
        registers.sp = sp;
        Ok(sp)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn leaf_keeps_link_register() {
        let arch = AArch64;
        let mut stack = MachineStack::new(Address(0x2000), 64);
        let base = stack.base();
        let mut registers = RegisterFile::new(base);
        let shape = FrameShape {
            frame_size: 2,
            leaf: true,
            int_saved: 0,
            float_saved: 0,
        };

        let sp = arch
            .push_frame(&mut stack, &mut registers, base, Address(0x4444), &shape)
            .unwrap();
        assert_eq!(sp, base.sub_words(2));
        assert_eq!(registers.link, Address(0x4444));
        assert_eq!(stack.read(sp.add_words(1)).unwrap(), 0);
        assert_eq!(
            arch.return_address(&stack, &registers, sp, &shape).unwrap(),
            Address(0x4444)
        );
        assert_eq!(arch.caller_sp(sp, &shape), base);
    }

    #[test]
    fn non_leaf_spills_link_register() {
        let arch = AArch64;
        let mut stack = MachineStack::new(Address(0x2000), 64);
        let base = stack.base();
        let mut registers = RegisterFile::new(base);
        registers.int[0] = 7;
        let shape = FrameShape {
            frame_size: 3,
            leaf: false,
            int_saved: 1,
            float_saved: 0,
        };

        let sp = arch
            .push_frame(&mut stack, &mut registers, base, Address(0x5555), &shape)
            .unwrap();
        assert_eq!(stack.read(sp.add_words(2)).unwrap(), 0x5555);
        assert_eq!(stack.read(sp.add_words(1)).unwrap(), 7);

        // A later call clobbers the link register, the spilled copy is what counts
        registers.link = Address(0x9999);
        registers.int[0] = 0;
        let (return_address, caller_sp) = arch
            .unwind_frame(&stack, &mut registers, sp, &shape)
            .unwrap();
        assert_eq!(return_address, Address(0x5555));
        assert_eq!(caller_sp, base);
        assert_eq!(registers.int[0], 7);
    }
}
