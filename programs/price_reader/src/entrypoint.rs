//! Price reader entrypoint

use pinocchio::{
    account_info::AccountInfo, entrypoint, msg, program_error::ProgramError, pubkey::Pubkey,
    ProgramResult,
};

use crate::instructions;

entrypoint!(process_instruction);

#[derive(Debug)]
enum ReaderInstruction {
    PriceRead,
}

pub fn process_instruction(
    program_id: &Pubkey,
    accounts: &[AccountInfo],
    instruction_data: &[u8],
) -> ProgramResult {
    let Some((&discriminator, data)) = instruction_data.split_first() else {
        msg!("Error: Instruction data is empty");
        return Err(ProgramError::InvalidInstructionData);
    };

    let instruction = match discriminator {
        0 => ReaderInstruction::PriceRead,
        _ => {
            msg!("Error: Unknown instruction");
            return Err(ProgramError::InvalidInstructionData);
        }
    };

    match instruction {
        ReaderInstruction::PriceRead => {
            msg!("Instruction: PriceRead");
            instructions::process_price_read(program_id, accounts, data)
        }
    }
}
