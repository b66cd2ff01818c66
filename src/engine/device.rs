use super::instruction::{Instruction, MemKey, Mnemonic, Operand};
use super::leak::{Diagnostic, Fault, Leak, RunReport};
use super::system::{neighbor_map, RegisterPair, NUMBER_OF_REGISTERS};
use super::tracked::{ConstValue, TrackedValue};
use crate::config::Layout;
use log::{debug, trace, warn};
use std::collections::BTreeMap;

//
// Public Interface
//

/// Per-device warning switches. The mask, randomness and neighbor checks
/// are the tool's purpose and cannot be silenced; these flags only cover
/// the advisory classes around them.
#[derive(Clone, Copy, Debug)]
pub struct DeviceOptions {
    pub warn_unknown_instructions: bool,
    pub warn_bit_rearranging: bool,
    pub warn_carry_usage: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            warn_unknown_instructions: true,
            warn_bit_rearranging: true,
            warn_carry_usage: true,
        }
    }
}

/// The simulated AVR-8 core: register file, memory map, stack and the
/// single bit-storage cell, all holding provenance labels instead of
/// values. Instructions execute in source order, one flat pass, with no
/// interpretation of control flow.
#[derive(Debug)]
pub struct Device {
    pc: usize,
    program: Vec<Instruction>,
    sp: usize,
    stack: Vec<TrackedValue>,
    registers: Vec<TrackedValue>,
    bit_storage: TrackedValue,
    memory: BTreeMap<MemKey, TrackedValue>,
    neighbors: Vec<Vec<usize>>,
    pub options: DeviceOptions,
}

impl Default for Device {
    fn default() -> Self {
        Self::new(DeviceOptions::default())
    }
}

impl Device {
    pub fn new(options: DeviceOptions) -> Self {
        Self {
            pc: 0,
            program: Vec::new(),
            sp: 0,
            stack: Vec::new(),
            registers: (0..NUMBER_OF_REGISTERS).map(|_| TrackedValue::new()).collect(),
            bit_storage: TrackedValue::new(),
            memory: BTreeMap::new(),
            neighbors: neighbor_map(),
            options,
        }
    }

    /// Stores the program and seeds memory from the layout: random keys
    /// become anonymous fresh randomness, mask entries become single
    /// shares. Constant keys are accepted but seed nothing.
    pub fn load(&mut self, program: Vec<Instruction>, layout: &Layout) {
        self.pc = 0;
        self.sp = 0;
        self.stack.clear();
        self.program = program;

        for key in &layout.random {
            let mut cell = TrackedValue::new();
            let _ = cell.set_random(None);
            self.memory.insert(key.clone(), cell);
        }

        for entry in &layout.masks {
            let mut cell = TrackedValue::new();
            let _ = cell.load_mask(&entry.mask, entry.share);
            self.memory.insert(entry.cell.clone(), cell);
        }

        if !layout.constants.is_empty() {
            debug!(
                "{} constant cells declared, not initialized",
                layout.constants.len()
            );
        }

        debug!(
            "loaded {} instructions, {} random cells, {} mask cells",
            self.program.len(),
            layout.random.len(),
            layout.masks.len()
        );
    }

    /// Executes the loaded program once, in order. Every advisory finding
    /// and every structural fault is recorded against its program counter;
    /// a faulting instruction never stops the instructions after it.
    pub fn run(&mut self) -> RunReport {
        let mut report = RunReport::default();

        while self.pc < self.program.len() {
            let instruction = self.program[self.pc].clone();

            trace!("[{:04}] {}", self.pc, instruction.source);

            let mut findings = Vec::new();
            let outcome = self.dispatch(&instruction, &mut findings);

            for leak in findings {
                warn!("leakage warning at {} > {}: {}", self.pc, instruction.source, leak);
                report.record(Diagnostic::leak(self.pc, &instruction.source, leak));
            }

            if let Err(fault) = outcome {
                warn!("error at {} > {}: {}", self.pc, instruction.source, fault);
                report.record(Diagnostic::fault(self.pc, &instruction.source, fault));
            }

            self.pc += 1;
        }

        report
    }

    pub fn program_counter(&self) -> usize {
        self.pc
    }

    pub fn stack_pointer(&self) -> usize {
        self.sp
    }

    pub fn stack_in_use(&self) -> bool {
        !self.stack.is_empty()
    }

    pub fn register(&self, index: usize) -> &TrackedValue {
        &self.registers[index]
    }

    pub fn register_mut(&mut self, index: usize) -> &mut TrackedValue {
        &mut self.registers[index]
    }

    pub fn bit_storage(&self) -> &TrackedValue {
        &self.bit_storage
    }

    pub fn memory_cell(&self, key: &MemKey) -> Option<&TrackedValue> {
        self.memory.get(key)
    }

    pub fn format_registers(&self) -> String {
        let mut out = String::new();
        for (index, value) in self.registers.iter().enumerate() {
            out.push_str(&format!("r{}\t{}\n", index, value));
        }
        out
    }

    pub fn format_memory(&self) -> String {
        if self.memory.is_empty() {
            return "[empty memory]\n".to_string();
        }
        let mut out = String::new();
        for (key, value) in &self.memory {
            out.push_str(&format!("{}\t{}\n", key, value));
        }
        out
    }

    pub fn format_program(&self) -> String {
        if self.program.is_empty() {
            return "[no program loaded]\n".to_string();
        }
        let mut out = String::new();
        for (index, instruction) in self.program.iter().enumerate() {
            out.push_str(&instruction.source);
            if index == self.pc {
                out.push_str(" <- [PC]");
            }
            out.push('\n');
        }
        out
    }

    pub fn format_stack(&self) -> String {
        let mut out = String::from("[\t]");
        if self.sp == self.stack.len() {
            out.push_str(" <- [SP]");
        }
        out.push('\n');
        for index in (0..self.stack.len()).rev() {
            out.push_str(&self.stack[index].to_string());
            if index == self.sp {
                out.push_str(" <- [SP]");
            }
            out.push('\n');
        }
        out
    }
}

//
// Private Implementation
//

impl Device {
    fn dispatch(
        &mut self,
        instruction: &Instruction,
        findings: &mut Vec<Leak>,
    ) -> Result<(), Fault> {
        match &instruction.mnemonic {
            Mnemonic::Mov => {
                let (dst, src) = self.two_registers(instruction)?;
                self.mov(dst, src, findings)
            }
            Mnemonic::Bst => {
                let reg = self.register_index(instruction.op1.as_ref(), "source register")?;
                self.bst(reg, findings)
            }
            Mnemonic::Bld => {
                let reg = self.register_index(instruction.op1.as_ref(), "destination register")?;
                self.bld(reg, findings)
            }
            Mnemonic::Push => {
                let reg = self.register_index(instruction.op1.as_ref(), "source register")?;
                self.push(reg, findings)
            }
            Mnemonic::Pop => {
                let reg = self.register_index(instruction.op1.as_ref(), "destination register")?;
                self.pop(reg, findings)
            }
            Mnemonic::Eor
            | Mnemonic::And
            | Mnemonic::Or
            | Mnemonic::Add
            | Mnemonic::Sub
            | Mnemonic::Cp => {
                let (dst, src) = self.two_registers(instruction)?;
                self.combine(dst, src, findings)
            }
            Mnemonic::Adc | Mnemonic::Sbc | Mnemonic::Cpc => {
                let (dst, src) = self.two_registers(instruction)?;
                self.combine_carry(dst, src, findings)
            }
            Mnemonic::Mul
            | Mnemonic::Muls
            | Mnemonic::Mulsu
            | Mnemonic::Fmul
            | Mnemonic::Fmuls
            | Mnemonic::Fmulsu => {
                let (op1, op2) = self.two_registers(instruction)?;
                self.mul_combine(op1, op2, findings)
            }
            Mnemonic::Ldi => self.ldi(instruction, findings),
            Mnemonic::Lds => self.lds(instruction, findings),
            Mnemonic::Ld => self.ld(instruction, findings),
            Mnemonic::Sts => self.sts(instruction, findings),
            Mnemonic::St => self.st(instruction, findings),
            Mnemonic::Swap
            | Mnemonic::Lsr
            | Mnemonic::Lsl
            | Mnemonic::Ror
            | Mnemonic::Rol
            | Mnemonic::Asr => {
                if self.options.warn_bit_rearranging {
                    findings.push(Leak::BitRearranging);
                }
                Ok(())
            }
            Mnemonic::Unknown(_) => {
                if self.options.warn_unknown_instructions {
                    findings.push(Leak::UnknownInstruction);
                }
                Ok(())
            }
        }
    }

    // ---- operand resolution ----

    fn register_index(
        &self,
        operand: Option<&Operand>,
        role: &'static str,
    ) -> Result<usize, Fault> {
        match operand {
            Some(Operand::Register(index)) if *index < self.registers.len() => Ok(*index),
            Some(Operand::Register(index)) => Err(Fault::RegisterOutOfRange(*index)),
            Some(other) => Err(Fault::BadOperand {
                expected: "register",
                found: other.to_string(),
            }),
            None => Err(Fault::MissingOperand(role)),
        }
    }

    fn two_registers(&self, instruction: &Instruction) -> Result<(usize, usize), Fault> {
        let dst = self.register_index(instruction.op1.as_ref(), "destination register")?;
        let src = self.register_index(instruction.op2.as_ref(), "source register")?;
        Ok((dst, src))
    }

    fn pair_operand(
        &self,
        operand: Option<&Operand>,
        role: &'static str,
    ) -> Result<RegisterPair, Fault> {
        match operand {
            Some(Operand::Pair(pair)) => Ok(*pair),
            Some(other) => Err(Fault::BadOperand {
                expected: "pointer pair",
                found: other.to_string(),
            }),
            None => Err(Fault::MissingOperand(role)),
        }
    }

    fn memory_key_operand(
        &self,
        operand: Option<&Operand>,
        role: &'static str,
    ) -> Result<MemKey, Fault> {
        match operand {
            Some(Operand::Number(address)) => Ok(MemKey::Address(*address)),
            Some(Operand::Label(label)) => Ok(MemKey::Label(label.clone())),
            Some(other) => Err(Fault::BadOperand {
                expected: "memory address or label",
                found: other.to_string(),
            }),
            None => Err(Fault::MissingOperand(role)),
        }
    }

    /// Synthesizes a 16-bit memory key from the two bytes of a pointer
    /// pair: textual halves concatenate, numeric halves form
    /// `high << 8 | low`. Anything else cannot address memory.
    fn pair_address(&self, pair: RegisterPair) -> Result<MemKey, Fault> {
        let high = self.registers[pair.high()].const_value();
        let low = self.registers[pair.low()].const_value();

        match (high, low) {
            (Some(ConstValue::Text(high)), Some(ConstValue::Text(low))) => {
                Ok(MemKey::Label(format!("{}{}", high, low)))
            }
            (Some(ConstValue::Number(high)), Some(ConstValue::Number(low))) => {
                Ok(MemKey::Address((*high << 8) | *low))
            }
            _ => Err(Fault::UnresolvedPointer(pair)),
        }
    }

    // ---- leakage model ----

    /// Cross-talk model: the operand register is checked for mask-share
    /// collisions against the current contents of every physically
    /// adjacent register, before the instruction's own effect.
    fn check_neighbors(&self, reg: usize, findings: &mut Vec<Leak>) {
        for &neighbor in &self.neighbors[reg] {
            for collision in self.registers[reg]
                .check_mask_combination(self.registers[neighbor].mask_shares())
            {
                findings.push(Leak::Neighbor {
                    register: reg,
                    neighbor,
                    collision,
                });
            }
        }
    }

    // ---- instruction handlers ----

    fn mov(&mut self, dst: usize, src: usize, findings: &mut Vec<Leak>) -> Result<(), Fault> {
        self.check_neighbors(dst, findings);
        self.check_neighbors(src, findings);
        let value = self.registers[src].clone();
        findings.extend(self.registers[dst].replace_by(&value));
        Ok(())
    }

    fn combine(&mut self, dst: usize, src: usize, findings: &mut Vec<Leak>) -> Result<(), Fault> {
        let value = self.registers[src].clone();
        findings.extend(self.registers[dst].combine_with(&value));
        Ok(())
    }

    /// Same fold as `combine`, plus a standing advisory: carry-flag
    /// propagation is not modeled and may itself leak.
    fn combine_carry(
        &mut self,
        dst: usize,
        src: usize,
        findings: &mut Vec<Leak>,
    ) -> Result<(), Fault> {
        if self.options.warn_carry_usage {
            findings.push(Leak::CarryFlag);
        }
        self.combine(dst, src, findings)
    }

    /// `(r1:r0) <- op1 * op2`. Both operands fold into a temporary, which
    /// then overwrites both result registers. All findings from the three
    /// steps are collected; both destinations are written regardless.
    fn mul_combine(
        &mut self,
        op1: usize,
        op2: usize,
        findings: &mut Vec<Leak>,
    ) -> Result<(), Fault> {
        let mut product = TrackedValue::new();
        let _ = product.replace_by(&self.registers[op1]);
        findings.extend(product.combine_with(&self.registers[op2]));
        findings.extend(self.registers[0].replace_by(&product));
        findings.extend(self.registers[1].replace_by(&product));
        Ok(())
    }

    fn bst(&mut self, reg: usize, findings: &mut Vec<Leak>) -> Result<(), Fault> {
        self.check_neighbors(reg, findings);
        let value = self.registers[reg].clone();
        findings.extend(self.bit_storage.replace_by(&value));
        Ok(())
    }

    // Unlike bst, the hardware load direction does not touch neighboring
    // register cells, so no neighbor check here.
    fn bld(&mut self, reg: usize, findings: &mut Vec<Leak>) -> Result<(), Fault> {
        let value = self.bit_storage.clone();
        findings.extend(self.registers[reg].replace_by(&value));
        Ok(())
    }

    fn ldi(&mut self, instruction: &Instruction, findings: &mut Vec<Leak>) -> Result<(), Fault> {
        let target = match instruction.op1.as_ref() {
            Some(Operand::Register(index)) if *index < self.registers.len() => *index,
            Some(Operand::Register(index)) => return Err(Fault::RegisterOutOfRange(*index)),
            Some(Operand::Half(pair, half)) => pair.half(*half),
            Some(Operand::Label(text)) => return Err(Fault::UnknownRegisterAlias(text.clone())),
            Some(other) => {
                return Err(Fault::BadOperand {
                    expected: "register or pair half",
                    found: other.to_string(),
                })
            }
            None => return Err(Fault::MissingOperand("destination register")),
        };

        let value = match instruction.op2.as_ref() {
            Some(Operand::Number(number)) => ConstValue::Number(*number),
            Some(Operand::Label(label)) => ConstValue::Text(label.clone()),
            Some(Operand::Pair(pair)) => ConstValue::Text(pair.to_string()),
            Some(half @ Operand::Half(..)) => ConstValue::Text(half.to_string()),
            Some(other) => {
                return Err(Fault::BadOperand {
                    expected: "immediate",
                    found: other.to_string(),
                })
            }
            None => return Err(Fault::MissingOperand("immediate")),
        };

        self.check_neighbors(target, findings);
        self.registers[target].set_const(Some(value));
        Ok(())
    }

    fn lds(&mut self, instruction: &Instruction, findings: &mut Vec<Leak>) -> Result<(), Fault> {
        let dst = self.register_index(instruction.op1.as_ref(), "destination register")?;
        let key = self.memory_key_operand(instruction.op2.as_ref(), "memory address or label")?;
        self.check_neighbors(dst, findings);
        self.load_cell(dst, key, findings)
    }

    fn ld(&mut self, instruction: &Instruction, findings: &mut Vec<Leak>) -> Result<(), Fault> {
        let dst = self.register_index(instruction.op1.as_ref(), "destination register")?;
        self.check_neighbors(dst, findings);
        let pair = self.pair_operand(instruction.op2.as_ref(), "pointer pair")?;
        let key = self.pair_address(pair)?;
        self.load_cell(dst, key, findings)
    }

    fn sts(&mut self, instruction: &Instruction, findings: &mut Vec<Leak>) -> Result<(), Fault> {
        let key = self.memory_key_operand(instruction.op1.as_ref(), "memory address or label")?;
        let src = self.register_index(instruction.op2.as_ref(), "source register")?;
        self.check_neighbors(src, findings);
        self.store_cell(key, src, findings)
    }

    fn st(&mut self, instruction: &Instruction, findings: &mut Vec<Leak>) -> Result<(), Fault> {
        let pair = self.pair_operand(instruction.op1.as_ref(), "pointer pair")?;
        let src = self.register_index(instruction.op2.as_ref(), "source register")?;
        self.check_neighbors(src, findings);
        let key = self.pair_address(pair)?;
        self.store_cell(key, src, findings)
    }

    /// Loads require the cell to exist already; reading an unknown key is
    /// a structural error.
    fn load_cell(
        &mut self,
        dst: usize,
        key: MemKey,
        findings: &mut Vec<Leak>,
    ) -> Result<(), Fault> {
        let value = match self.memory.get(&key) {
            Some(value) => value.clone(),
            None => return Err(Fault::UnknownMemoryCell(key)),
        };
        findings.extend(self.registers[dst].replace_by(&value));
        Ok(())
    }

    /// Stores create the cell on first write.
    fn store_cell(
        &mut self,
        key: MemKey,
        src: usize,
        findings: &mut Vec<Leak>,
    ) -> Result<(), Fault> {
        let value = self.registers[src].clone();
        let cell = self.memory.entry(key).or_default();
        findings.extend(cell.replace_by(&value));
        Ok(())
    }

    fn push(&mut self, reg: usize, findings: &mut Vec<Leak>) -> Result<(), Fault> {
        self.check_neighbors(reg, findings);
        let value = self.registers[reg].clone();
        if self.sp == self.stack.len() {
            self.stack.push(value);
        } else {
            // rewriting on top of a slot a previous pop left behind
            findings.extend(self.stack[self.sp].replace_by(&value));
        }
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self, reg: usize, findings: &mut Vec<Leak>) -> Result<(), Fault> {
        self.check_neighbors(reg, findings);
        if self.sp == 0 {
            return Err(Fault::StackUnderflow);
        }
        self.sp -= 1;
        let value = self.stack[self.sp].clone();
        findings.extend(self.registers[reg].replace_by(&value));
        Ok(())
    }
}
