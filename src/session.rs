//! Execution session: memory, program counter, special-register dispatch
//! and the interrupt-driven run loop.
//!
//! The loop is strictly single-threaded; compound-assignment ordering
//! depends on it. Worker threads and the timer communicate with the loop
//! only through the interrupt queue, and the wait register is the loop's
//! sole suspension point.

use crate::console::{Console, StdConsole};
use crate::io::{Interrupt, IoCompletion, IoManager, IoRegs};
use crate::program::{OpKind, Program, Statement, Value};
use crate::registers;
use crate::timer::{self, TimerService};
use crate::{ExecError, ExecErrorKind, Result};
use std::sync::mpsc::{Receiver, Sender};

/// Default number of memory cells, matching the reference interpreter.
pub const DEFAULT_MEMORY_SIZE: usize = 1024 * 1024;

pub struct Session {
    memory: Vec<i32>,
    pc: i32,
    /// Set when a statement rewrote the PC; suppresses the automatic
    /// increment for the current step.
    pc_locked: bool,
    in_interrupt: bool,
    /// Armed by a write to the wait register; makes the next interrupt poll
    /// block.
    wait_armed: bool,
    int_handler: i32,
    int_return: i32,
    int_result: i32,
    /// Payload of the I/O interrupt currently being handled, for the
    /// introspection registers.
    cur_io: Option<IoCompletion>,
    io_regs: IoRegs,
    io: IoManager,
    timer: TimerService,
    intr_tx: Sender<Interrupt>,
    intr_rx: Receiver<Interrupt>,
    console: Box<dyn Console>,
    trace: bool,
}

impl Session {
    pub fn new(memory_size: usize) -> Self {
        Self::with_console(memory_size, Box::new(StdConsole))
    }

    pub fn with_console(memory_size: usize, console: Box<dyn Console>) -> Self {
        let (intr_tx, intr_rx) = std::sync::mpsc::channel();
        Self {
            memory: vec![0; memory_size],
            pc: 1,
            pc_locked: false,
            in_interrupt: false,
            wait_armed: false,
            int_handler: 0,
            int_return: -1,
            int_result: -1,
            cur_io: None,
            io_regs: IoRegs::default(),
            io: IoManager::new(intr_tx.clone()),
            timer: TimerService::new(intr_tx.clone()),
            intr_tx,
            intr_rx,
            console,
            trace: std::env::var_os("MIGOL_TRACE").is_some(),
        }
    }

    pub fn memory(&self) -> &[i32] {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut [i32] {
        &mut self.memory
    }

    pub fn pc(&self) -> i32 {
        self.pc
    }

    /// Enables statement tracing to stderr (also switched on by the
    /// `MIGOL_TRACE` environment variable).
    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    /// Restores the starting state: PC 1, zeroed memory, no pending
    /// interrupt context. Open handles and the console are kept.
    pub fn reset(&mut self) {
        self.pc = 1;
        self.memory.fill(0);
        self.pc_locked = false;
        self.in_interrupt = false;
        self.wait_armed = false;
        self.int_return = -1;
        self.int_result = -1;
        self.cur_io = None;
        self.timer.cancel();
        while self.intr_rx.try_recv().is_ok() {}
    }

    pub(crate) fn restore_state(&mut self, pc: i32, memory: Vec<i32>) {
        self.pc = pc;
        self.memory = memory;
    }

    /// Runs the program until the PC leaves `1..=len` (normal halt) or a
    /// statement faults. The timer is cancelled and pending interrupts are
    /// discarded before returning; errors are surfaced, never printed.
    pub fn run(&mut self, program: &Program) -> Result<()> {
        let result = self.step_loop(program);
        self.timer.cancel();
        while self.intr_rx.try_recv().is_ok() {}
        self.console.flush();
        result
    }

    fn step_loop(&mut self, program: &Program) -> Result<()> {
        while let Some(stmt) = program.statement(self.pc) {
            self.pc_locked = false;
            if self.trace {
                eprintln!("[migol] {}: {}", self.pc, stmt);
            }
            self.execute(stmt)?;
            if !self.pc_locked {
                self.pc += 1;
            }
            self.poll_interrupts()?;
        }
        Ok(())
    }

    fn execute(&mut self, stmt: &Statement) -> Result<()> {
        match stmt {
            Statement::Guarded { cond, value, inner } => {
                let guard = self.fetch(*value)?;
                if cond.holds(guard) {
                    self.execute(inner)?;
                }
                Ok(())
            }
            Statement::Assignment { target, ops } => {
                for op in ops {
                    // The target address is re-resolved for every operation,
                    // so a chain observes its own earlier writes.
                    let addr = self.resolve_target(*target)?;
                    let result = if op.kind == OpKind::Assign {
                        self.fetch(op.operand)?
                    } else {
                        let current = self.register_get(addr)?;
                        let operand = self.fetch(op.operand)?;
                        op.kind.apply(current, operand, self.pc)?
                    };
                    self.register_put(addr, result)?;
                }
                Ok(())
            }
            Statement::ConsoleOut { value, mode } => {
                let value = self.fetch(*value)?;
                match mode {
                    crate::program::OutputMode::Char => self.console.write_char(value),
                    crate::program::OutputMode::Int => self.console.write_int(value),
                }
                Ok(())
            }
            Statement::Nop => Ok(()),
        }
    }

    /// Resolves a value: zero defers is the base itself; otherwise one
    /// register-path read followed by plain memory reads.
    fn fetch(&mut self, value: Value) -> Result<i32> {
        if value.defers == 0 {
            return Ok(value.base);
        }
        let mut current = self.register_get(value.base)?;
        for _ in 1..value.defers {
            current = self.mem_read(current)?;
        }
        Ok(current)
    }

    /// Address an assignment writes through: the base for bare values,
    /// otherwise the fetched value.
    fn resolve_target(&mut self, target: Value) -> Result<i32> {
        if target.defers == 0 {
            Ok(target.base)
        } else {
            self.fetch(target)
        }
    }

    fn mem_read(&self, addr: i32) -> Result<i32> {
        if addr >= 0 {
            if let Some(value) = self.memory.get(addr as usize) {
                return Ok(*value);
            }
        }
        Err(ExecError::new(
            ExecErrorKind::AddressOutOfRange(addr),
            self.pc,
        ))
    }

    fn mem_write(&mut self, addr: i32, value: i32) -> Result<()> {
        if addr >= 0 {
            if let Some(cell) = self.memory.get_mut(addr as usize) {
                *cell = value;
                return Ok(());
            }
        }
        Err(ExecError::new(
            ExecErrorKind::AddressOutOfRange(addr),
            self.pc,
        ))
    }

    /// Bytes for an outgoing buffer: the low byte of each cell.
    fn read_block(&self, addr: i32, len: i32) -> Result<Vec<u8>> {
        let mut block = Vec::with_capacity(len.max(0) as usize);
        for i in 0..len.max(0) {
            block.push(self.mem_read(addr + i)? as u8);
        }
        Ok(block)
    }

    /// Stores delivered bytes, one per cell.
    fn write_block(&mut self, addr: i32, data: &[u8]) -> Result<()> {
        for (i, byte) in data.iter().enumerate() {
            self.mem_write(addr + i as i32, *byte as i32)?;
        }
        Ok(())
    }

    /// Reads a register or memory cell. Negative addresses dispatch on the
    /// special-register map; trigger registers submit their request and
    /// return immediately.
    pub fn register_get(&mut self, addr: i32) -> Result<i32> {
        if addr >= 0 {
            return self.mem_read(addr);
        }
        match addr {
            registers::PC => Ok(self.pc),
            registers::CONSOLE_CHAR_OUT | registers::CONSOLE_INT_OUT => Ok(0),
            registers::CONSOLE_IN => {
                self.console.flush();
                self.console
                    .read_value()
                    .map_err(|e| ExecError::new(ExecErrorKind::ConsoleInput(e.to_string()), self.pc))
            }
            registers::INT_HANDLER => Ok(self.int_handler),
            registers::INT_RETURN => Ok(self.int_return),
            registers::INT_RESULT => Ok(self.int_result),
            registers::INT_WAIT | registers::INT_TRIGGER => Ok(0),
            registers::BRANCH_LEAVE => Err(ExecError::new(
                ExecErrorKind::WriteOnlyRegister(addr),
                self.pc,
            )),

            registers::IO_HANDLER => Ok(self.io_regs.handler),
            registers::IO_HANDLE => Ok(self.io_regs.handle),
            registers::IO_BUF_ADDR => Ok(self.io_regs.buf_addr),
            registers::IO_BUF_LEN => Ok(self.io_regs.buf_len),
            registers::IO_READ => {
                self.io
                    .submit_read(self.io_regs.handle, self.io_regs.buf_addr, self.io_regs.buf_len);
                Ok(1)
            }
            registers::IO_WRITE => {
                let data = self.read_block(self.io_regs.buf_addr, self.io_regs.buf_len)?;
                self.io
                    .submit_write(self.io_regs.handle, self.io_regs.buf_addr, data);
                Ok(1)
            }
            registers::IO_CLOSE => {
                self.io.submit_close(self.io_regs.handle);
                Ok(1)
            }
            registers::IO_ACCEPT => {
                self.io.submit_accept(self.io_regs.handle);
                Ok(1)
            }

            registers::INT_IO_HANDLE => Ok(self.cur_io.as_ref().map_or(0, |c| c.handle)),
            registers::INT_IO_BUF => Ok(self.cur_io.as_ref().map_or(0, |c| c.buf_addr)),
            registers::INT_IO_BYTES => Ok(self.cur_io.as_ref().map_or(0, |c| c.result)),
            registers::INT_IO_ERROR => Ok(self.cur_io.as_ref().map_or(0, |c| c.error)),
            registers::INT_IO_TYPE => Ok(self.cur_io.as_ref().map_or(0, |c| c.op)),

            registers::FILE_NAME_ADDR => Ok(self.io_regs.file_name_addr),
            registers::FILE_NAME_LEN => Ok(self.io_regs.file_name_len),
            registers::FILE_MODE => Ok(self.io_regs.file_mode),
            registers::FILE_OPEN => {
                let name =
                    self.read_block(self.io_regs.file_name_addr, self.io_regs.file_name_len)?;
                self.io
                    .submit_open(name, self.io_regs.file_mode, self.io_regs.file_name_addr);
                Ok(1)
            }
            registers::FILE_SEEK => Ok(self.io.seek_position(self.io_regs.handle)),
            registers::FILE_SIZE => Ok(self.io.file_size(self.io_regs.handle)),

            registers::SOCK_ADDR => Ok(self.io_regs.sock_addr),
            registers::SOCK_ADDR_TYPE => Ok(self.io_regs.sock_addr_type),
            registers::SOCK_PORT => Ok(self.io_regs.sock_port),
            registers::SOCK_NAME_ADDR => Ok(self.io_regs.sock_name_addr),
            registers::SOCK_NAME_LEN => Ok(self.io_regs.sock_name_len),
            registers::SOCK_CONNECT => {
                let addr = self.host_addr()?;
                self.io.submit_connect(addr, self.io_regs.sock_port);
                Ok(1)
            }
            registers::SOCK_RESOLVE => {
                let name =
                    self.read_block(self.io_regs.sock_name_addr, self.io_regs.sock_name_len)?;
                self.io.submit_resolve(name, self.io_regs.sock_addr);
                Ok(1)
            }
            registers::SOCK_BIND => {
                self.io.submit_bind(self.io_regs.sock_port);
                Ok(1)
            }

            registers::TIMER_HANDLER => Ok(self.timer.handler),
            registers::TIMER_PERIOD => Ok(self.timer.period()),
            registers::TIME_MS => Ok(timer::current_time_millis()),

            _ => Err(ExecError::new(
                ExecErrorKind::UnmappedRegister(addr),
                self.pc,
            )),
        }
    }

    /// Writes a register or memory cell.
    pub fn register_put(&mut self, addr: i32, value: i32) -> Result<()> {
        if addr >= 0 {
            return self.mem_write(addr, value);
        }
        match addr {
            registers::PC => {
                if value <= 0 {
                    return Err(ExecError::new(ExecErrorKind::NonPositivePc(value), self.pc));
                }
                self.pc = value;
                self.pc_locked = true;
                Ok(())
            }
            registers::CONSOLE_CHAR_OUT => {
                self.console.write_char(value);
                Ok(())
            }
            registers::CONSOLE_INT_OUT => {
                self.console.write_int(value);
                Ok(())
            }
            registers::BRANCH_LEAVE => {
                self.pc = value;
                self.pc_locked = true;
                self.in_interrupt = false;
                self.int_return = -1;
                self.int_result = -1;
                self.cur_io = None;
                Ok(())
            }
            registers::INT_HANDLER => {
                self.int_handler = value;
                Ok(())
            }
            registers::INT_WAIT => {
                self.wait_armed = true;
                Ok(())
            }
            registers::INT_TRIGGER => {
                let _ = self.intr_tx.send(Interrupt::Software(value));
                Ok(())
            }
            // Read-only registers ignore writes, like the reference
            // interpreter.
            registers::CONSOLE_IN
            | registers::INT_RETURN
            | registers::INT_RESULT
            | registers::IO_READ
            | registers::IO_WRITE
            | registers::IO_CLOSE
            | registers::IO_ACCEPT
            | registers::INT_IO_HANDLE
            | registers::INT_IO_BUF
            | registers::INT_IO_BYTES
            | registers::INT_IO_ERROR
            | registers::INT_IO_TYPE
            | registers::FILE_OPEN
            | registers::FILE_SIZE
            | registers::SOCK_CONNECT
            | registers::SOCK_RESOLVE
            | registers::SOCK_BIND
            | registers::TIME_MS => Ok(()),

            registers::IO_HANDLER => {
                self.io_regs.handler = value;
                Ok(())
            }
            registers::IO_HANDLE => {
                self.io_regs.handle = value;
                Ok(())
            }
            registers::IO_BUF_ADDR => {
                self.io_regs.buf_addr = value;
                Ok(())
            }
            registers::IO_BUF_LEN => {
                self.io_regs.buf_len = value;
                Ok(())
            }
            registers::FILE_NAME_ADDR => {
                self.io_regs.file_name_addr = value;
                Ok(())
            }
            registers::FILE_NAME_LEN => {
                self.io_regs.file_name_len = value;
                Ok(())
            }
            registers::FILE_MODE => {
                self.io_regs.file_mode = value;
                Ok(())
            }
            registers::FILE_SEEK => {
                self.io.seek_set(self.io_regs.handle, value);
                Ok(())
            }
            registers::SOCK_ADDR => {
                self.io_regs.sock_addr = value;
                Ok(())
            }
            registers::SOCK_ADDR_TYPE => {
                self.io_regs.sock_addr_type = value;
                Ok(())
            }
            registers::SOCK_PORT => {
                self.io_regs.sock_port = value;
                Ok(())
            }
            registers::SOCK_NAME_ADDR => {
                self.io_regs.sock_name_addr = value;
                Ok(())
            }
            registers::SOCK_NAME_LEN => {
                self.io_regs.sock_name_len = value;
                Ok(())
            }
            registers::TIMER_HANDLER => {
                self.timer.handler = value;
                Ok(())
            }
            registers::TIMER_PERIOD => {
                self.timer.set_period(value);
                Ok(())
            }
            _ => Err(ExecError::new(
                ExecErrorKind::UnmappedRegister(addr),
                self.pc,
            )),
        }
    }

    fn host_addr(&self) -> Result<crate::io::HostAddr> {
        use crate::io::HostAddr;
        Ok(match self.io_regs.sock_addr_type {
            0 => {
                let block = self.read_block(self.io_regs.sock_addr, 4)?;
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&block);
                HostAddr::V4(octets)
            }
            1 => {
                let block = self.read_block(self.io_regs.sock_addr, 16)?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&block);
                HostAddr::V6(octets)
            }
            _ => HostAddr::Invalid,
        })
    }

    /// Interrupt check at the end of a step. Skipped while a handler is
    /// running; blocking when the wait register was armed this step.
    fn poll_interrupts(&mut self) -> Result<()> {
        if self.in_interrupt {
            return Ok(());
        }
        let interrupt = if self.wait_armed {
            self.wait_armed = false;
            self.console.flush();
            self.intr_rx.recv().ok()
        } else {
            self.intr_rx.try_recv().ok()
        };
        match interrupt {
            Some(interrupt) => self.enter_interrupt(interrupt),
            None => Ok(()),
        }
    }

    fn enter_interrupt(&mut self, interrupt: Interrupt) -> Result<()> {
        let handler = match &interrupt {
            Interrupt::Io(_) => self.io_regs.handler,
            Interrupt::Timer => self.timer.handler,
            Interrupt::Software(_) => self.int_handler,
        };
        match interrupt {
            Interrupt::Io(completion) => {
                if !completion.data.is_empty() {
                    self.write_block(completion.buf_addr, &completion.data)?;
                }
                self.cur_io = Some(completion);
            }
            Interrupt::Software(value) => self.int_result = value,
            Interrupt::Timer => {}
        }
        self.int_return = self.pc;
        self.pc = handler;
        self.in_interrupt = true;
        self.pc_locked = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::CaptureConsole;
    use crate::parse::parse;

    fn run(source: &str, memory: usize) -> Session {
        let program = parse(source).expect("program parses");
        let mut session = Session::new(memory);
        session.run(&program).expect("program runs");
        session
    }

    fn run_with_console(source: &str, input: &str) -> (Session, CaptureConsole) {
        let console = CaptureConsole::with_input(input);
        let program = parse(source).expect("program parses");
        let mut session = Session::with_console(64, Box::new(console.clone()));
        session.run(&program).expect("program runs");
        (session, console)
    }

    #[test]
    fn compound_assignment_observes_its_own_writes() {
        let session = run("0<3, 0<[0]<$*2<[0]<$*2", 16);
        assert_eq!(session.memory()[0], 12);
    }

    #[test]
    fn false_guard_skips_without_side_effects() {
        let session = run("5<10?<>0", 16);
        assert_eq!(session.memory()[5], 0, "guarded write must not happen");
        assert_eq!(session.pc(), 2, "PC advances by exactly one");
    }

    #[test]
    fn pc_write_suppresses_auto_increment() {
        // Statement 1 jumps over statement 2.
        let session = run("#<3, 0<99, 1<7", 16);
        assert_eq!(session.memory()[0], 0);
        assert_eq!(session.memory()[1], 7);
    }

    #[test]
    fn pc_register_as_numeric_target_also_locks() {
        let session = run("-1<3, 0<99, 1<7", 16);
        assert_eq!(session.memory()[0], 0);
        assert_eq!(session.memory()[1], 7);
    }

    #[test]
    fn countdown_loop_terminates_at_zero() {
        let session = run("0<100000, 0<$-1, -1<2?<>[0]", 16);
        assert_eq!(session.memory()[0], 0);
    }

    #[test]
    fn deferred_pc_reads_current_statement_index() {
        let session = run("0<[#], 1<[#]", 16);
        assert_eq!(session.memory()[0], 1);
        assert_eq!(session.memory()[1], 2);
    }

    #[test]
    fn unmapped_register_read_faults_with_pc() {
        let program = parse("_, 0<[-999]").unwrap();
        let mut session = Session::new(16);
        let err = session.run(&program).unwrap_err();
        assert_eq!(err.pc, 2);
        assert_eq!(err.kind, ExecErrorKind::UnmappedRegister(-999));
    }

    #[test]
    fn out_of_range_memory_access_faults_with_pc() {
        let program = parse("0<[50]").unwrap();
        let mut session = Session::new(16);
        let err = session.run(&program).unwrap_err();
        assert_eq!(err.pc, 1);
        assert_eq!(err.kind, ExecErrorKind::AddressOutOfRange(50));
    }

    #[test]
    fn non_positive_pc_write_faults() {
        let program = parse("#<0").unwrap();
        let mut session = Session::new(16);
        let err = session.run(&program).unwrap_err();
        assert_eq!(err.kind, ExecErrorKind::NonPositivePc(0));
    }

    #[test]
    fn division_by_zero_faults_with_pc() {
        let program = parse("0<4, 0<$/[1]").unwrap();
        let mut session = Session::new(16);
        let err = session.run(&program).unwrap_err();
        assert_eq!(err.pc, 2);
        assert_eq!(err.kind, ExecErrorKind::DivisionByZero);
    }

    #[test]
    fn reading_branch_leave_register_faults() {
        let program = parse("0<[#!]").unwrap();
        let mut session = Session::new(16);
        let err = session.run(&program).unwrap_err();
        assert_eq!(
            err.kind,
            ExecErrorKind::WriteOnlyRegister(registers::BRANCH_LEAVE)
        );
    }

    #[test]
    fn console_output_modes() {
        let (_, console) = run_with_console("72>, 105>, 33>, 10>, -5>-", "");
        assert_eq!(console.output(), "Hi!\n-5");
    }

    #[test]
    fn console_input_reads_through_defer() {
        let (session, _) = run_with_console("0<[@], 1<[@], 2<[@]", "Hi");
        assert_eq!(session.memory()[0], 'H' as i32);
        assert_eq!(session.memory()[1], 'i' as i32);
        assert_eq!(session.memory()[2], -1, "EOF reads -1");
    }

    #[test]
    fn software_interrupt_enters_and_leaves_handler() {
        // The trigger's interrupt is delivered at the end of that same step,
        // so the saved return address is statement 3. The handler records
        // the payload and the return address, then leaves through `#!`.
        let source = "\
!#<handler, !<42, 0<7, #<99\n\
3<[*!]:handler, 4<[*#], #!<[*#]";
        let (session, _) = run_with_console(source, "");
        assert_eq!(session.memory()[3], 42, "handler saw the payload");
        assert_eq!(session.memory()[4], 3, "return address saved");
        assert_eq!(session.memory()[0], 7, "execution resumed after handler");
    }

    #[test]
    fn interrupt_result_resets_after_leave() {
        let source = "\
!#<handler, !<9, 0<[*!]<$+1, #<99\n\
#!<[*#]:handler";
        let (session, _) = run_with_console(source, "");
        // After leaving the handler the result register reads -1 again.
        assert_eq!(session.memory()[0], 0);
    }

    #[test]
    fn handler_defers_further_interrupts_until_leave() {
        // The handler raises a second interrupt while still inside the
        // first one; it must only be delivered after `#!` leaves.
        let source = "\
!#<handler, !<1, 0<[0]<$+10, #<99\n\
6<[6]<$+[*!]:handler, !<50?=[7], 7<1, #!<[*#]";
        let (session, _) = run_with_console(source, "");
        assert_eq!(session.memory()[6], 51, "both payloads accumulated");
        assert_eq!(session.memory()[0], 10, "main flow resumed once");
    }

    #[test]
    fn timer_interrupts_fire_and_cancel() {
        // Arm a 5 ms timer, wait for a tick, bump a counter in the handler,
        // cancel from the main flow and halt.
        let source = "\
-48<handler, -49<5, \\<1, -49<0, #<99\n\
0<[0]<$+1:handler, #!<[*#]";
        let (session, _) = run_with_console(source, "");
        assert!(session.memory()[0] >= 1, "timer handler ran");
    }

    #[test]
    fn wall_clock_register_reads_synchronously() {
        let session = run("0<[-50]", 16);
        assert_ne!(session.memory()[0], 0);
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut session = run("0<5, #<9", 16);
        session.reset();
        assert_eq!(session.pc(), 1);
        assert!(session.memory().iter().all(|&v| v == 0));
    }

    #[test]
    fn identical_runs_are_deterministic() {
        let source = "0<3, 1<[0]<$*7<$-2, 2<[1]<$%5, 3<[2]<$<<2";
        let a = run(source, 32);
        let b = run(source, 32);
        assert_eq!(a.memory(), b.memory());
        assert_eq!(a.pc(), b.pc());
    }
}
