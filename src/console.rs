//! Console seam between the engine and the host.
//!
//! The session talks to the console-in/out special registers through this
//! trait, so embedders and tests can substitute their own streams. Output
//! failures are swallowed (console output is fire-and-forget, like the
//! reference interpreter); input failures surface as execution errors.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;

pub trait Console: Send {
    /// Blocking read of one byte; -1 at end of input.
    fn read_value(&mut self) -> io::Result<i32>;
    /// Emits the low 16 bits of the value as a character.
    fn write_char(&mut self, value: i32);
    /// Emits the value as decimal text.
    fn write_int(&mut self, value: i32);
    /// Flushes buffered output; called before a blocking read and when the
    /// session finishes.
    fn flush(&mut self);
}

/// Standard console on stdin/stdout.
#[derive(Debug, Default)]
pub struct StdConsole;

impl Console for StdConsole {
    fn read_value(&mut self) -> io::Result<i32> {
        self.flush();
        let mut byte = [0u8; 1];
        match io::stdin().read(&mut byte) {
            Ok(0) => Ok(-1),
            Ok(_) => Ok(byte[0] as i32),
            Err(e) => Err(e),
        }
    }

    fn write_char(&mut self, value: i32) {
        let _ = write!(io::stdout(), "{}", char_for(value));
    }

    fn write_int(&mut self, value: i32) {
        let _ = write!(io::stdout(), "{value}");
    }

    fn flush(&mut self) {
        let _ = io::stdout().flush();
    }
}

/// Scripted console for tests and embedding: input is fed up front, output
/// is captured. Clones share the same state, so a copy handed to a session
/// can be observed from outside afterwards.
#[derive(Debug, Clone, Default)]
pub struct CaptureConsole {
    state: Arc<Mutex<CaptureState>>,
}

#[derive(Debug, Default)]
struct CaptureState {
    input: VecDeque<u8>,
    output: String,
}

impl CaptureConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(input: &str) -> Self {
        let console = Self::new();
        console.state.lock().input = input.bytes().collect();
        console
    }

    pub fn output(&self) -> String {
        self.state.lock().output.clone()
    }
}

impl Console for CaptureConsole {
    fn read_value(&mut self) -> io::Result<i32> {
        Ok(self
            .state
            .lock()
            .input
            .pop_front()
            .map(|b| b as i32)
            .unwrap_or(-1))
    }

    fn write_char(&mut self, value: i32) {
        self.state.lock().output.push(char_for(value));
    }

    fn write_int(&mut self, value: i32) {
        self.state.lock().output.push_str(&value.to_string());
    }

    fn flush(&mut self) {}
}

/// Character for an output value: the low 16 bits, with unpaired surrogates
/// replaced.
fn char_for(value: i32) -> char {
    char::from_u32(value as u32 & 0xFFFF).unwrap_or(char::REPLACEMENT_CHARACTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_console_scripts_input_and_records_output() {
        let mut console = CaptureConsole::with_input("ab");
        assert_eq!(console.read_value().unwrap(), 'a' as i32);
        assert_eq!(console.read_value().unwrap(), 'b' as i32);
        assert_eq!(console.read_value().unwrap(), -1, "EOF reads -1");

        console.write_char('H' as i32);
        console.write_int(-42);
        assert_eq!(console.output(), "H-42");
    }

    #[test]
    fn clones_share_captured_output() {
        let console = CaptureConsole::new();
        let mut clone = console.clone();
        clone.write_int(7);
        assert_eq!(console.output(), "7");
    }

    #[test]
    fn char_output_masks_to_sixteen_bits() {
        let mut console = CaptureConsole::new();
        console.write_char(0x1_0041);
        assert_eq!(console.output(), "A");
        console.write_char(0xD800);
        assert!(console.output().ends_with(char::REPLACEMENT_CHARACTER));
    }
}
