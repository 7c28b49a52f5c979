//! Flat session-state snapshots.
//!
//! The format is the program counter, the memory length, then every cell,
//! all big-endian 32-bit integers. Loading replaces the session's PC and
//! memory wholesale; everything else (handles, registers, console) is
//! untouched.

use crate::session::Session;
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("i/o error: {0}")]
    Io(std::io::Error),
    #[error("invalid snapshot: {0}")]
    Invalid(String),
}

pub fn save_state<W: Write>(session: &Session, mut out: W) -> std::io::Result<()> {
    out.write_all(&session.pc().to_be_bytes())?;
    out.write_all(&(session.memory().len() as i32).to_be_bytes())?;
    for cell in session.memory() {
        out.write_all(&cell.to_be_bytes())?;
    }
    out.flush()
}

pub fn load_state<R: Read>(session: &mut Session, mut input: R) -> Result<(), SnapshotError> {
    let pc = read_i32(&mut input)?;
    let len = read_i32(&mut input)?;
    if len < 0 {
        return Err(SnapshotError::Invalid(format!(
            "negative memory length {len}"
        )));
    }
    let mut memory = vec![0i32; len as usize];
    for cell in &mut memory {
        *cell = read_i32(&mut input)?;
    }
    session.restore_state(pc, memory);
    Ok(())
}

fn read_i32<R: Read>(input: &mut R) -> Result<i32, SnapshotError> {
    let mut bytes = [0u8; 4];
    input.read_exact(&mut bytes).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            SnapshotError::Invalid("truncated snapshot".to_string())
        } else {
            SnapshotError::Io(e)
        }
    })?;
    Ok(i32::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_reproduces_pc_and_memory() {
        let mut session = Session::new(8);
        session.restore_state(3, vec![42, 0, 0, 0, 0, 0, 0, -7]);
        let mut blob = Vec::new();
        save_state(&session, &mut blob).unwrap();
        assert_eq!(blob.len(), 4 + 4 + 8 * 4);

        let mut restored = Session::new(1);
        load_state(&mut restored, blob.as_slice()).unwrap();
        assert_eq!(restored.pc(), session.pc());
        assert_eq!(restored.memory(), session.memory());
    }

    #[test]
    fn truncated_snapshot_is_rejected() {
        let mut session = Session::new(4);
        let mut blob = Vec::new();
        save_state(&session, &mut blob).unwrap();
        blob.truncate(blob.len() - 2);
        let err = load_state(&mut session, blob.as_slice()).unwrap_err();
        assert!(matches!(err, SnapshotError::Invalid(_)), "{err}");
    }

    #[test]
    fn negative_length_is_rejected() {
        let mut blob = Vec::new();
        blob.extend_from_slice(&1i32.to_be_bytes());
        blob.extend_from_slice(&(-5i32).to_be_bytes());
        let mut session = Session::new(4);
        let err = load_state(&mut session, blob.as_slice()).unwrap_err();
        assert!(matches!(err, SnapshotError::Invalid(_)), "{err}");
    }
}
