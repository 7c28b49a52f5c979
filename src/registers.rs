//! The special-register address map.
//!
//! Negative addresses name device and control registers instead of memory
//! cells; `register_get`/`register_put` on a [`crate::Session`] dispatch
//! here. The map is a fixed ABI: Migol programs address these registers as
//! magic numbers, so the assignments below must stay stable.
//!
//! Several registers also have parser tokens: `#` is [`PC`], `@` is
//! [`CONSOLE_IN`], `!` is [`INT_TRIGGER`], `!#` is [`INT_HANDLER`], `*#` is
//! [`INT_RETURN`], `*!` is [`INT_RESULT`], `\` is [`INT_WAIT`] and `#!` is
//! [`BRANCH_LEAVE`]. The I/O, file, socket and timer blocks are reached by
//! address only.

/// Program counter. Read returns the current 1-based statement index; a
/// write branches there and suppresses the automatic increment for the
/// current step. Writing a value below 1 is an execution error.
pub const PC: i32 = -1;
/// Console output, character mode. Write-triggered.
pub const CONSOLE_CHAR_OUT: i32 = -2;
/// Console output, decimal mode. Write-triggered.
pub const CONSOLE_INT_OUT: i32 = -3;
/// Console input. Each read blocks for one byte; -1 at end of input.
pub const CONSOLE_IN: i32 = -4;
/// Handler address for software interrupts.
pub const INT_HANDLER: i32 = -5;
/// Return address saved when an interrupt handler is entered. Read-only;
/// -1 outside a handler.
pub const INT_RETURN: i32 = -6;
/// Branch and leave handler: writing sets the PC, clears interrupt mode and
/// resets the return/result registers in one step. Write-only.
pub const BRANCH_LEAVE: i32 = -7;
/// Wait for interrupt: a write arms a blocking poll of the interrupt queue
/// at the end of the current step.
pub const INT_WAIT: i32 = -8;
/// Software-interrupt trigger: the written value is enqueued as an
/// interrupt payload, readable in the handler through [`INT_RESULT`].
pub const INT_TRIGGER: i32 = -9;
/// Payload of the software interrupt currently being handled. Read-only;
/// -1 outside a software-interrupt handler.
pub const INT_RESULT: i32 = -10;

/// Handler address for I/O completion interrupts.
pub const IO_HANDLER: i32 = -16;
/// Target handle for the next read/write/close/accept request.
pub const IO_HANDLE: i32 = -17;
/// Memory address of the transfer buffer.
pub const IO_BUF_ADDR: i32 = -18;
/// Transfer length in bytes (one memory cell per byte).
pub const IO_BUF_LEN: i32 = -19;
/// Read trigger: reading this register submits an asynchronous read of
/// [`IO_BUF_LEN`] bytes from [`IO_HANDLE`] into [`IO_BUF_ADDR`].
pub const IO_READ: i32 = -20;
/// Write trigger: submits an asynchronous write of the buffer to the handle.
pub const IO_WRITE: i32 = -21;
/// Close trigger: submits an asynchronous close of [`IO_HANDLE`].
pub const IO_CLOSE: i32 = -22;
/// Accept trigger: submits an asynchronous accept on the listener in
/// [`IO_HANDLE`].
pub const IO_ACCEPT: i32 = -23;

/// Handle field of the I/O interrupt currently being handled.
pub const INT_IO_HANDLE: i32 = -24;
/// Buffer address field of the current I/O interrupt.
pub const INT_IO_BUF: i32 = -25;
/// Bytes-transferred/result field of the current I/O interrupt.
pub const INT_IO_BYTES: i32 = -26;
/// Error code field of the current I/O interrupt; 0 means success.
pub const INT_IO_ERROR: i32 = -27;
/// Operation type field of the current I/O interrupt.
pub const INT_IO_TYPE: i32 = -28;

/// Memory address of a file name (one UTF-8 byte per cell).
pub const FILE_NAME_ADDR: i32 = -32;
/// File name length in bytes.
pub const FILE_NAME_LEN: i32 = -33;
/// File open mode: 0 read-only, 1 read/write (created if missing).
pub const FILE_MODE: i32 = -34;
/// Open trigger: submits an asynchronous file open.
pub const FILE_OPEN: i32 = -35;
/// Seek position of the current handle. Synchronous; -1 for non-files.
pub const FILE_SEEK: i32 = -36;
/// Size of the current handle's file. Synchronous read; -1 for non-files.
pub const FILE_SIZE: i32 = -37;

/// Memory address of an IP address buffer (one octet per cell). Connect
/// reads from it; a DNS resolution writes the result into it.
pub const SOCK_ADDR: i32 = -40;
/// IP address type: 0 IPv4 (4 octets), 1 IPv6 (16 octets).
pub const SOCK_ADDR_TYPE: i32 = -41;
/// TCP port for connect and bind.
pub const SOCK_PORT: i32 = -42;
/// Memory address of a host name (one UTF-8 byte per cell) for resolution.
pub const SOCK_NAME_ADDR: i32 = -43;
/// Host name length in bytes.
pub const SOCK_NAME_LEN: i32 = -44;
/// Connect trigger: submits an asynchronous TCP connect.
pub const SOCK_CONNECT: i32 = -45;
/// Resolve trigger: submits an asynchronous DNS lookup.
pub const SOCK_RESOLVE: i32 = -46;
/// Bind trigger: submits an asynchronous creation of a listening socket on
/// [`SOCK_PORT`].
pub const SOCK_BIND: i32 = -47;

/// Handler address for timer interrupts.
pub const TIMER_HANDLER: i32 = -48;
/// Timer period in milliseconds. Writing a non-zero value (re)starts the
/// periodic scheduler; writing 0 cancels it.
pub const TIMER_PERIOD: i32 = -49;
/// Current wall-clock time in milliseconds, truncated to 32 bits.
/// Synchronous read, no interrupt involved.
pub const TIME_MS: i32 = -50;
