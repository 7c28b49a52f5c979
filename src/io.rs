//! Asynchronous I/O manager: handle table, worker pool and completion
//! interrupts.
//!
//! Trigger registers submit work here. The submitting (VM) thread copies
//! everything a request needs out of session state first (buffer bytes,
//! file names, host addresses), so workers never touch memory or registers.
//! Each worker performs the blocking call and answers with an
//! [`IoCompletion`] on the interrupt queue, the only channel back into the
//! engine. Request-local failures (missing file, refused connection, unknown
//! handle) become error codes on the completion, never engine errors.
//!
//! In-flight requests cannot be cancelled; closing a handle does not abort
//! reads or accepts already running on it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;

/// One record on the session's interrupt queue.
#[derive(Debug)]
pub enum Interrupt {
    /// Completion of an asynchronous I/O request.
    Io(IoCompletion),
    /// Periodic timer tick.
    Timer,
    /// Software interrupt; the payload is the value written to the trigger
    /// register.
    Software(i32),
}

/// Copied completion payload of one I/O request. Delivered exactly once;
/// the dispatch loop applies `data` to memory before entering the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoCompletion {
    /// Operation type code (`OP_*`).
    pub op: i32,
    /// Handle the request ran against; for open/connect/accept/bind the
    /// newly allocated handle, or -1 on failure.
    pub handle: i32,
    /// Buffer address the request was submitted with.
    pub buf_addr: i32,
    /// Bytes transferred, or an operation-specific result; -1 on failure or
    /// end of stream.
    pub result: i32,
    /// 0 on success, `ERR_*` otherwise.
    pub error: i32,
    /// Bytes to store into memory at `buf_addr` on delivery (reads, DNS
    /// results).
    pub data: Vec<u8>,
}

impl IoCompletion {
    fn failed(op: i32, handle: i32, buf_addr: i32, error: i32) -> Self {
        Self {
            op,
            handle,
            buf_addr,
            result: -1,
            error,
            data: Vec::new(),
        }
    }
}

pub const OP_READ: i32 = 1;
pub const OP_WRITE: i32 = 2;
pub const OP_CLOSE: i32 = 3;
pub const OP_OPEN: i32 = 4;
pub const OP_CONNECT: i32 = 5;
pub const OP_RESOLVE: i32 = 6;
pub const OP_ACCEPT: i32 = 7;
pub const OP_BIND: i32 = 8;

pub const ERR_FAILED: i32 = 1;
pub const ERR_BAD_HANDLE: i32 = 2;
pub const ERR_BAD_ARGUMENT: i32 = 3;
pub const ERR_WRONG_TYPE: i32 = 4;

/// Console streams occupy fixed handles; dynamic resources start above them.
pub const HANDLE_STDIN: i32 = 1;
pub const HANDLE_STDOUT: i32 = 2;
pub const HANDLE_STDERR: i32 = 3;
const FIRST_DYNAMIC_HANDLE: i32 = 20;

const WORKER_COUNT: usize = 4;

/// An open resource. Entries are created when an open/connect/accept/bind
/// request completes and removed on close; nothing is collected implicitly.
#[derive(Debug)]
enum Resource {
    Stdin,
    Stdout,
    Stderr,
    File(File),
    Tcp(TcpStream),
    Listener(TcpListener),
}

impl Resource {
    /// Duplicates the underlying descriptor so blocking work can run
    /// outside the table lock.
    fn checkout(&self) -> std::io::Result<Resource> {
        Ok(match self {
            Resource::Stdin => Resource::Stdin,
            Resource::Stdout => Resource::Stdout,
            Resource::Stderr => Resource::Stderr,
            Resource::File(f) => Resource::File(f.try_clone()?),
            Resource::Tcp(s) => Resource::Tcp(s.try_clone()?),
            Resource::Listener(l) => Resource::Listener(l.try_clone()?),
        })
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Resource::Stdin => std::io::stdin().read(buf),
            Resource::File(f) => f.read(buf),
            Resource::Tcp(s) => s.read(buf),
            _ => Err(std::io::Error::from(std::io::ErrorKind::Unsupported)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Resource::Stdout => {
                let mut out = std::io::stdout();
                let n = out.write(buf)?;
                out.flush()?;
                Ok(n)
            }
            Resource::Stderr => {
                let mut err = std::io::stderr();
                let n = err.write(buf)?;
                err.flush()?;
                Ok(n)
            }
            Resource::File(f) => f.write(buf),
            Resource::Tcp(s) => s.write(buf),
            _ => Err(std::io::Error::from(std::io::ErrorKind::Unsupported)),
        }
    }
}

#[derive(Debug)]
struct HandleTable {
    entries: HashMap<i32, Resource>,
    next: i32,
}

impl HandleTable {
    fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(HANDLE_STDIN, Resource::Stdin);
        entries.insert(HANDLE_STDOUT, Resource::Stdout);
        entries.insert(HANDLE_STDERR, Resource::Stderr);
        Self {
            entries,
            next: FIRST_DYNAMIC_HANDLE,
        }
    }

    fn add(&mut self, resource: Resource) -> i32 {
        let handle = self.next;
        self.next += 1;
        self.entries.insert(handle, resource);
        handle
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed pool of worker threads consuming a job queue. Dropping the pool
/// closes the queue and joins the workers; jobs already running finish
/// first.
struct WorkerPool {
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn new(size: usize) -> Self {
        let (tx, rx) = std::sync::mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..size)
            .map(|_| {
                let rx = Arc::clone(&rx);
                std::thread::spawn(move || loop {
                    let job = {
                        let guard = rx.lock();
                        guard.recv()
                    };
                    match job {
                        Ok(job) => job(),
                        Err(_) => break,
                    }
                })
            })
            .collect();
        Self {
            jobs: Some(tx),
            workers,
        }
    }

    fn submit(&self, job: Job) {
        if let Some(jobs) = &self.jobs {
            let _ = jobs.send(job);
        }
    }

    fn shutdown(&mut self) {
        self.jobs.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Address for a connect request, copied out of memory at submit time.
#[derive(Debug, Clone)]
pub enum HostAddr {
    V4([u8; 4]),
    V6([u8; 16]),
    /// Unrecognized address type; completes with [`ERR_BAD_ARGUMENT`].
    Invalid,
}

/// Owns the handle table and worker pool; submission methods take only
/// copied data and return immediately.
pub struct IoManager {
    handles: Arc<Mutex<HandleTable>>,
    pool: WorkerPool,
    intr: Sender<Interrupt>,
}

impl IoManager {
    pub fn new(intr: Sender<Interrupt>) -> Self {
        Self {
            handles: Arc::new(Mutex::new(HandleTable::new())),
            pool: WorkerPool::new(WORKER_COUNT),
            intr,
        }
    }

    pub fn shutdown(&mut self) {
        self.pool.shutdown();
    }

    fn spawn<F>(&self, job: F)
    where
        F: FnOnce(&Mutex<HandleTable>) -> IoCompletion + Send + 'static,
    {
        let handles = Arc::clone(&self.handles);
        let intr = self.intr.clone();
        self.pool.submit(Box::new(move || {
            let completion = job(&handles);
            let _ = intr.send(Interrupt::Io(completion));
        }));
    }

    fn checkout(handles: &Mutex<HandleTable>, handle: i32) -> Result<Resource, i32> {
        let table = handles.lock();
        match table.entries.get(&handle) {
            None => Err(ERR_BAD_HANDLE),
            Some(resource) => resource.checkout().map_err(|_| ERR_FAILED),
        }
    }

    pub fn submit_read(&self, handle: i32, buf_addr: i32, len: i32) {
        self.spawn(move |handles| {
            if len < 0 {
                return IoCompletion::failed(OP_READ, handle, buf_addr, ERR_BAD_ARGUMENT);
            }
            let mut resource = match Self::checkout(handles, handle) {
                Ok(r) => r,
                Err(e) => return IoCompletion::failed(OP_READ, handle, buf_addr, e),
            };
            let mut buf = vec![0u8; len as usize];
            match resource.read(&mut buf) {
                Ok(n) => {
                    buf.truncate(n);
                    // An empty read of a non-empty request is end of stream.
                    let result = if n == 0 && len > 0 { -1 } else { n as i32 };
                    IoCompletion {
                        op: OP_READ,
                        handle,
                        buf_addr,
                        result,
                        error: 0,
                        data: buf,
                    }
                }
                Err(_) => IoCompletion::failed(OP_READ, handle, buf_addr, ERR_FAILED),
            }
        });
    }

    pub fn submit_write(&self, handle: i32, buf_addr: i32, data: Vec<u8>) {
        self.spawn(move |handles| {
            let mut resource = match Self::checkout(handles, handle) {
                Ok(r) => r,
                Err(e) => return IoCompletion::failed(OP_WRITE, handle, buf_addr, e),
            };
            match resource.write(&data) {
                Ok(n) => IoCompletion {
                    op: OP_WRITE,
                    handle,
                    buf_addr,
                    result: n as i32,
                    error: 0,
                    data: Vec::new(),
                },
                Err(_) => IoCompletion::failed(OP_WRITE, handle, buf_addr, ERR_FAILED),
            }
        });
    }

    pub fn submit_close(&self, handle: i32) {
        self.spawn(move |handles| {
            let removed = handles.lock().entries.remove(&handle);
            match removed {
                // Dropping the resource closes it.
                Some(_) => IoCompletion {
                    op: OP_CLOSE,
                    handle,
                    buf_addr: 0,
                    result: 0,
                    error: 0,
                    data: Vec::new(),
                },
                None => IoCompletion::failed(OP_CLOSE, handle, 0, ERR_BAD_HANDLE),
            }
        });
    }

    pub fn submit_open(&self, name: Vec<u8>, mode: i32, name_addr: i32) {
        self.spawn(move |handles| {
            let name = String::from_utf8_lossy(&name).into_owned();
            let opened = match mode {
                0 => OpenOptions::new().read(true).open(&name),
                1 => OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(&name),
                _ => return IoCompletion::failed(OP_OPEN, -1, name_addr, ERR_BAD_ARGUMENT),
            };
            match opened {
                Ok(file) => {
                    let handle = handles.lock().add(Resource::File(file));
                    IoCompletion {
                        op: OP_OPEN,
                        handle,
                        buf_addr: name_addr,
                        result: 0,
                        error: 0,
                        data: Vec::new(),
                    }
                }
                Err(_) => IoCompletion::failed(OP_OPEN, -1, name_addr, ERR_FAILED),
            }
        });
    }

    pub fn submit_connect(&self, addr: HostAddr, port: i32) {
        self.spawn(move |handles| {
            let ip: IpAddr = match addr {
                HostAddr::V4(octets) => Ipv4Addr::from(octets).into(),
                HostAddr::V6(octets) => Ipv6Addr::from(octets).into(),
                HostAddr::Invalid => {
                    return IoCompletion::failed(OP_CONNECT, -1, 0, ERR_BAD_ARGUMENT)
                }
            };
            if !(0..=u16::MAX as i32).contains(&port) {
                return IoCompletion::failed(OP_CONNECT, -1, 0, ERR_BAD_ARGUMENT);
            }
            match TcpStream::connect(SocketAddr::new(ip, port as u16)) {
                Ok(stream) => {
                    let handle = handles.lock().add(Resource::Tcp(stream));
                    IoCompletion {
                        op: OP_CONNECT,
                        handle,
                        buf_addr: 0,
                        result: 0,
                        error: 0,
                        data: Vec::new(),
                    }
                }
                Err(_) => IoCompletion::failed(OP_CONNECT, -1, 0, ERR_FAILED),
            }
        });
    }

    /// Resolves a host name; the result octets are delivered through the
    /// completion and stored at `dest_addr`, with the address type (0 = v4,
    /// 1 = v6) in the result field.
    pub fn submit_resolve(&self, name: Vec<u8>, dest_addr: i32) {
        self.spawn(move |handles| {
            let _ = handles;
            let name = String::from_utf8_lossy(&name).into_owned();
            let resolved = (name.as_str(), 0u16)
                .to_socket_addrs()
                .ok()
                .and_then(|mut addrs| addrs.next());
            match resolved {
                Some(SocketAddr::V4(addr)) => IoCompletion {
                    op: OP_RESOLVE,
                    handle: 0,
                    buf_addr: dest_addr,
                    result: 0,
                    error: 0,
                    data: addr.ip().octets().to_vec(),
                },
                Some(SocketAddr::V6(addr)) => IoCompletion {
                    op: OP_RESOLVE,
                    handle: 0,
                    buf_addr: dest_addr,
                    result: 1,
                    error: 0,
                    data: addr.ip().octets().to_vec(),
                },
                None => IoCompletion::failed(OP_RESOLVE, 0, dest_addr, ERR_FAILED),
            }
        });
    }

    pub fn submit_bind(&self, port: i32) {
        self.spawn(move |handles| {
            if !(0..=u16::MAX as i32).contains(&port) {
                return IoCompletion::failed(OP_BIND, -1, 0, ERR_BAD_ARGUMENT);
            }
            match TcpListener::bind(("0.0.0.0", port as u16)) {
                Ok(listener) => {
                    let handle = handles.lock().add(Resource::Listener(listener));
                    IoCompletion {
                        op: OP_BIND,
                        handle,
                        buf_addr: 0,
                        result: 0,
                        error: 0,
                        data: Vec::new(),
                    }
                }
                Err(_) => IoCompletion::failed(OP_BIND, -1, 0, ERR_FAILED),
            }
        });
    }

    pub fn submit_accept(&self, listener_handle: i32) {
        self.spawn(move |handles| {
            let resource = match Self::checkout(handles, listener_handle) {
                Ok(r) => r,
                Err(e) => return IoCompletion::failed(OP_ACCEPT, -1, 0, e),
            };
            let listener = match resource {
                Resource::Listener(l) => l,
                _ => return IoCompletion::failed(OP_ACCEPT, -1, 0, ERR_WRONG_TYPE),
            };
            match listener.accept() {
                Ok((stream, _)) => {
                    let handle = handles.lock().add(Resource::Tcp(stream));
                    IoCompletion {
                        op: OP_ACCEPT,
                        handle,
                        buf_addr: 0,
                        result: 0,
                        error: 0,
                        data: Vec::new(),
                    }
                }
                Err(_) => IoCompletion::failed(OP_ACCEPT, -1, 0, ERR_FAILED),
            }
        });
    }

    /// Seek position of a file handle; -1 for anything else. Synchronous.
    pub fn seek_position(&self, handle: i32) -> i32 {
        let mut table = self.handles.lock();
        match table.entries.get_mut(&handle) {
            Some(Resource::File(f)) => f
                .stream_position()
                .map(|p| p.min(i32::MAX as u64) as i32)
                .unwrap_or(-1),
            _ => -1,
        }
    }

    /// Repositions a file handle; ignored for anything else. Synchronous.
    pub fn seek_set(&self, handle: i32, position: i32) {
        let mut table = self.handles.lock();
        if let Some(Resource::File(f)) = table.entries.get_mut(&handle) {
            let _ = f.seek(SeekFrom::Start(position.max(0) as u64));
        }
    }

    /// Size of a file handle; -1 for anything else. Synchronous.
    pub fn file_size(&self, handle: i32) -> i32 {
        let table = self.handles.lock();
        match table.entries.get(&handle) {
            Some(Resource::File(f)) => f
                .metadata()
                .map(|m| m.len().min(i32::MAX as u64) as i32)
                .unwrap_or(-1),
            _ => -1,
        }
    }
}

/// Values of the I/O manager's plain (non-trigger) registers. Owned by the
/// session and touched only by the dispatch loop.
#[derive(Debug, Default, Clone)]
pub struct IoRegs {
    pub handler: i32,
    pub handle: i32,
    pub buf_addr: i32,
    pub buf_len: i32,
    pub file_name_addr: i32,
    pub file_name_len: i32,
    pub file_mode: i32,
    pub sock_addr: i32,
    pub sock_addr_type: i32,
    pub sock_port: i32,
    pub sock_name_addr: i32,
    pub sock_name_len: i32,
}
