//! Windows named pipe line transport, for `local://pipe-name` addresses.
//!
//! The listener address is a *handshake* pipe whose sole
//! payload, once a client connects, is a freshly minted per-connection pipe
//! name. The client reads that name off the handshake pipe, then opens a
//! second pipe under it for the actual traffic. This lets one well-known
//! address serve arbitrarily many concurrent connections despite a single
//! named pipe instance only ever serving one client at a time.

use std::ffi::c_void;
use std::os::windows::ffi::OsStrExt;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadFile, WriteFile, FILE_FLAG_FIRST_PIPE_INSTANCE, FILE_GENERIC_READ,
    FILE_GENERIC_WRITE, OPEN_EXISTING,
};
use windows_sys::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, DisconnectNamedPipe, WaitNamedPipeW, PIPE_ACCESS_DUPLEX,
    PIPE_READMODE_BYTE, PIPE_READMODE_MESSAGE, PIPE_TYPE_BYTE, PIPE_TYPE_MESSAGE,
    PIPE_UNLIMITED_INSTANCES, PIPE_WAIT,
};

use crate::error::IoError;
use crate::line::{Acceptor, Line, LineFactory, LineOption};

const BUFFER_SIZE: u32 = 64 * 1024;
const HANDSHAKE_BUFFER_SIZE: u32 = 256;

struct RawHandle(HANDLE);
unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

fn wide_null(s: &str) -> Vec<u16> {
    std::ffi::OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

fn pipe_path(name: &str) -> String {
    if name.starts_with(r"\\.\pipe\") {
        name.to_string()
    } else {
        format!(r"\\.\pipe\{name}")
    }
}

/// Mints a fresh per-connection pipe name derived from the handshake
/// address, so concurrent connections never collide on the same instance.
fn mint_data_pipe_name(handshake_name: &str) -> String {
    format!("{handshake_name}-{}", uuid::Uuid::new_v4())
}

fn last_error() -> IoError {
    IoError::Os(std::io::Error::from_raw_os_error(unsafe { GetLastError() } as i32))
}

/// Runs `ConnectNamedPipe` on a helper thread so the caller can bound the
/// wait with a timeout; `ConnectNamedPipe` itself has no native deadline in
/// blocking mode. `HANDLE` is a plain integer value, so moving it into the
/// closure and using it again afterwards still refers to the same pipe
/// instance.
fn connect_with_timeout(handle: HANDLE, timeout: Duration) -> Result<bool, IoError> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let ok = unsafe { ConnectNamedPipe(handle, std::ptr::null_mut()) };
        let _ = tx.send(if ok != 0 { Ok(()) } else { Err(last_error()) });
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(())) => Ok(true),
        Ok(Err(e)) => Err(e),
        Err(mpsc::RecvTimeoutError::Timeout) => Ok(false),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(IoError::ConnectionLost),
    }
}

pub struct PipeLine {
    handle: RawHandle,
}

impl PipeLine {
    fn new(handle: HANDLE) -> Self {
        Self {
            handle: RawHandle(handle),
        }
    }
}

impl Line for PipeLine {
    fn read(&self, buf: &mut [u8]) -> Result<usize, IoError> {
        let mut read = 0u32;
        let ok = unsafe {
            ReadFile(
                self.handle.0,
                buf.as_mut_ptr() as *mut c_void,
                buf.len() as u32,
                &mut read,
                std::ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(last_error());
        }
        if read == 0 {
            return Err(IoError::ConnectionLost);
        }
        Ok(read as usize)
    }

    fn write(&self, buf: &[u8]) -> Result<usize, IoError> {
        let mut written = 0u32;
        let ok = unsafe {
            WriteFile(
                self.handle.0,
                buf.as_ptr() as *const c_void,
                buf.len() as u32,
                &mut written,
                std::ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(last_error());
        }
        Ok(written as usize)
    }

    fn set_option(&self, option: LineOption, _value: Duration) -> Result<(), IoError> {
        // Synchronous (non-overlapped) named pipe handles on Windows don't
        // expose a per-call timeout the way a socket does; a real deadline
        // would require FILE_FLAG_OVERLAPPED plus a completion port, which
        // is more machinery than this transport's callers currently need.
        match option {
            LineOption::ReceiveTimeout | LineOption::SendTimeout => Err(
                IoError::UnsupportedOption("named pipe lines are opened in blocking mode"),
            ),
        }
    }
}

impl Drop for PipeLine {
    fn drop(&mut self) {
        unsafe {
            DisconnectNamedPipe(self.handle.0);
            CloseHandle(self.handle.0);
        }
    }
}

fn create_pipe_instance(
    path: &[u16],
    pipe_type: u32,
    read_mode: u32,
    out_buf: u32,
    in_buf: u32,
) -> Result<HANDLE, IoError> {
    let handle = unsafe {
        CreateNamedPipeW(
            path.as_ptr(),
            PIPE_ACCESS_DUPLEX | FILE_FLAG_FIRST_PIPE_INSTANCE,
            pipe_type | read_mode | PIPE_WAIT,
            PIPE_UNLIMITED_INSTANCES,
            out_buf,
            in_buf,
            0,
            std::ptr::null_mut(),
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        return Err(last_error());
    }
    Ok(handle)
}

pub struct PipeAcceptor {
    name: String,
}

impl Acceptor for PipeAcceptor {
    fn wait_connection(&self, timeout: Duration) -> Result<Option<Box<dyn Line>>, IoError> {
        let deadline = Instant::now() + timeout;
        let handshake_path = wide_null(&pipe_path(&self.name));
        let handshake_handle = create_pipe_instance(
            &handshake_path,
            PIPE_TYPE_MESSAGE,
            PIPE_READMODE_MESSAGE,
            HANDSHAKE_BUFFER_SIZE,
            HANDSHAKE_BUFFER_SIZE,
        )?;
        let handshake = RawHandle(handshake_handle);

        let remaining = deadline.saturating_duration_since(Instant::now());
        if !connect_with_timeout(handshake.0, remaining)? {
            unsafe {
                DisconnectNamedPipe(handshake.0);
                CloseHandle(handshake.0);
            }
            return Ok(None);
        }

        let data_name = mint_data_pipe_name(&self.name);
        let data_path = wide_null(&pipe_path(&data_name));
        let data_handle = match create_pipe_instance(
            &data_path,
            PIPE_TYPE_BYTE,
            PIPE_READMODE_BYTE,
            BUFFER_SIZE,
            BUFFER_SIZE,
        ) {
            Ok(handle) => handle,
            Err(e) => {
                unsafe {
                    DisconnectNamedPipe(handshake.0);
                    CloseHandle(handshake.0);
                }
                return Err(e);
            }
        };
        let data = RawHandle(data_handle);

        let payload = data_name.as_bytes();
        let mut written = 0u32;
        let wrote_ok = unsafe {
            WriteFile(
                handshake.0,
                payload.as_ptr() as *const c_void,
                payload.len() as u32,
                &mut written,
                std::ptr::null_mut(),
            )
        };
        unsafe {
            DisconnectNamedPipe(handshake.0);
            CloseHandle(handshake.0);
        }
        if wrote_ok == 0 {
            unsafe { CloseHandle(data.0) };
            return Err(last_error());
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        match connect_with_timeout(data.0, remaining) {
            Ok(true) => Ok(Some(Box::new(PipeLine::new(data.0)))),
            Ok(false) => {
                unsafe {
                    DisconnectNamedPipe(data.0);
                    CloseHandle(data.0);
                }
                Ok(None)
            }
            Err(e) => {
                unsafe { CloseHandle(data.0) };
                Err(e)
            }
        }
    }
}

#[derive(Default)]
pub struct PipeLineFactory;

impl PipeLineFactory {
    pub fn new() -> Self {
        Self
    }
}

impl LineFactory for PipeLineFactory {
    fn supports_scheme(&self, scheme: &str) -> bool {
        scheme == "local"
    }

    fn create_client(&self, address: &str) -> Result<Box<dyn Line>, IoError> {
        let (_, name) = crate::addr::parse(address)
            .ok_or(IoError::UnsupportedOption("malformed local address"))?;

        let handshake_wide = wide_null(&pipe_path(name));
        let handshake_handle = unsafe {
            CreateFileW(
                handshake_wide.as_ptr(),
                FILE_GENERIC_READ | FILE_GENERIC_WRITE,
                0,
                std::ptr::null_mut(),
                OPEN_EXISTING,
                0,
                std::ptr::null_mut() as HANDLE,
            )
        };
        if handshake_handle == INVALID_HANDLE_VALUE {
            return Err(last_error());
        }
        let handshake = RawHandle(handshake_handle);

        let mut buf = [0u8; HANDSHAKE_BUFFER_SIZE as usize];
        let mut read = 0u32;
        let read_ok = unsafe {
            ReadFile(
                handshake.0,
                buf.as_mut_ptr() as *mut c_void,
                buf.len() as u32,
                &mut read,
                std::ptr::null_mut(),
            )
        };
        unsafe { CloseHandle(handshake.0) };
        if read_ok == 0 || read == 0 {
            return Err(last_error());
        }
        let data_name = String::from_utf8_lossy(&buf[..read as usize]).into_owned();

        let data_path_wide = wide_null(&pipe_path(&data_name));
        // The acceptor creates the data pipe instance slightly after the
        // handshake write completes; wait for it to come up rather than
        // racing a bare CreateFileW against it.
        unsafe { WaitNamedPipeW(data_path_wide.as_ptr(), 5_000) };

        let data_handle = unsafe {
            CreateFileW(
                data_path_wide.as_ptr(),
                FILE_GENERIC_READ | FILE_GENERIC_WRITE,
                0,
                std::ptr::null_mut(),
                OPEN_EXISTING,
                0,
                std::ptr::null_mut() as HANDLE,
            )
        };
        if data_handle == INVALID_HANDLE_VALUE {
            return Err(last_error());
        }
        Ok(Box::new(PipeLine::new(data_handle)))
    }

    fn create_server(&self, address: &str) -> Result<Box<dyn Acceptor>, IoError> {
        let (_, name) = crate::addr::parse(address)
            .ok_or(IoError::UnsupportedOption("malformed local address"))?;
        Ok(Box::new(PipeAcceptor {
            name: name.to_string(),
        }))
    }
}
