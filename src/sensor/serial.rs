//! Serial device setup
//!
//! Opens a serial device (a pseudo-terminal such as `/dev/pts/1`, or a COM
//! port on Windows) and configures it for 8 data bits, no parity, one stop
//! bit and no hardware flow control.

use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Baud rates accepted on every platform
pub const SUPPORTED_BAUD_RATES: [u32; 8] = [1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

/// Serial errors
#[derive(Error, Debug)]
pub enum SerialError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaudRate(u32),

    #[error("Failed to configure {path}: {message}")]
    Configure { path: PathBuf, message: String },
}

pub type SerialResult<T> = Result<T, SerialError>;

/// Direction a device is opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Where and how fast to talk to a serial device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub path: PathBuf,
    pub baud_rate: u32,
}

impl SerialSettings {
    pub fn new(path: impl Into<PathBuf>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }
}

/// Open and configure a device.
///
/// On unix the descriptor is non-blocking. A stalled reader on the other end
/// surfaces as a write error, and reads are driven by the runtime's reactor.
pub fn open(settings: &SerialSettings, access: Access) -> SerialResult<File> {
    if !SUPPORTED_BAUD_RATES.contains(&settings.baud_rate) {
        return Err(SerialError::UnsupportedBaudRate(settings.baud_rate));
    }

    let file = platform::open(&settings.path, access).map_err(|source| SerialError::Open {
        path: settings.path.clone(),
        source,
    })?;

    platform::configure(&file, settings.baud_rate).map_err(|message| SerialError::Configure {
        path: settings.path.clone(),
        message,
    })?;

    tracing::info!(
        "Opened {} for {:?} at {} baud (8N1)",
        settings.path.display(),
        access,
        settings.baud_rate
    );
    Ok(file)
}

/// Open a device for the simulator
pub fn open_writer(settings: &SerialSettings) -> SerialResult<tokio::fs::File> {
    open(settings, Access::Write).map(tokio::fs::File::from_std)
}

/// Open a device for the monitor
///
/// Must be called inside a tokio runtime.
pub fn open_reader(settings: &SerialSettings) -> SerialResult<SerialReader> {
    let file = open(settings, Access::Read)?;
    SerialReader::new(file).map_err(|source| SerialError::Open {
        path: settings.path.clone(),
        source,
    })
}

/// Read half of a serial device, polled through the reactor
#[cfg(unix)]
pub struct SerialReader {
    inner: tokio::io::unix::AsyncFd<File>,
}

#[cfg(unix)]
impl SerialReader {
    fn new(file: File) -> std::io::Result<Self> {
        Ok(Self {
            inner: tokio::io::unix::AsyncFd::new(file)?,
        })
    }
}

#[cfg(unix)]
impl tokio::io::AsyncRead for SerialReader {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        use std::io::Read;
        use std::task::{ready, Poll};

        loop {
            let mut guard = ready!(self.inner.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| {
                let mut file: &File = inner.get_ref();
                file.read(unfilled)
            }) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

/// Read half of a serial device
#[cfg(not(unix))]
pub struct SerialReader {
    inner: tokio::fs::File,
}

#[cfg(not(unix))]
impl SerialReader {
    fn new(file: File) -> std::io::Result<Self> {
        Ok(Self {
            inner: tokio::fs::File::from_std(file),
        })
    }
}

#[cfg(not(unix))]
impl tokio::io::AsyncRead for SerialReader {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        use tokio::io::AsyncRead;

        std::pin::Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

#[cfg(unix)]
mod platform {
    use super::*;
    use nix::sys::termios::{self, BaudRate, ControlFlags, SetArg};
    use std::fs::OpenOptions;
    use std::os::unix::fs::OpenOptionsExt;

    pub fn open(path: &Path, access: Access) -> std::io::Result<File> {
        OpenOptions::new()
            .read(access == Access::Read)
            .write(access == Access::Write)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(path)
    }

    pub fn configure(file: &File, baud_rate: u32) -> Result<(), String> {
        let speed = match baud_rate {
            1200 => BaudRate::B1200,
            2400 => BaudRate::B2400,
            4800 => BaudRate::B4800,
            9600 => BaudRate::B9600,
            19200 => BaudRate::B19200,
            38400 => BaudRate::B38400,
            57600 => BaudRate::B57600,
            115200 => BaudRate::B115200,
            other => return Err(format!("no termios speed for {} baud", other)),
        };

        let mut tty = termios::tcgetattr(file).map_err(|e| format!("tcgetattr: {}", e))?;

        tty.control_flags
            .remove(ControlFlags::CSIZE | ControlFlags::PARENB | ControlFlags::CSTOPB);
        tty.control_flags.insert(ControlFlags::CS8);
        #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos"))]
        tty.control_flags.remove(ControlFlags::CRTSCTS);

        termios::cfsetospeed(&mut tty, speed).map_err(|e| format!("cfsetospeed: {}", e))?;
        termios::cfsetispeed(&mut tty, speed).map_err(|e| format!("cfsetispeed: {}", e))?;

        termios::tcsetattr(file, SetArg::TCSANOW, &tty).map_err(|e| format!("tcsetattr: {}", e))
    }
}

#[cfg(windows)]
mod platform {
    use super::*;
    use std::fs::OpenOptions;
    use std::os::windows::io::AsRawHandle;
    use windows::Win32::Devices::Communication::{GetCommState, SetCommState, DCB, NOPARITY, ONESTOPBIT};
    use windows::Win32::Foundation::HANDLE;

    // fOutxCtsFlow and fOutxDsrFlow in the DCB bitfield
    const HARDWARE_FLOW_BITS: u32 = 0b1100;

    pub fn open(path: &Path, access: Access) -> std::io::Result<File> {
        OpenOptions::new()
            .read(access == Access::Read)
            .write(access == Access::Write)
            .open(device_path(path))
    }

    /// COM10 and above are only reachable through the device namespace
    fn device_path(path: &Path) -> PathBuf {
        let name = path.to_string_lossy();
        if name.to_ascii_uppercase().starts_with("COM") {
            PathBuf::from(format!(r"\\.\{}", name))
        } else {
            path.to_path_buf()
        }
    }

    pub fn configure(file: &File, baud_rate: u32) -> Result<(), String> {
        let handle = HANDLE(file.as_raw_handle() as isize);
        let mut dcb = DCB {
            DCBlength: std::mem::size_of::<DCB>() as u32,
            ..Default::default()
        };

        // SAFETY: the handle is owned by `file` and outlives both calls.
        unsafe { GetCommState(handle, &mut dcb) }.map_err(|e| format!("GetCommState: {}", e))?;

        dcb.BaudRate = baud_rate;
        dcb.ByteSize = 8;
        dcb.Parity = NOPARITY;
        dcb.StopBits = ONESTOPBIT;
        dcb._bitfield &= !HARDWARE_FLOW_BITS;

        // SAFETY: as above.
        unsafe { SetCommState(handle, &dcb) }.map_err(|e| format!("SetCommState: {}", e))
    }
}

#[cfg(not(any(unix, windows)))]
mod platform {
    use super::*;
    use std::fs::OpenOptions;

    pub fn open(path: &Path, access: Access) -> std::io::Result<File> {
        OpenOptions::new()
            .read(access == Access::Read)
            .write(access == Access::Write)
            .open(path)
    }

    pub fn configure(_file: &File, baud_rate: u32) -> Result<(), String> {
        tracing::warn!("Line settings are not supported here; leaving {} baud unset", baud_rate);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_baud_rate() {
        let settings = SerialSettings::new("/dev/null", 9601);
        assert!(matches!(
            open(&settings, Access::Write),
            Err(SerialError::UnsupportedBaudRate(9601))
        ));
    }

    #[test]
    fn test_missing_device() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SerialSettings::new(dir.path().join("no-such-port"), 9600);
        match open(&settings, Access::Write) {
            Err(SerialError::Open { path, .. }) => assert_eq!(path, settings.path),
            other => panic!("expected Open error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_regular_file_is_not_a_tty() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let settings = SerialSettings::new(file.path(), 9600);
        assert!(matches!(
            open(&settings, Access::Write),
            Err(SerialError::Configure { .. })
        ));
    }

    #[cfg(target_os = "linux")]
    fn pty_pair() -> (nix::pty::PtyMaster, String) {
        use nix::fcntl::OFlag;
        use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt};

        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).unwrap();
        grantpt(&master).unwrap();
        unlockpt(&master).unwrap();
        let path = ptsname_r(&master).unwrap();
        (master, path)
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_pty_configured_8n1() {
        use nix::sys::termios::{self, BaudRate, ControlFlags};

        let (_master, path) = pty_pair();
        let file = open(&SerialSettings::new(path, 9600), Access::Write).unwrap();
        let tty = termios::tcgetattr(&file).unwrap();

        assert!(tty.control_flags.contains(ControlFlags::CS8));
        assert!(!tty.control_flags.contains(ControlFlags::PARENB));
        assert!(!tty.control_flags.contains(ControlFlags::CSTOPB));
        assert!(!tty.control_flags.contains(ControlFlags::CRTSCTS));
        assert_eq!(termios::cfgetospeed(&tty), BaudRate::B9600);
    }

    #[tokio::test]
    #[cfg(target_os = "linux")]
    async fn test_reader_receives_lines_from_pty() {
        use crate::sensor::{Monitor, MonitorEvent};

        let (master, path) = pty_pair();
        let reader = open_reader(&SerialSettings::new(path, 9600)).unwrap();
        nix::unistd::write(&master, b"Temp=25.345,Press=1.05\n").unwrap();

        let mut monitor = Monitor::new(tokio::io::BufReader::new(reader));
        let event = tokio::time::timeout(std::time::Duration::from_secs(5), monitor.next_event())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, Some(MonitorEvent::Reading { .. })));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_pending_read_does_not_hold_runtime_shutdown() {
        use std::time::Duration;
        use tokio::io::AsyncBufReadExt;

        let (_master, path) = pty_pair();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let reader = open_reader(&SerialSettings::new(path, 9600)).unwrap();
            let mut reader = tokio::io::BufReader::new(reader);
            let mut line = Vec::new();
            let idle = tokio::time::timeout(
                Duration::from_millis(100),
                reader.read_until(b'\n', &mut line),
            )
            .await;
            assert!(idle.is_err());
        });

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            drop(runtime);
            let _ = done_tx.send(());
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(3)).is_ok());
    }
}
