//! Error surface shared across the hook layer, the I/O helper, and the
//! public socket API.
//!
//! Every fallible public entry point returns `std::io::Result<T>`; there is
//! no bespoke error enum for I/O, since `std::io::Error` already carries an
//! OS error code and a `Display` impl. `ErrorKind::TimedOut` stands in for
//! the original's special-cased `ETIMEDOUT` ("Timed out") disposition.

use std::io;

/// Build the canonical timed-out error, matching the original's
/// `ETIMEDOUT -> "Timed out"` special case.
pub fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "timed out")
}

/// The last OS error on this thread, as an `io::Error`.
pub fn last_os_error() -> io::Error {
    io::Error::last_os_error()
}

/// True if `err` is `EINTR` and the call should simply be retried.
pub fn is_interrupted(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Interrupted
}

/// True if `err` is `EAGAIN`/`EWOULDBLOCK`.
pub fn is_would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}
