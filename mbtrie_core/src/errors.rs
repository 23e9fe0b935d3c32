//! Error handling and C-ABI error codes for mbtrie

use std::cell::RefCell;
use std::fmt;
use std::os::raw::c_char;

/// Errors returned by trie operations.
///
/// Absence is not an error: lookups and removals of missing keys return
/// `None`. Only the C boundary reports it, as [`ErrorCode::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A key byte collides with the reserved sentinel slot.
    InvalidKey,
    /// The leaf slot for this key is already occupied.
    DuplicateKey,
    /// Another writer currently holds the trie's writer token.
    WriterBusy,
    /// `initialize` was called twice, or after the trie was mutated.
    AlreadyInitialized,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(ErrorCode::from(*self).as_str())
    }
}

impl std::error::Error for Error {}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    InvalidKey = 1,
    DuplicateKey = 2,
    NotFound = 3,
    WriterBusy = 4,
    AlreadyInitialized = 5,
    InvalidHandle = 6,
    NullPointer = 7,
    Unknown = 255,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Success => "Success",
            ErrorCode::InvalidKey => "Invalid key",
            ErrorCode::DuplicateKey => "Duplicate key",
            ErrorCode::NotFound => "Not found",
            ErrorCode::WriterBusy => "Writer busy",
            ErrorCode::AlreadyInitialized => "Already initialized",
            ErrorCode::InvalidHandle => "Invalid handle",
            ErrorCode::NullPointer => "Null pointer",
            ErrorCode::Unknown => "Unknown error",
        }
    }

    /// NUL-terminated twin of [`as_str`](Self::as_str) for C callers.
    pub fn as_c_str(self) -> *const c_char {
        let s: &'static [u8] = match self {
            ErrorCode::Success => b"Success\0",
            ErrorCode::InvalidKey => b"Invalid key\0",
            ErrorCode::DuplicateKey => b"Duplicate key\0",
            ErrorCode::NotFound => b"Not found\0",
            ErrorCode::WriterBusy => b"Writer busy\0",
            ErrorCode::AlreadyInitialized => b"Already initialized\0",
            ErrorCode::InvalidHandle => b"Invalid handle\0",
            ErrorCode::NullPointer => b"Null pointer\0",
            ErrorCode::Unknown => b"Unknown error\0",
        };
        s.as_ptr() as *const c_char
    }
}

impl From<Error> for ErrorCode {
    fn from(e: Error) -> Self {
        match e {
            Error::InvalidKey => ErrorCode::InvalidKey,
            Error::DuplicateKey => ErrorCode::DuplicateKey,
            Error::WriterBusy => ErrorCode::WriterBusy,
            Error::AlreadyInitialized => ErrorCode::AlreadyInitialized,
        }
    }
}

// Thread-local last error for C-ABI
thread_local! {
    static LAST_ERROR: RefCell<ErrorCode> = const { RefCell::new(ErrorCode::Success) };
}

pub fn set_last_error(code: ErrorCode) {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = code);
}

pub fn get_last_error() -> ErrorCode {
    LAST_ERROR.with(|cell| *cell.borrow())
}

/// Record `code` as the calling thread's last error and hand it back.
#[inline]
pub fn record(code: ErrorCode) -> ErrorCode {
    set_last_error(code);
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn c_strings_match_rust_strings() {
        for code in [
            ErrorCode::Success,
            ErrorCode::InvalidKey,
            ErrorCode::DuplicateKey,
            ErrorCode::NotFound,
            ErrorCode::WriterBusy,
            ErrorCode::AlreadyInitialized,
            ErrorCode::InvalidHandle,
            ErrorCode::NullPointer,
            ErrorCode::Unknown,
        ] {
            let c = unsafe { CStr::from_ptr(code.as_c_str()) };
            assert_eq!(c.to_str().unwrap(), code.as_str());
        }
    }

    #[test]
    fn last_error_is_per_thread() {
        set_last_error(ErrorCode::DuplicateKey);
        let other = std::thread::spawn(get_last_error).join().unwrap();
        assert_eq!(other, ErrorCode::Success);
        assert_eq!(get_last_error(), ErrorCode::DuplicateKey);
    }

    #[test]
    fn display_uses_code_text() {
        assert_eq!(Error::InvalidKey.to_string(), "Invalid key");
    }

    #[test]
    fn every_error_maps_to_a_failure_code() {
        for e in [
            Error::InvalidKey,
            Error::DuplicateKey,
            Error::WriterBusy,
            Error::AlreadyInitialized,
        ] {
            let code = ErrorCode::from(e);
            assert_ne!(code, ErrorCode::Success);
            assert_ne!(code, ErrorCode::NotFound, "absence is not an Error");
            assert_eq!(e.to_string(), code.as_str());
        }
    }
}
