//! Conversions between native string representations and owned Rust values.
//!
//! Every read of native memory goes through [`decode_terminated`]. Whether the
//! address must be released afterwards is carried by [`Ownership`] rather than
//! decided at the call site.

use std::ffi::{c_char, CStr, CString};
use tracing::warn;

/// Default size of buffers handed to buffer-based getters.
pub const DEFAULT_BUFFER_SIZE: u32 = 256;

/// Default size of the activation-mode buffers.
pub const DEFAULT_MODE_BUFFER_SIZE: u32 = 64;

/// Release entry point for strings allocated by the native component.
pub type FreeStringFn = unsafe extern "C" fn(*mut c_char);

/// Caller-owned, NUL-terminated input string.
///
/// The native side only reads it; it is freed when this value drops, which
/// must be after the call that borrowed [`BoundaryString::as_ptr`] returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryString(CString);

impl BoundaryString {
    /// Encodes `text` with a trailing terminator.
    ///
    /// Empty text still yields a single terminator byte, so the address is
    /// never null. An interior NUL truncates the text there, which is what
    /// the native reader would observe anyway.
    pub fn new(text: &str) -> Self {
        let bytes = match text.bytes().position(|b| b == 0) {
            Some(idx) => {
                warn!(offset = idx, "Truncating boundary string at interior NUL");
                &text.as_bytes()[..idx]
            }
            None => text.as_bytes(),
        };
        // No NUL remains in `bytes`, so construction cannot fail.
        Self(CString::new(bytes).unwrap_or_default())
    }

    /// Address to pass into a native call.
    pub fn as_ptr(&self) -> *const c_char {
        self.0.as_ptr()
    }

    /// Encoded bytes including the terminator.
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        self.0.as_bytes_with_nul()
    }

    /// The text as seen by the native side.
    pub fn to_str_lossy(&self) -> String {
        self.0.to_string_lossy().into_owned()
    }
}

impl From<&str> for BoundaryString {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

/// Who is responsible for an address returned by the native component.
#[derive(Clone, Copy)]
pub enum Ownership {
    /// Allocated per call; must be released exactly once through `free`.
    Owned(FreeStringFn),
    /// A process-lifetime constant; never released.
    Static,
}

impl std::fmt::Debug for Ownership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Owned(_) => f.write_str("Owned"),
            Self::Static => f.write_str("Static"),
        }
    }
}

/// A string address returned by the native component, tagged with its
/// release rule.
///
/// Dropping an unread owned value still releases it.
#[derive(Debug)]
pub struct NativeText {
    ptr: *mut c_char,
    ownership: Ownership,
}

impl NativeText {
    /// Wraps a native-allocated string that must be released through `free`.
    ///
    /// # Safety
    /// `ptr` must be null or a NUL-terminated string allocated by the native
    /// component that nobody else will release.
    pub unsafe fn owned(ptr: *mut c_char, free: FreeStringFn) -> Self {
        Self {
            ptr,
            ownership: Ownership::Owned(free),
        }
    }

    /// Wraps a process-owned constant string.
    ///
    /// # Safety
    /// `ptr` must be null or a NUL-terminated string that stays valid for the
    /// duration of this value.
    pub unsafe fn borrowed_static(ptr: *const c_char) -> Self {
        Self {
            ptr: ptr.cast_mut(),
            ownership: Ownership::Static,
        }
    }

    /// Returns true when the native call returned a null address.
    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// Release rule attached to this address.
    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// Reads the text and applies the release rule.
    pub fn into_string(mut self) -> String {
        // SAFETY: constructors require a valid terminated string or null.
        let text = unsafe { decode_terminated(self.ptr) }.unwrap_or_default();
        self.release();
        text
    }

    fn release(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        if let Ownership::Owned(free) = self.ownership {
            // SAFETY: the address came from the native allocator and is
            // nulled below so it is released exactly once.
            unsafe { free(self.ptr) };
        }
        self.ptr = std::ptr::null_mut();
    }
}

impl Drop for NativeText {
    fn drop(&mut self) {
        self.release();
    }
}

/// Decodes a NUL-terminated native string into an owned value.
///
/// Returns `None` for a null address. Invalid UTF-8 is replaced lossily.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated byte sequence that stays
/// valid for the duration of the call.
pub unsafe fn decode_terminated(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: guaranteed by the caller.
    let cstr = unsafe { CStr::from_ptr(ptr) };
    Some(cstr.to_string_lossy().into_owned())
}

/// Reads a fixed-size output buffer filled by the native component.
///
/// Stops at the first terminator; without one the whole buffer is the text.
/// Never looks beyond `buf.len()`.
pub fn from_fixed_buffer(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Zeroed fixed-size output buffer for buffer-based getters.
#[derive(Debug)]
pub struct OutBuffer {
    buf: Vec<u8>,
}

impl OutBuffer {
    /// Allocates `len` bytes, or `fallback` bytes when `len` is 0.
    pub fn with_len(len: u32, fallback: u32) -> Self {
        let size = if len == 0 { fallback } else { len };
        Self {
            buf: vec![0; size.max(1) as usize],
        }
    }

    /// Writable address for the native call.
    pub fn as_mut_ptr(&mut self) -> *mut c_char {
        self.buf.as_mut_ptr().cast()
    }

    /// Declared size passed alongside the address.
    pub fn len(&self) -> u32 {
        u32::try_from(self.buf.len()).unwrap_or(u32::MAX)
    }

    /// Always false; the buffer holds at least one byte.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Decodes the buffer contents.
    pub fn to_text(&self) -> String {
        from_fixed_buffer(&self.buf)
    }
}
