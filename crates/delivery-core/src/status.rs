//! Status codes shared with the C ABI

/// Integer status returned by ABI functions and passed to callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    /// Success
    Ok = 0,
    /// Any runtime or validation failure
    Err = 1,
    /// No completion callback was supplied
    MissingCallback = 2,
}

impl StatusCode {
    /// Raw integer value
    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

impl From<StatusCode> for i32 {
    fn from(code: StatusCode) -> Self {
        code.as_raw()
    }
}
