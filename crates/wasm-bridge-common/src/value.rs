//! Argument values passed to exported entry points.

use serde::{Deserialize, Serialize};

/// A single argument for an exported entry point.
///
/// Entry points conventionally take addresses and lengths, which travel as
/// `I32`. Unsigned addresses convert losslessly through [`From<u32>`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum WasmArg {
    /// 32-bit integer (also used for guest addresses).
    I32(i32),
    /// 64-bit integer.
    I64(i64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
}

impl WasmArg {
    /// Name of the WebAssembly value type carried by this argument.
    pub fn type_name(&self) -> &'static str {
        match self {
            WasmArg::I32(_) => "i32",
            WasmArg::I64(_) => "i64",
            WasmArg::F32(_) => "f32",
            WasmArg::F64(_) => "f64",
        }
    }
}

impl From<i32> for WasmArg {
    fn from(value: i32) -> Self {
        WasmArg::I32(value)
    }
}

impl From<u32> for WasmArg {
    #[allow(clippy::cast_possible_wrap)]
    fn from(value: u32) -> Self {
        WasmArg::I32(value as i32)
    }
}

impl From<i64> for WasmArg {
    fn from(value: i64) -> Self {
        WasmArg::I64(value)
    }
}

impl From<f32> for WasmArg {
    fn from(value: f32) -> Self {
        WasmArg::F32(value)
    }
}

impl From<f64> for WasmArg {
    fn from(value: f64) -> Self {
        WasmArg::F64(value)
    }
}
