//! NVRTC + ptxas implementation of the compile primitive.
//!
//! NVRTC is driven through its C API so the program log is kept on success
//! as well as on failure.

use std::ffi::{c_char, c_int, CString};
use std::ptr;

use cudarc::nvrtc::sys as nvrtc_sys;

use jitlaunch_core::{
    CompileOutput, CompileRequest, Dialect, JitError, KernelCompiler, Result, Stage,
    ToolkitLocator,
};

use crate::assembler::PtxAssembler;
use crate::error::CudaError;

/// Compiles CUDA C++ to PTX with NVRTC and PTX to cubin with `ptxas`.
#[derive(Debug, Clone)]
pub struct NvrtcCompiler {
    assembler: PtxAssembler,
}

impl NvrtcCompiler {
    /// Compiler using the toolkit found through `toolkit`.
    #[must_use]
    pub fn new(toolkit: &ToolkitLocator) -> Self {
        Self {
            assembler: PtxAssembler::locate(toolkit),
        }
    }

    /// Compiler using a specific assembler.
    #[must_use]
    pub fn with_assembler(assembler: PtxAssembler) -> Self {
        Self { assembler }
    }

    /// The stage 2 assembler.
    #[must_use]
    pub fn assembler(&self) -> &PtxAssembler {
        &self.assembler
    }

    fn compile_source(&self, request: &CompileRequest<'_>) -> Result<CompileOutput> {
        let flags = request.options.to_source_flags();
        tracing::debug!(program = request.name, options = ?flags, "Running NVRTC");

        let program = NvrtcProgram::create(request.name, request.code)?;
        let compiled = program.compile(&flags)?;
        let log = program.log()?;
        if !compiled {
            return Err(CudaError::Nvrtc {
                program: request.name.to_string(),
                log,
            }
            .into());
        }

        Ok(CompileOutput {
            bytes: program.ptx()?.into_bytes(),
            log,
        })
    }
}

/// Owns an `nvrtcProgram`; destroyed on drop.
struct NvrtcProgram {
    raw: nvrtc_sys::nvrtcProgram,
    name: String,
}

impl NvrtcProgram {
    fn create(name: &str, code: &str) -> Result<Self> {
        let c_code = nul_free(name, "source", code)?;
        let c_name = nul_free(name, "program name", name)?;

        let mut raw: nvrtc_sys::nvrtcProgram = ptr::null_mut();
        // SAFETY: both strings outlive the call; no headers are passed.
        let status = unsafe {
            nvrtc_sys::nvrtcCreateProgram(
                &mut raw,
                c_code.as_ptr(),
                c_name.as_ptr(),
                0,
                ptr::null(),
                ptr::null(),
            )
        };
        check(status, "nvrtcCreateProgram")?;
        Ok(Self {
            raw,
            name: name.to_string(),
        })
    }

    /// Runs the compiler. `Ok(false)` means the source was rejected and the
    /// log holds the diagnostics.
    fn compile(&self, flags: &[String]) -> Result<bool> {
        let c_flags = flags
            .iter()
            .map(|flag| nul_free(&self.name, "option", flag))
            .collect::<Result<Vec<_>>>()?;
        let ptrs: Vec<*const c_char> = c_flags.iter().map(|f| f.as_ptr()).collect();

        // SAFETY: `ptrs` points into `c_flags`, which outlives the call.
        let status = unsafe {
            nvrtc_sys::nvrtcCompileProgram(self.raw, ptrs.len() as c_int, ptrs.as_ptr())
        };
        match status {
            nvrtc_sys::nvrtcResult::NVRTC_SUCCESS => Ok(true),
            nvrtc_sys::nvrtcResult::NVRTC_ERROR_COMPILATION => Ok(false),
            other => check(other, "nvrtcCompileProgram").map(|()| false),
        }
    }

    fn log(&self) -> Result<String> {
        let mut size = 0usize;
        // SAFETY: `size` is a valid out-pointer.
        check(
            unsafe { nvrtc_sys::nvrtcGetProgramLogSize(self.raw, &mut size) },
            "nvrtcGetProgramLogSize",
        )?;
        let mut buf = vec![0u8; size];
        if size > 0 {
            // SAFETY: `buf` holds `size` bytes as reported above.
            check(
                unsafe { nvrtc_sys::nvrtcGetProgramLog(self.raw, buf.as_mut_ptr() as *mut c_char) },
                "nvrtcGetProgramLog",
            )?;
        }
        Ok(c_buffer_to_string(&buf))
    }

    fn ptx(&self) -> Result<String> {
        let mut size = 0usize;
        // SAFETY: `size` is a valid out-pointer.
        check(
            unsafe { nvrtc_sys::nvrtcGetPTXSize(self.raw, &mut size) },
            "nvrtcGetPTXSize",
        )?;
        let mut buf = vec![0u8; size];
        if size > 0 {
            // SAFETY: `buf` holds `size` bytes as reported above.
            check(
                unsafe { nvrtc_sys::nvrtcGetPTX(self.raw, buf.as_mut_ptr() as *mut c_char) },
                "nvrtcGetPTX",
            )?;
        }
        Ok(c_buffer_to_string(&buf))
    }
}

impl Drop for NvrtcProgram {
    fn drop(&mut self) {
        // SAFETY: `raw` came from nvrtcCreateProgram and is destroyed once.
        unsafe {
            let _ = nvrtc_sys::nvrtcDestroyProgram(&mut self.raw);
        }
    }
}

fn check(status: nvrtc_sys::nvrtcResult, call: &'static str) -> Result<()> {
    if status == nvrtc_sys::nvrtcResult::NVRTC_SUCCESS {
        Ok(())
    } else {
        Err(CudaError::Driver {
            call,
            msg: format!("{:?}", status),
        }
        .into())
    }
}

fn nul_free(program: &str, what: &str, text: &str) -> Result<CString> {
    CString::new(text).map_err(|_| {
        CudaError::Nvrtc {
            program: program.to_string(),
            log: format!("{} contains a NUL byte", what),
        }
        .into()
    })
}

/// Text of a NUL-terminated buffer, without the terminator.
fn c_buffer_to_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

impl KernelCompiler for NvrtcCompiler {
    fn compile(&self, request: CompileRequest<'_>) -> Result<CompileOutput> {
        match (request.target, request.dialect) {
            (Stage::Assembly, Dialect::Cuda) => self.compile_source(&request),
            (Stage::Assembly, Dialect::Ptx) => Ok(CompileOutput {
                bytes: request.code.as_bytes().to_vec(),
                log: String::new(),
            }),
            (Stage::Binary, Dialect::Ptx) => {
                let (bytes, log) = self.assembler.assemble(request.code, request.options)?;
                Ok(CompileOutput { bytes, log })
            }
            (Stage::Binary, Dialect::Cuda) => Err(JitError::Compilation {
                stage: Stage::Binary,
                diagnostics: "CUDA C++ must be compiled to assembly before assembling".to_string(),
            }),
        }
    }
}
