//! In-memory compiler and device for tests and dry runs.
//!
//! [`MockCompiler`] emits a small textual assembly listing the `__global__`
//! entry points it finds, then a tagged pseudo-binary. [`MockDevice`] loads
//! those binaries, records every launch and synchronization, and refuses
//! binaries built for an architecture other than the device's. Nothing here
//! touches a GPU.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::artifact::CompiledArtifact;
use crate::backend::{
    CompileOutput, CompileRequest, DeviceBackend, KernelArg, KernelCompiler, KernelFunction,
    LoadedModule,
};
use crate::error::{JitError, Result};
use crate::stream::{StreamHandle, StreamIdentity};
use crate::types::{Architecture, DeviceId, Dialect, Dim3, Stage};

/// Leading bytes of every mock binary.
pub const MOCK_BINARY_MAGIC: &[u8] = b"MOCKBIN\0";

/// Registers reported for every mock kernel.
pub const MOCK_NUM_REGISTERS: u32 = 2;

/// One recorded compile call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRecord {
    /// Program name.
    pub name: String,
    /// Stage produced.
    pub target: Stage,
    /// Flags the options rendered to.
    pub flags: Vec<String>,
}

/// Counting compiler producing pseudo-assembly and pseudo-binaries.
#[derive(Debug, Default)]
pub struct MockCompiler {
    assembly_calls: AtomicUsize,
    binary_calls: AtomicUsize,
    records: Mutex<Vec<CompileRecord>>,
}

impl MockCompiler {
    /// Creates a compiler with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage 1 invocations so far.
    pub fn assembly_calls(&self) -> usize {
        self.assembly_calls.load(Ordering::SeqCst)
    }

    /// Stage 2 invocations so far.
    pub fn binary_calls(&self) -> usize {
        self.binary_calls.load(Ordering::SeqCst)
    }

    /// Total invocations so far.
    pub fn total_calls(&self) -> usize {
        self.assembly_calls() + self.binary_calls()
    }

    /// Every call, in order.
    pub fn records(&self) -> Vec<CompileRecord> {
        self.records.lock().clone()
    }

    fn compile_source(&self, request: &CompileRequest<'_>) -> Result<CompileOutput> {
        if let Some(line) = request.code.lines().find(|l| l.trim_start().starts_with("#error")) {
            return Err(JitError::Compilation {
                stage: Stage::Assembly,
                diagnostics: format!("{}(1): error: {}", request.name, line.trim()),
            });
        }

        let entries = source_entry_points(request.code);
        let mut text = format!(
            "//\n// Generated by mock compiler for {}\n//\n\n.version 8.0\n.target {}\n.address_size 64\n",
            request.name,
            request.options.arch()
        );
        for entry in &entries {
            text.push_str(&format!("\n.visible .entry {}()\n{{\n\tret;\n}}\n", entry));
        }

        let log = if entries.is_empty() {
            format!("{}: warning: no kernel entry points", request.name)
        } else {
            String::new()
        };
        Ok(CompileOutput {
            bytes: text.into_bytes(),
            log,
        })
    }

    fn compile_assembly(&self, request: &CompileRequest<'_>) -> Result<CompileOutput> {
        if !request.code.contains(".version") {
            return Err(JitError::Compilation {
                stage: Stage::Binary,
                diagnostics: format!("ptxas {}, line 1; fatal : Missing .version directive", request.name),
            });
        }

        let mut bytes = MOCK_BINARY_MAGIC.to_vec();
        bytes.extend_from_slice(request.options.arch().to_string().as_bytes());
        for entry in assembly_entry_points(request.code) {
            bytes.push(b'\n');
            bytes.extend_from_slice(entry.as_bytes());
        }
        Ok(CompileOutput {
            bytes,
            log: String::new(),
        })
    }
}

impl KernelCompiler for MockCompiler {
    fn compile(&self, request: CompileRequest<'_>) -> Result<CompileOutput> {
        let flags = match request.target {
            Stage::Assembly => request.options.to_source_flags(),
            Stage::Binary => request.options.to_assembler_flags(),
        };
        self.records.lock().push(CompileRecord {
            name: request.name.to_string(),
            target: request.target,
            flags,
        });

        match (request.target, request.dialect) {
            (Stage::Assembly, _) => {
                self.assembly_calls.fetch_add(1, Ordering::SeqCst);
                self.compile_source(&request)
            }
            (Stage::Binary, Dialect::Ptx) => {
                self.binary_calls.fetch_add(1, Ordering::SeqCst);
                self.compile_assembly(&request)
            }
            (Stage::Binary, dialect) => Err(JitError::Compilation {
                stage: Stage::Binary,
                diagnostics: format!("cannot assemble {} source directly", dialect),
            }),
        }
    }
}

/// Names following `__global__ <type>` up to the opening parenthesis.
fn source_entry_points(code: &str) -> Vec<String> {
    code.match_indices("__global__")
        .filter_map(|(at, marker)| {
            let rest = &code[at + marker.len()..];
            let head = &rest[..rest.find('(')?];
            head.split_whitespace().last().map(str::to_string)
        })
        .collect()
}

/// Names following `.entry` up to the opening parenthesis.
fn assembly_entry_points(code: &str) -> Vec<String> {
    code.lines()
        .filter_map(|line| {
            let rest = line.split(".entry").nth(1)?;
            let name = rest.split('(').next()?.trim();
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

/// A module loaded by [`MockDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockModule {
    device: DeviceId,
    arch: Architecture,
    entries: Vec<String>,
}

impl MockModule {
    /// Architecture the binary was built for.
    #[must_use]
    pub fn arch(&self) -> Architecture {
        self.arch
    }

    /// Kernel entry points in the binary.
    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

impl LoadedModule for MockModule {
    type Kernel = MockKernel;

    fn device(&self) -> DeviceId {
        self.device
    }

    fn kernel(&self, name: &str) -> Result<Option<MockKernel>> {
        Ok(self.entries.iter().any(|e| e == name).then(|| MockKernel {
            name: name.to_string(),
            device: self.device,
        }))
    }
}

/// Kernel handle from a [`MockModule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockKernel {
    name: String,
    device: DeviceId,
}

impl MockKernel {
    /// Device the owning module is loaded on.
    #[must_use]
    pub fn device(&self) -> DeviceId {
        self.device
    }
}

impl KernelFunction for MockKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_registers(&self) -> Result<u32> {
        Ok(MOCK_NUM_REGISTERS)
    }
}

/// Stream created by [`MockDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockStream {
    handle: StreamHandle,
}

impl StreamIdentity for MockStream {
    fn stream_handle(&self) -> StreamHandle {
        self.handle
    }
}

/// One recorded launch.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRecord {
    /// Kernel entry point.
    pub kernel: String,
    /// Device the kernel's module lives on.
    pub device: DeviceId,
    /// Stream the launch was enqueued on.
    pub stream: StreamHandle,
    /// Grid geometry.
    pub grid: Dim3,
    /// Block geometry.
    pub block: Dim3,
    /// Arguments in declared order.
    pub args: Vec<KernelArg>,
}

/// In-memory device set.
#[derive(Debug)]
pub struct MockDevice {
    archs: Vec<Architecture>,
    loads: AtomicUsize,
    syncs: AtomicUsize,
    next_stream: AtomicU64,
    launches: Mutex<Vec<LaunchRecord>>,
    arch_query_fails: AtomicBool,
}

impl MockDevice {
    /// One device per entry of `archs`, ordinal = index.
    #[must_use]
    pub fn new(archs: Vec<Architecture>) -> Self {
        Self {
            archs,
            loads: AtomicUsize::new(0),
            syncs: AtomicUsize::new(0),
            next_stream: AtomicU64::new(0x1000),
            launches: Mutex::new(Vec::new()),
            arch_query_fails: AtomicBool::new(false),
        }
    }

    /// A single device of architecture `arch`.
    #[must_use]
    pub fn single(arch: Architecture) -> Self {
        Self::new(vec![arch])
    }

    /// Module loads so far.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Stream synchronizations so far.
    pub fn syncs(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }

    /// Every launch, in order.
    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.launches.lock().clone()
    }

    /// Makes [`DeviceBackend::architecture`] fail while `fails` is set.
    /// Module loads and stream creation are unaffected.
    pub fn set_architecture_query_fails(&self, fails: bool) {
        self.arch_query_fails.store(fails, Ordering::SeqCst);
    }

    fn arch_of(&self, device: DeviceId) -> Result<Architecture> {
        self.archs
            .get(device.index())
            .copied()
            .ok_or(JitError::InvalidDevice {
                id: device.ordinal() as i64,
                available: self.archs.len(),
            })
    }
}

impl DeviceBackend for MockDevice {
    type Module = MockModule;
    type Stream = MockStream;

    fn name(&self) -> &str {
        "mock"
    }

    fn device_count(&self) -> Result<usize> {
        Ok(self.archs.len())
    }

    fn architecture(&self, device: DeviceId) -> Result<Architecture> {
        if self.arch_query_fails.load(Ordering::SeqCst) {
            return Err(JitError::Backend(format!(
                "compute capability query failed for device {}",
                device
            )));
        }
        self.arch_of(device)
    }

    fn create_stream(&self, device: DeviceId) -> Result<MockStream> {
        self.arch_of(device)?;
        let native_id = self.next_stream.fetch_add(0x10, Ordering::SeqCst);
        Ok(MockStream {
            handle: StreamHandle::new(device.ordinal() as u64, native_id),
        })
    }

    fn load_module(&self, device: DeviceId, binary: &CompiledArtifact) -> Result<MockModule> {
        let device_arch = self.arch_of(device)?;
        if binary.stage() != Stage::Binary {
            return Err(JitError::Backend(format!(
                "cannot load {} artifact as a module",
                binary.stage()
            )));
        }
        let body = binary
            .bytes()
            .strip_prefix(MOCK_BINARY_MAGIC)
            .ok_or_else(|| JitError::Backend("invalid device binary".to_string()))?;
        let body = std::str::from_utf8(body)
            .map_err(|_| JitError::Backend("invalid device binary".to_string()))?;

        let mut lines = body.split('\n');
        let arch: Architecture = lines.next().unwrap_or_default().parse()?;
        if arch != device_arch {
            return Err(JitError::Backend(format!(
                "no kernel image for device {} ({}): binary targets {}",
                device, device_arch, arch
            )));
        }

        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(MockModule {
            device,
            arch,
            entries: lines.map(str::to_string).collect(),
        })
    }

    fn launch(
        &self,
        kernel: &MockKernel,
        stream: StreamHandle,
        grid: Dim3,
        block: Dim3,
        args: &[KernelArg],
    ) -> Result<()> {
        if !stream.is_default_stream() && stream.context_id != kernel.device.ordinal() as u64 {
            return Err(JitError::Backend(format!(
                "stream {} belongs to another context than device {}",
                stream, kernel.device
            )));
        }
        self.launches.lock().push(LaunchRecord {
            kernel: kernel.name.clone(),
            device: kernel.device,
            stream,
            grid,
            block,
            args: args.to_vec(),
        });
        Ok(())
    }

    fn synchronize(&self, _stream: &MockStream) -> Result<()> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
