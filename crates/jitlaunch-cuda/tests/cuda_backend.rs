//! CUDA backend integration tests.
//!
//! These need an NVIDIA GPU, the driver and the toolkit's `ptxas`. They run
//! when the `cuda` feature is enabled and are skipped at runtime on hosts
//! without hardware via the skip_without_cuda! macro.
//!
//! Run with: cargo test --features cuda -p jitlaunch-cuda --test cuda_backend

#![cfg(feature = "cuda")]

use std::process::Command;
use std::sync::Arc;

use jitlaunch_core::prelude::*;
use jitlaunch_core::{CompileRequest, Dialect, KernelCompiler, LaunchRequest, ToolkitLocator};
use jitlaunch_cuda::{cuda_device_count, is_cuda_available, CudaBackend, NvrtcCompiler, PtxAssembler};
use tempfile::TempDir;

fn cuda_is_available_safe() -> bool {
    std::panic::catch_unwind(is_cuda_available).unwrap_or(false)
}

fn assembler_is_available() -> bool {
    let assembler = PtxAssembler::locate(&ToolkitLocator::new());
    Command::new(assembler.tool()).arg("--version").output().is_ok()
}

macro_rules! skip_without_cuda {
    () => {
        if !cuda_is_available_safe() || !assembler_is_available() {
            eprintln!("Skipping test: CUDA not available");
            return;
        }
    };
}

fn runtime(dir: &TempDir, source: KernelSource) -> JitRuntime<NvrtcCompiler, Arc<CudaBackend>> {
    let backend = Arc::new(CudaBackend::new().expect("Failed to create CUDA backend"));
    let arch = backend
        .architecture(DeviceId::new(0))
        .expect("Failed to query architecture");
    let options = CompileOptions::builder(arch).with_std("c++17").build();
    JitRuntime::new(
        JitPipeline::builder(NvrtcCompiler::new(&ToolkitLocator::new()), backend, source, options)
            .with_store(ArtifactStore::in_dir(dir.path()))
            .build(),
    )
}

// ============================================================================
// Detection
// ============================================================================

#[test]
fn test_cuda_availability_detection() {
    let available = cuda_is_available_safe();
    let count = std::panic::catch_unwind(cuda_device_count).unwrap_or(0);

    println!("CUDA available: {}", available);
    println!("CUDA device count: {}", count);

    if available {
        assert!(count > 0, "CUDA available but device count is 0");
    }
}

#[test]
fn test_device_architecture() {
    skip_without_cuda!();

    let backend = CudaBackend::new().unwrap();
    let arch = backend.architecture(DeviceId::new(0)).unwrap();
    println!("Device 0: {} ({})", backend.device_name(DeviceId::new(0)).unwrap(), arch);
    assert!(arch.major() >= 3);
}

// ============================================================================
// Pipeline
// ============================================================================

#[test]
fn test_hello_kernel_end_to_end() {
    skip_without_cuda!();

    let dir = TempDir::new().unwrap();
    let runtime = runtime(&dir, KernelSource::hello());
    let report = runtime.run(0, &LaunchRequest::new("hello"), true).unwrap();

    println!("hello uses {} registers on {}", report.num_registers, report.arch);
    assert!(report.synchronized);

    let ptx = std::fs::read_to_string(dir.path().join("output.ptx")).unwrap();
    assert!(ptx.contains(".entry hello"));
    assert!(dir.path().join("output.cubin").exists());
}

#[test]
fn test_module_is_cached() {
    skip_without_cuda!();

    let dir = TempDir::new().unwrap();
    let runtime = runtime(&dir, KernelSource::hello());
    let first = runtime.get_module(0).unwrap();
    let second = runtime.get_module(0).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(runtime.cache().stats().loads(), 1);
}

#[test]
fn test_missing_kernel_is_reported() {
    skip_without_cuda!();

    let dir = TempDir::new().unwrap();
    let runtime = runtime(&dir, KernelSource::hello());
    let err = runtime.run(0, &LaunchRequest::new("goodbye"), true).unwrap_err();
    assert!(matches!(err, JitError::KernelNotFound { .. }));
}

#[test]
fn test_bad_source_carries_nvrtc_log() {
    skip_without_cuda!();

    let dir = TempDir::new().unwrap();
    let source = KernelSource::cuda(
        "broken.cu",
        "extern \"C\" __global__ void hello() { undefined_symbol(); }",
        "hello",
    );
    let runtime = runtime(&dir, source);
    let err = runtime.get_module(0).unwrap_err();
    match err {
        JitError::Compilation { stage, diagnostics } => {
            assert_eq!(stage, Stage::Assembly);
            assert!(diagnostics.contains("undefined_symbol"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_successful_compile_keeps_nvrtc_warnings() {
    skip_without_cuda!();

    let backend = CudaBackend::new().expect("Failed to create CUDA backend");
    let arch = backend
        .architecture(DeviceId::new(0))
        .expect("Failed to query architecture");
    let options = CompileOptions::builder(arch).with_std("c++17").build();
    let code = "extern \"C\" __global__ void warn() { int unused_local = 1; }";

    let output = NvrtcCompiler::new(&ToolkitLocator::new())
        .compile(CompileRequest {
            name: "warn.cu",
            code,
            dialect: Dialect::Cuda,
            target: Stage::Assembly,
            options: &options,
        })
        .expect("warnings must not fail the compile");
    assert!(String::from_utf8_lossy(&output.bytes).contains(".entry warn"));
    assert!(output.log.contains("unused_local"));
}

#[test]
fn test_invalid_device_is_rejected() {
    skip_without_cuda!();

    let dir = TempDir::new().unwrap();
    let runtime = runtime(&dir, KernelSource::hello());
    let count = cuda_device_count() as i64;
    let err = runtime.get_module(count).unwrap_err();
    assert!(matches!(err, JitError::InvalidDevice { .. }));
}
