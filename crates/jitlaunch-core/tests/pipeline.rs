//! End-to-end pipeline tests on the in-memory backend.
//!
//! Every property here runs without a GPU: the mock compiler counts its
//! invocations and the mock device records loads, launches and syncs.

use std::sync::{Arc, Barrier};
use std::thread;

use jitlaunch_core::mock::{MockCompiler, MockDevice, MOCK_BINARY_MAGIC};
use jitlaunch_core::prelude::*;
use jitlaunch_core::{ArtifactStore, KernelArg, LayoutRoot, NativeStreamSource, ToolkitLocator};
use tempfile::TempDir;

fn sm80() -> Architecture {
    Architecture::from_compute_capability(8, 0)
}

fn runtime_with(
    dir: &TempDir,
    device: MockDevice,
    source: KernelSource,
) -> JitRuntime<Arc<MockCompiler>, Arc<MockDevice>> {
    runtime_sharing(dir, Arc::new(MockCompiler::new()), Arc::new(device), source)
}

fn runtime_sharing(
    dir: &TempDir,
    compiler: Arc<MockCompiler>,
    device: Arc<MockDevice>,
    source: KernelSource,
) -> JitRuntime<Arc<MockCompiler>, Arc<MockDevice>> {
    let options = CompileOptions::builder(sm80()).with_std("c++17").build();
    JitRuntime::new(
        JitPipeline::builder(compiler, device, source, options)
            .with_store(ArtifactStore::in_dir(dir.path()))
            .build(),
    )
}

// ============================================================================
// Hello end to end
// ============================================================================

#[test]
fn test_hello_end_to_end() {
    let dir = TempDir::new().unwrap();
    let runtime = runtime_with(
        &dir,
        MockDevice::single(sm80()),
        KernelSource::cuda("hello.cu", "extern \"C\" __global__ void hello(){ }", "hello"),
    );

    let report = runtime.run(0, &LaunchRequest::new("hello"), true).unwrap();
    assert_eq!(report.arch, sm80());
    assert!(report.synchronized);

    let device = runtime.backend();
    assert_eq!(device.loads(), 1);
    assert_eq!(device.syncs(), 1);
    let launches = device.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].kernel, "hello");
    assert_eq!(launches[0].grid, Dim3::new(1, 1, 1));
    assert_eq!(launches[0].block, Dim3::new(1, 1, 1));

    let ptx = std::fs::read_to_string(dir.path().join("output.ptx")).unwrap();
    assert!(ptx.contains(".target sm_80"));
    let cubin = std::fs::read(dir.path().join("output.cubin")).unwrap();
    assert!(cubin.starts_with(MOCK_BINARY_MAGIC));
}

// ============================================================================
// Module cache
// ============================================================================

#[test]
fn test_repeated_get_module_compiles_once() {
    let dir = TempDir::new().unwrap();
    let runtime = runtime_with(&dir, MockDevice::single(sm80()), KernelSource::hello());

    let first = runtime.get_module(0).unwrap();
    let second = runtime.get_module(0).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let compiler = runtime.pipeline().compiler();
    assert_eq!(compiler.assembly_calls(), 1);
    assert_eq!(compiler.binary_calls(), 1);
    assert_eq!(runtime.backend().loads(), 1);
}

#[test]
fn test_concurrent_get_module_compiles_once() {
    let dir = TempDir::new().unwrap();
    let runtime = Arc::new(runtime_with(
        &dir,
        MockDevice::single(sm80()),
        KernelSource::hello(),
    ));
    let barrier = Arc::new(Barrier::new(16));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let runtime = Arc::clone(&runtime);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                runtime.get_module(0).unwrap()
            })
        })
        .collect();
    let modules: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(modules.iter().all(|m| Arc::ptr_eq(m, &modules[0])));
    assert_eq!(runtime.pipeline().compiler().assembly_calls(), 1);
    assert_eq!(runtime.backend().loads(), 1);
}

#[test]
fn test_concurrent_devices_get_their_own_architecture() {
    let dir = TempDir::new().unwrap();
    let sm90 = Architecture::from_compute_capability(9, 0);
    let runtime = Arc::new(runtime_with(
        &dir,
        MockDevice::new(vec![sm80(), sm90, sm80(), sm90]),
        KernelSource::hello(),
    ));

    let handles: Vec<_> = (0..4)
        .map(|id| {
            let runtime = Arc::clone(&runtime);
            thread::spawn(move || runtime.get_module(id).unwrap())
        })
        .collect();
    let archs: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().arch())
        .collect();

    assert_eq!(archs, vec![sm80(), sm90, sm80(), sm90]);
    assert_eq!(runtime.pipeline().compiler().assembly_calls(), 4);
}

#[test]
fn test_clear_then_get_module_recompiles() {
    let dir = TempDir::new().unwrap();
    let runtime = runtime_with(&dir, MockDevice::single(sm80()), KernelSource::hello());

    let before = runtime.get_module(0).unwrap();
    assert!(runtime.clear(DeviceId::new(0)));
    let after = runtime.get_module(0).unwrap();

    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(runtime.pipeline().compiler().assembly_calls(), 2);
    assert_eq!(runtime.pipeline().compiler().binary_calls(), 2);
}

#[test]
fn test_invalid_device_never_compiles() {
    let dir = TempDir::new().unwrap();
    let runtime = runtime_with(&dir, MockDevice::single(sm80()), KernelSource::hello());

    let err = runtime.get_module(-1).unwrap_err();
    assert!(matches!(err, JitError::InvalidDevice { id: -1, .. }));
    let err = runtime.get_module(1).unwrap_err();
    assert!(matches!(err, JitError::InvalidDevice { id: 1, available: 1 }));

    assert_eq!(runtime.pipeline().compiler().total_calls(), 0);
    assert!(runtime.cache().is_empty());
}

#[test]
fn test_runtimes_sharing_a_compiler_have_separate_caches() {
    let dir = TempDir::new().unwrap();
    let compiler = Arc::new(MockCompiler::new());
    let device = Arc::new(MockDevice::single(sm80()));

    let a = runtime_sharing(&dir, Arc::clone(&compiler), Arc::clone(&device), KernelSource::hello());
    let b = runtime_sharing(&dir, Arc::clone(&compiler), Arc::clone(&device), KernelSource::hello());
    a.get_module(0).unwrap();
    b.get_module(0).unwrap();

    assert_eq!(compiler.assembly_calls(), 2);
}

// ============================================================================
// Launch
// ============================================================================

#[test]
fn test_absent_kernel_never_launches() {
    let dir = TempDir::new().unwrap();
    let runtime = runtime_with(&dir, MockDevice::single(sm80()), KernelSource::hello());
    let stream = runtime.create_stream(0).unwrap();

    let err = runtime
        .launch(0, &LaunchRequest::new("goodbye"), &stream)
        .unwrap_err();
    assert!(matches!(err, JitError::KernelNotFound { ref name } if name == "goodbye"));
    assert!(runtime.backend().launches().is_empty());

    let err = runtime.run(0, &LaunchRequest::new("goodbye"), true).unwrap_err();
    assert!(matches!(err, JitError::KernelNotFound { .. }));
    assert!(runtime.backend().launches().is_empty());
    assert_eq!(runtime.backend().syncs(), 0);
}

/// Stream owned by some other framework.
struct TensorFrameworkStream {
    raw: u64,
    device: u64,
}

impl NativeStreamSource for TensorFrameworkStream {
    fn native_stream_id(&self) -> u64 {
        self.raw
    }

    fn context_id(&self) -> u64 {
        self.device
    }
}

#[test]
fn test_launch_on_foreign_stream_with_device_pointer() {
    let dir = TempDir::new().unwrap();
    let source = KernelSource::cuda(
        "inc.cu",
        "extern \"C\" __global__ void hello(float *A) { *A = *A + 1; }",
        "hello",
    );
    let runtime = runtime_with(&dir, MockDevice::single(sm80()), source);
    let owner = TensorFrameworkStream {
        raw: 0x7f3a_0000_1000,
        device: 0,
    };

    let view = ForeignStream::borrow(&owner);
    let request = LaunchRequest::new("hello").with_arg(KernelArg::DevicePtr(0x7000_0000));
    runtime.launch(0, &request, &view).unwrap();

    let launches = runtime.backend().launches();
    assert_eq!(launches[0].stream, StreamHandle::new(0, 0x7f3a_0000_1000));
    assert_eq!(launches[0].args, vec![KernelArg::DevicePtr(0x7000_0000)]);
    // The view never synchronizes what it borrows.
    assert_eq!(runtime.backend().syncs(), 0);
}

// ============================================================================
// Artifacts and resources
// ============================================================================

#[test]
fn test_persisted_artifacts_round_trip() {
    let dir = TempDir::new().unwrap();
    let runtime = runtime_with(&dir, MockDevice::single(sm80()), KernelSource::hello());
    let binary = runtime.pipeline().compile_binary(sm80()).unwrap();

    let store = ArtifactStore::in_dir(dir.path());
    let reloaded = store.load("output.cubin", Stage::Binary).unwrap();
    assert_eq!(reloaded.bytes(), binary.bytes());
}

#[test]
fn test_compile_failure_carries_diagnostics() {
    let dir = TempDir::new().unwrap();
    let source = KernelSource::cuda("bad.cu", "#error unsupported target\n", "k");
    let runtime = runtime_with(&dir, MockDevice::single(sm80()), source);

    let err = runtime.get_module(0).unwrap_err();
    match err {
        JitError::Compilation { stage, diagnostics } => {
            assert_eq!(stage, Stage::Assembly);
            assert!(diagnostics.contains("unsupported target"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!runtime.cache().contains(DeviceId::new(0)));
}

#[test]
fn test_sources_from_in_place_layout_win() {
    let in_place = TempDir::new().unwrap();
    let packaged = TempDir::new().unwrap();
    let toolkit = TempDir::new().unwrap();
    for root in [in_place.path(), packaged.path()] {
        for dir in ["kernels", "include", "third_party"] {
            std::fs::create_dir_all(root.join(dir)).unwrap();
        }
    }
    std::fs::create_dir_all(toolkit.path().join("include")).unwrap();
    std::fs::write(
        in_place.path().join("kernels/k.cu"),
        "extern \"C\" __global__ void local_kernel() {}",
    )
    .unwrap();
    std::fs::write(
        packaged.path().join("kernels/k.cu"),
        "extern \"C\" __global__ void packaged_kernel() {}",
    )
    .unwrap();

    let resolver = ResourceResolver::new(vec![
        LayoutRoot::fixed("in-place", in_place.path()),
        LayoutRoot::fixed("packaged", packaged.path()),
    ])
    .with_toolkit(ToolkitLocator::new().with_root(toolkit.path()));
    let source = KernelSource::from_resources(&resolver, "k.cu", "local_kernel").unwrap();
    assert!(source.code().contains("local_kernel"));

    let dir = TempDir::new().unwrap();
    let runtime = runtime_with(&dir, MockDevice::single(sm80()), source);
    runtime.run(0, &LaunchRequest::new("local_kernel"), false).unwrap();
    assert_eq!(runtime.backend().syncs(), 0);

    let records = runtime.pipeline().compiler().records();
    let include_flags: Vec<&String> = records[0]
        .flags
        .iter()
        .filter(|flag| flag.starts_with("--include-path="))
        .collect();
    let expected: Vec<String> = [
        in_place.path().join("include"),
        in_place.path().join("third_party"),
        toolkit.path().join("include"),
    ]
    .iter()
    .map(|dir| format!("--include-path={}", dir.canonicalize().unwrap().display()))
    .collect();
    assert_eq!(include_flags, expected.iter().collect::<Vec<_>>());
}
