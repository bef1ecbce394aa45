use std::sync::Arc;

use super::*;
use crate::backend::ReferenceBackend;
use crate::error::ErrorCategory;
use crate::hardware::{Capabilities, DeviceInfo, Directory};

fn queue() -> (Arc<ReferenceBackend>, Queue) {
    let backend = Arc::new(ReferenceBackend::new());
    let queue = Directory::new(backend.clone()).default_queue().unwrap();
    (backend, queue)
}

fn sum_kernel(g: &mut Graph, q: &Queue) -> (Kernel, Arc<MemBlock>) {
    let a = MemBlock::allocate_with(q, &[1.0f32, 2.0, 3.0]).unwrap();
    let b = MemBlock::allocate_with(q, &[7.0f32, 6.0, 5.0]).unwrap();
    let c = MemBlock::allocate(3, ScalarType::Float32, q).unwrap();
    let (x, y, z) = (g.global(&a), g.global(&b), g.global(&c));
    let sum = g.add(x, y).unwrap();
    let stmt = g.assign(z, sum).unwrap();
    let mut kernel = Kernel::new(KernelConfiguration::default());
    kernel.add_expression(g, stmt).unwrap();
    (kernel, c)
}

#[test]
fn test_source_layout() {
    let (_backend, q) = queue();
    let mut g = Graph::new();
    let (mut kernel, _) = sum_kernel(&mut g, &q);
    kernel.setup(&g).unwrap();
    assert_eq!(
        kernel.source().unwrap(),
        "__kernel void kernelc_main(__global float *buf0, __global float *buf1, __global float *buf2)\n\
         {\n    \
         const int index = (int)get_global_id(0);\n    \
         buf0[index] = (buf1[index] + buf2[index]);\n\
         }\n"
    );
    assert_eq!(kernel.arguments().len(), 3);
}

#[test]
fn test_setup_and_compute() {
    let (backend, q) = queue();
    let mut g = Graph::new();
    let (mut kernel, out) = sum_kernel(&mut g, &q);
    kernel.setup(&g).unwrap();
    kernel.compute().unwrap();
    q.finish().unwrap();
    assert_eq!(out.read::<f32>().unwrap(), vec![8.0; 3]);
    assert_eq!(backend.counts().builds, 1);
    assert_eq!(backend.counts().launches, 1);
}

#[test]
fn test_lifecycle_errors() {
    let (_backend, q) = queue();
    let mut g = Graph::new();

    let mut empty = Kernel::new(KernelConfiguration::default());
    assert!(matches!(empty.setup(&g), Err(Error::Usage(_))));

    let (mut kernel, _) = sum_kernel(&mut g, &q);
    assert!(matches!(kernel.compute(), Err(Error::Usage(_))));
    kernel.setup(&g).unwrap();
    assert!(matches!(kernel.setup(&g), Err(Error::Usage(_))));

    let b = g.barrier();
    assert!(matches!(kernel.add_expression(&g, b), Err(Error::Usage(_))));
}

#[test]
fn test_statements_without_device_are_refused() {
    let mut g = Graph::new();
    let v = g.private_variable(ScalarType::Int32);
    let i = g.index();
    let stmt = g.assign(v, i).unwrap();
    let mut kernel = Kernel::new(KernelConfiguration::default());
    kernel.add_expression(&g, stmt).unwrap();
    assert!(matches!(kernel.setup(&g), Err(Error::Usage(_))));
}

#[test]
fn test_zero_length_is_refused() {
    let (_backend, q) = queue();
    let block = MemBlock::allocate(4, ScalarType::Int32, &q).unwrap();
    let mut g = Graph::new();
    let x = g.global(&block);
    let one = g.constant(1i32);
    let stmt = g.assign(x, one).unwrap();
    let zero = g.constant(0i32);
    let scalar_stmt = g.excerpt(stmt, zero).unwrap();
    let mut kernel = Kernel::new(KernelConfiguration::default());
    kernel.add_expression(&g, scalar_stmt).unwrap();
    assert!(matches!(kernel.setup(&g), Err(Error::Usage(_))));
}

#[test]
fn test_invalid_vector_width() {
    let (_backend, q) = queue();
    let mut g = Graph::new();
    let (kernel, _) = sum_kernel(&mut g, &q);
    let mut kernel = Kernel::from_container(
        kernel.container().clone(),
        KernelConfiguration::default().with_vector_width(3),
    );
    assert!(matches!(kernel.setup(&g), Err(Error::Usage(_))));
}

#[test]
fn test_implied_extensions() {
    let (_backend, q) = queue();
    let block = MemBlock::allocate(4, ScalarType::Float64, &q).unwrap();
    let mut g = Graph::new();
    let x = g.global(&block);
    let half = g.constant(0.5f64);
    let stmt = g.assign(x, half).unwrap();
    let mut kernel = Kernel::new(KernelConfiguration::default());
    kernel.add_expression(&g, stmt).unwrap();
    kernel.setup(&g).unwrap();

    let source = kernel.source().unwrap();
    assert!(source.starts_with("#pragma OPENCL EXTENSION cl_khr_fp64 : enable\n"));
    assert!(source.contains("__global double *buf0"));
    assert_eq!(
        kernel.effective_config().unwrap().required_extensions,
        vec!["cl_khr_fp64".to_string()]
    );
    assert!(kernel.config().required_extensions.is_empty());
}

#[test]
fn test_local_array_sets_local_memory() {
    let (_backend, q) = queue();
    let block = MemBlock::allocate(8, ScalarType::Float32, &q).unwrap();
    let mut g = Graph::new();
    let x = g.global(&block);
    let scratch = g.local_array(ScalarType::Float32, 64).unwrap();
    let fill = g.assign(scratch, x).unwrap();
    let sync = g.barrier();
    let back = g.assign(x, scratch).unwrap();
    let mut kernel = Kernel::new(KernelConfiguration::default());
    for s in [fill, sync, back] {
        kernel.add_expression(&g, s).unwrap();
    }
    kernel.setup(&g).unwrap();

    assert!(kernel.effective_config().unwrap().uses_local_memory);
    let source = kernel.source().unwrap();
    assert!(source.contains("    __local float loc0[65];\n"));
    assert!(source.contains("    loc0[(int)get_local_id(0)] = buf0[index];\n"));
    assert!(source.contains("    barrier(CLK_LOCAL_MEM_FENCE);\n"));
}

#[test]
fn test_local_array_is_shared_per_group() {
    let (_backend, q) = queue();
    let data: Vec<f32> = (0..200).map(|v| v as f32).collect();
    let block = MemBlock::allocate_with(&q, &data).unwrap();
    let mut g = Graph::new();
    let x = g.global(&block);
    let scratch = g.local_array(ScalarType::Float32, 64).unwrap();
    let fill = g.assign(scratch, x).unwrap();
    let sync = g.barrier();
    let two = g.constant(2.0f32);
    let twice = g.mul(scratch, two).unwrap();
    let back = g.assign(x, twice).unwrap();
    let mut kernel = Kernel::new(KernelConfiguration::default());
    for s in [fill, sync, back] {
        kernel.add_expression(&g, s).unwrap();
    }
    kernel.setup(&g).unwrap();
    kernel.compute().unwrap();

    let expected: Vec<f32> = data.iter().map(|v| v * 2.0).collect();
    assert_eq!(block.read::<f32>().unwrap(), expected);
}

#[test]
fn test_control_body_outside_the_domain_is_refused() {
    let (_backend, q) = queue();
    let small = MemBlock::allocate(4, ScalarType::Int32, &q).unwrap();
    let large = MemBlock::allocate(10, ScalarType::Int32, &q).unwrap();
    let mut g = Graph::new();
    let i = g.index();
    let limit = g.constant(100i32);
    let cond = g.less(i, limit).unwrap();
    let branch = g.if_then(cond).unwrap();
    let (x, y) = (g.global(&small), g.global(&large));
    let fill = g.assign(y, i).unwrap();

    let mut kernel = Kernel::new(KernelConfiguration::default());
    kernel.add_expression(&g, fill).unwrap();
    kernel.add_expression(&g, branch).unwrap();
    let write = g.assign(x, i).unwrap();
    g.push_body(branch, write).unwrap();

    assert!(matches!(kernel.setup(&g), Err(Error::SizeMismatch { .. })));
    assert!(!kernel.is_built());
    assert!(matches!(kernel.compute(), Err(Error::Usage(_))));
    assert_eq!(small.read::<i32>().unwrap(), vec![0; 4]);

    let mut eager = Kernel::new(KernelConfiguration::default());
    eager.add_expression(&g, fill).unwrap();
    assert!(matches!(
        eager.add_expression(&g, branch),
        Err(Error::SizeMismatch { .. })
    ));
}

#[test]
fn test_vectorized_views_stay_inside_their_elements() {
    let (_backend, q) = queue();
    let parent = MemBlock::allocate_with(&q, &[9i32; 13]).unwrap();
    let head = MemBlock::subvector(&parent, 0, 5).unwrap();
    let tail = MemBlock::subvector(&parent, 5, 8).unwrap();
    let short_tail = MemBlock::subvector(&parent, 10, 3).unwrap();
    let wide = || KernelConfiguration::default().with_vector_width(4);

    let mut g = Graph::new();
    let one = g.constant(1i32);
    let h = g.global(&head);
    let stmt = g.assign(h, one).unwrap();
    let mut kernel = Kernel::new(wide());
    kernel.add_expression(&g, stmt).unwrap();
    assert!(matches!(kernel.setup(&g), Err(Error::Usage(_))));

    for (view, value) in [(&tail, 4i32), (&short_tail, 7)] {
        let target = g.global(view);
        let v = g.constant(value);
        let stmt = g.assign(target, v).unwrap();
        let mut kernel = Kernel::new(wide());
        kernel.add_expression(&g, stmt).unwrap();
        kernel.setup(&g).unwrap();
        kernel.compute().unwrap();
    }
    assert_eq!(
        parent.read::<i32>().unwrap(),
        vec![9, 9, 9, 9, 9, 4, 4, 4, 4, 4, 7, 7, 7]
    );
}

#[test]
fn test_private_array_under_vectorization_is_forbidden() {
    let (_backend, q) = queue();
    let block = MemBlock::allocate(8, ScalarType::Float32, &q).unwrap();
    let mut g = Graph::new();
    let x = g.global(&block);
    let tmp = g.private_array(ScalarType::Float32, 4).unwrap();
    let stmt = g.assign(tmp, x).unwrap();
    let mut kernel = Kernel::new(KernelConfiguration::default().with_vector_width(4));
    kernel.add_expression(&g, stmt).unwrap();
    let err = kernel.setup(&g).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Construction);
    assert!(!kernel.is_built());
}

#[test]
fn test_missing_extension_is_a_compile_error() {
    let device = DeviceInfo {
        capabilities: Capabilities {
            extensions: Vec::new(),
            ..Capabilities::default()
        },
        ..ReferenceBackend::default_device()
    };
    let dir = Directory::new(Arc::new(ReferenceBackend::with_devices(vec![device])));
    let q = dir.default_queue().unwrap();
    let block = MemBlock::allocate(2, ScalarType::Float64, &q).unwrap();
    let mut g = Graph::new();
    let x = g.global(&block);
    let one = g.constant(1.0f64);
    let stmt = g.add_assign(x, one).unwrap();
    let mut kernel = Kernel::new(KernelConfiguration::default());
    kernel.add_expression(&g, stmt).unwrap();

    let err = kernel.setup(&g).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Compilation);
    assert_eq!(err.status(), Some(crate::error::Status::BUILD_PROGRAM_FAILURE));
}

#[test]
fn test_identical_setups_share_a_program() {
    let (backend, q) = queue();
    let mut g = Graph::new();
    let (mut first, _) = sum_kernel(&mut g, &q);
    let (mut second, out) = sum_kernel(&mut g, &q);
    first.setup(&g).unwrap();
    second.setup(&g).unwrap();
    assert_eq!(backend.counts().builds, 1);
    assert_eq!(q.cached_programs(), 1);

    second.compute().unwrap();
    assert_eq!(out.read::<f32>().unwrap(), vec![8.0; 3]);
}

#[test]
fn test_host_scalar_is_read_at_launch() {
    let (_backend, q) = queue();
    let block = MemBlock::allocate(4, ScalarType::Int32, &q).unwrap();
    let k = HostScalar::new(3i32);
    let mut g = Graph::new();
    let x = g.global(&block);
    let v = g.host_scalar(&k);
    let stmt = g.assign(x, v).unwrap();
    let mut kernel = Kernel::new(KernelConfiguration::default());
    kernel.add_expression(&g, stmt).unwrap();
    kernel.setup(&g).unwrap();

    kernel.compute().unwrap();
    assert_eq!(block.read::<i32>().unwrap(), vec![3; 4]);
    k.set(9i32);
    kernel.compute().unwrap();
    assert_eq!(block.read::<i32>().unwrap(), vec![9; 4]);
}

#[test]
fn test_compute_follows_swapped_buffers() {
    let (_backend, q) = queue();
    let a = MemBlock::allocate(3, ScalarType::Int32, &q).unwrap();
    let b = MemBlock::allocate(3, ScalarType::Int32, &q).unwrap();
    let mut g = Graph::new();
    let x = g.global(&a);
    let one = g.constant(1i32);
    let stmt = g.add_assign(x, one).unwrap();
    let mut kernel = Kernel::new(KernelConfiguration::default());
    kernel.add_expression(&g, stmt).unwrap();
    kernel.setup(&g).unwrap();

    kernel.compute().unwrap();
    a.swap_buffers(&b).unwrap();
    kernel.compute().unwrap();
    kernel.compute().unwrap();
    assert_eq!(a.read::<i32>().unwrap(), vec![2; 3]);
    assert_eq!(b.read::<i32>().unwrap(), vec![1; 3]);
}

#[test]
fn test_vectorized_kernel_covers_padded_length() {
    let (_backend, q) = queue();
    let data: Vec<i32> = (0..10).collect();
    let a = MemBlock::allocate_with(&q, &data).unwrap();
    let c = MemBlock::allocate(10, ScalarType::Int32, &q).unwrap();
    let mut g = Graph::new();
    let (x, z) = (g.global(&a), g.global(&c));
    let two = g.constant(2i32);
    let twice = g.mul(x, two).unwrap();
    let stmt = g.assign(z, twice).unwrap();
    let mut kernel = Kernel::new(KernelConfiguration::default().with_vector_width(4));
    kernel.add_expression(&g, stmt).unwrap();
    kernel.setup(&g).unwrap();
    assert_eq!(kernel.padded_length(), 12);
    assert!(kernel
        .source()
        .unwrap()
        .contains("vstore4((vload4(index, buf1) * 2), index, buf0);"));

    kernel.compute().unwrap();
    let expected: Vec<i32> = data.iter().map(|v| v * 2).collect();
    assert_eq!(c.read::<i32>().unwrap(), expected);
}
