//! End-to-end tests through the C entry points.

use spfresh::{
    spfresh_add, spfresh_close, spfresh_open, spfresh_save, spfresh_search, SPFreshIndex,
};
use std::ffi::CString;
use std::thread;
use tempfile::tempdir;

const INVALID_DIMENSION: i32 = 1;
const DUPLICATE_ID: i32 = 2;
const INVALID_TOPK: i32 = 3;
const INDEX_NOT_FOUND: i32 = 4;
const DIMENSION_MISMATCH: i32 = 6;
const INVALID_PARAMETER: i32 = 9;
const INVALID_HANDLE: i32 = 11;

fn open(dir: &std::path::Path, dim: i32, params: &str) -> (i32, SPFreshIndex) {
    let path = CString::new(dir.to_str().unwrap()).unwrap();
    let params = CString::new(params).unwrap();
    let mut handle: SPFreshIndex = 0;
    let status = unsafe { spfresh_open(path.as_ptr(), dim, params.as_ptr(), &mut handle) };
    (status.code, handle)
}

#[test]
fn test_add_search_scenario() {
    let dir = tempdir().unwrap();
    let (code, handle) = open(dir.path(), 4, "metric=l2");
    assert_eq!(code, 0);
    assert_ne!(handle, 0);

    let vectors = [0.0f32, 0.0, 0.0, 0.0, 10.0, 10.0, 10.0, 10.0];
    let ids = [1i64, 2];
    let status = unsafe { spfresh_add(handle, vectors.as_ptr(), 2, ids.as_ptr()) };
    assert!(status.is_ok());

    let query = [0.0f32, 0.0, 0.0, 1.0];
    let mut out_ids = [0i64; 1];
    let mut out_scores = [0f32; 1];
    let status = unsafe {
        spfresh_search(handle, query.as_ptr(), 1, out_ids.as_mut_ptr(), out_scores.as_mut_ptr())
    };
    assert!(status.is_ok());
    assert_eq!(out_ids, [1]);
    assert!((out_scores[0] - 1.0).abs() < 1e-6);

    // k beyond the count: unused slots are marked
    let mut out_ids = [7i64; 4];
    let mut out_scores = [7f32; 4];
    let status = unsafe {
        spfresh_search(handle, query.as_ptr(), 4, out_ids.as_mut_ptr(), out_scores.as_mut_ptr())
    };
    assert!(status.is_ok());
    assert_eq!(out_ids, [1, 2, -1, -1]);
    assert_eq!(out_scores[2..], [0.0, 0.0]);

    // scores are optional
    let status = unsafe {
        spfresh_search(handle, query.as_ptr(), 2, out_ids.as_mut_ptr(), std::ptr::null_mut())
    };
    assert!(status.is_ok());

    spfresh_close(handle);
}

#[test]
fn test_error_codes() {
    let dir = tempdir().unwrap();
    let (_, handle) = open(dir.path(), 2, "");

    let v = [1.0f32, 1.0];
    let id = [5i64];
    assert!(unsafe { spfresh_add(handle, v.as_ptr(), 1, id.as_ptr()) }.is_ok());
    let status = unsafe { spfresh_add(handle, v.as_ptr(), 1, id.as_ptr()) };
    assert_eq!(status.code, DUPLICATE_ID);
    assert!(!status.message.is_null());

    let mut out = [0i64; 1];
    let status = unsafe { spfresh_search(handle, v.as_ptr(), 0, out.as_mut_ptr(), std::ptr::null_mut()) };
    assert_eq!(status.code, INVALID_TOPK);
    let status = unsafe { spfresh_search(handle, v.as_ptr(), 1, std::ptr::null_mut(), std::ptr::null_mut()) };
    assert_eq!(status.code, INVALID_PARAMETER);
    let status = unsafe { spfresh_add(handle, std::ptr::null(), 1, std::ptr::null()) };
    assert_eq!(status.code, INVALID_PARAMETER);
    assert!(unsafe { spfresh_add(handle, std::ptr::null(), 0, std::ptr::null()) }.is_ok());

    assert_eq!(open(dir.path(), -3, "").0, INVALID_DIMENSION);
    assert_eq!(open(dir.path(), 2, "probe_count=zero").0, INVALID_PARAMETER);
    assert_eq!(open(&dir.path().join("missing"), 2, "create=false").0, INDEX_NOT_FOUND);

    spfresh_close(handle);
    assert_eq!(spfresh_save(handle).code, INVALID_HANDLE);
    assert_eq!(spfresh_save(0).code, INVALID_PARAMETER);
    spfresh_close(handle);
}

#[test]
fn test_save_and_reopen() {
    let dir = tempdir().unwrap();
    let (_, handle) = open(dir.path(), 3, "metric=cosine");
    let vectors: Vec<f32> = (0..300).map(|i| ((i * 7) % 13) as f32 - 6.0).collect();
    assert!(unsafe { spfresh_add(handle, vectors.as_ptr(), 100, std::ptr::null()) }.is_ok());
    assert!(spfresh_save(handle).is_ok());
    spfresh_close(handle);

    assert_eq!(open(dir.path(), 5, "").0, DIMENSION_MISMATCH);

    let (code, handle) = open(dir.path(), 3, "");
    assert_eq!(code, 0);
    let query = [1.0f32, 0.5, -0.5];
    let mut out = [0i64; 100];
    assert!(unsafe { spfresh_search(handle, query.as_ptr(), 100, out.as_mut_ptr(), std::ptr::null_mut()) }.is_ok());
    assert_ne!(out[0], -1);
    assert!(out.iter().all(|&id| id == -1 || (0..100).contains(&id)));
    spfresh_close(handle);
}

#[test]
fn test_concurrent_handles() {
    let dir = tempdir().unwrap();
    let (_, handle) = open(dir.path(), 2, "");
    let workers: Vec<_> = (0..4)
        .map(|t| {
            thread::spawn(move || {
                for i in 0..50 {
                    let v = [t as f32, i as f32];
                    assert!(unsafe { spfresh_add(handle, v.as_ptr(), 1, std::ptr::null()) }.is_ok());
                    let mut out = [0i64; 3];
                    assert!(unsafe {
                        spfresh_search(handle, v.as_ptr(), 3, out.as_mut_ptr(), std::ptr::null_mut())
                    }
                    .is_ok());
                    assert_ne!(out[0], -1);
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    spfresh_close(handle);
}
