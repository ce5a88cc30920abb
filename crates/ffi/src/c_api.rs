//! C-compatible API.
//!
//! Status codes:
//! - 0 = success
//! - nonzero = [`ErrorKind`] code, with a static NUL-terminated message
//!
//! Buffers are owned by the caller; nothing is allocated across the boundary.

use crate::registry;
use spfresh_engine::{EngineError, ErrorKind, Index, VectorId};
use std::ffi::{c_char, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Opaque index handle: a registry token, 0 meaning null.
pub type SPFreshIndex = usize;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SPFreshStatus {
    pub code: i32,
    /// Static string, never freed by the caller. Null on success.
    pub message: *const c_char,
}

impl SPFreshStatus {
    const OK: SPFreshStatus = SPFreshStatus {
        code: 0,
        message: std::ptr::null(),
    };

    fn from_kind(kind: ErrorKind) -> Self {
        Self {
            code: kind.code(),
            message: message(kind).as_ptr() as *const c_char,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

fn message(kind: ErrorKind) -> &'static [u8] {
    match kind {
        ErrorKind::InvalidDimension => b"invalid dimension\0",
        ErrorKind::DuplicateId => b"duplicate id\0",
        ErrorKind::InvalidTopK => b"invalid top-k\0",
        ErrorKind::IndexNotFound => b"index not found\0",
        ErrorKind::CorruptPersistence => b"corrupt persistence\0",
        ErrorKind::DimensionMismatch => b"dimension mismatch\0",
        ErrorKind::OutOfMemory => b"out of memory\0",
        ErrorKind::IoFailure => b"I/O failure\0",
        ErrorKind::InvalidParameter => b"invalid parameter\0",
        ErrorKind::InvariantViolation => b"invariant violation\0",
        ErrorKind::InvalidHandle => b"invalid handle\0",
        ErrorKind::Internal => b"internal error\0",
    }
}

/// Run an entry point body, converting errors and panics into a status.
fn guarded(entry: &'static str, body: impl FnOnce() -> Result<(), ErrorKind>) -> SPFreshStatus {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => SPFreshStatus::OK,
        Ok(Err(kind)) => SPFreshStatus::from_kind(kind),
        Err(_) => {
            tracing::error!(entry, "Panic caught at C boundary");
            SPFreshStatus::from_kind(ErrorKind::Internal)
        }
    }
}

fn fail(entry: &'static str, e: EngineError) -> ErrorKind {
    tracing::debug!(entry, error = %e, "Call failed");
    e.kind()
}

fn handle(token: SPFreshIndex) -> Result<Arc<Index>, ErrorKind> {
    if token == 0 {
        return Err(ErrorKind::InvalidParameter);
    }
    registry::lookup(token).ok_or(ErrorKind::InvalidHandle)
}

/// # Safety
/// `ptr` must be null or a valid NUL-terminated string.
unsafe fn c_str<'a>(ptr: *const c_char) -> Result<Option<&'a str>, ErrorKind> {
    if ptr.is_null() {
        return Ok(None);
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map(Some)
        .map_err(|_| ErrorKind::InvalidParameter)
}

/// Open or create the index stored in `index_dir`.
///
/// `params` is a `key=value` string and may be null. On success the handle
/// is written to `out_handle`; on failure `out_handle` is set to 0.
///
/// # Safety
/// `index_dir` must be a valid NUL-terminated UTF-8 string, `params` null or
/// likewise, and `out_handle` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn spfresh_open(
    index_dir: *const c_char,
    dim: i32,
    params: *const c_char,
    out_handle: *mut SPFreshIndex,
) -> SPFreshStatus {
    guarded("spfresh_open", || {
        if out_handle.is_null() {
            return Err(ErrorKind::InvalidParameter);
        }
        unsafe { *out_handle = 0 };

        let dir = unsafe { c_str(index_dir) }?.ok_or(ErrorKind::InvalidParameter)?;
        let params = unsafe { c_str(params) }?.unwrap_or("");
        if dim <= 0 {
            return Err(ErrorKind::InvalidDimension);
        }

        let index = Index::open(dir, dim as usize, params).map_err(|e| fail("spfresh_open", e))?;
        let token = registry::register(index);
        unsafe { *out_handle = token };
        Ok(())
    })
}

/// Release an index without saving. Null or unknown handles are ignored.
#[no_mangle]
pub extern "C" fn spfresh_close(handle: SPFreshIndex) {
    let _ = panic::catch_unwind(|| {
        if handle != 0 {
            drop(registry::unregister(handle));
        }
    });
}

/// Insert `n` row-major vectors. `ids` may be null for system-assigned ids.
///
/// The batch is all-or-nothing.
///
/// # Safety
/// `vectors` must point to `n * dim` floats and `ids`, when non-null, to `n`
/// integers.
#[no_mangle]
pub unsafe extern "C" fn spfresh_add(
    handle: SPFreshIndex,
    vectors: *const f32,
    n: usize,
    ids: *const i64,
) -> SPFreshStatus {
    guarded("spfresh_add", || {
        let index = self::handle(handle)?;
        if n == 0 {
            return Ok(());
        }
        if vectors.is_null() {
            return Err(ErrorKind::InvalidParameter);
        }
        let len = n.checked_mul(index.dim()).ok_or(ErrorKind::InvalidParameter)?;
        let vectors = unsafe { std::slice::from_raw_parts(vectors, len) };
        let ids: Option<Vec<VectorId>> = (!ids.is_null()).then(|| {
            unsafe { std::slice::from_raw_parts(ids, n) }
                .iter()
                .map(|&id| VectorId(id))
                .collect()
        });

        index
            .add(vectors, ids.as_deref())
            .map(|_| ())
            .map_err(|e| fail("spfresh_add", e))
    })
}

/// Write up to `topk` nearest neighbors of `query` into `out_ids` and, when
/// non-null, their distances into `out_scores`. Unused slots get id -1 and
/// score 0.
///
/// # Safety
/// `query` must point to `dim` floats, `out_ids` to `topk` integers, and
/// `out_scores`, when non-null, to `topk` floats.
#[no_mangle]
pub unsafe extern "C" fn spfresh_search(
    handle: SPFreshIndex,
    query: *const f32,
    topk: i32,
    out_ids: *mut i64,
    out_scores: *mut f32,
) -> SPFreshStatus {
    guarded("spfresh_search", || {
        let index = self::handle(handle)?;
        if topk <= 0 {
            return Err(ErrorKind::InvalidTopK);
        }
        if query.is_null() || out_ids.is_null() {
            return Err(ErrorKind::InvalidParameter);
        }
        let k = topk as usize;
        let query = unsafe { std::slice::from_raw_parts(query, index.dim()) };
        let out_ids = unsafe { std::slice::from_raw_parts_mut(out_ids, k) };
        let mut out_scores = (!out_scores.is_null())
            .then(|| unsafe { std::slice::from_raw_parts_mut(out_scores, k) });

        let hits = index.search(query, k).map_err(|e| fail("spfresh_search", e))?;

        for (i, slot) in out_ids.iter_mut().enumerate() {
            *slot = hits.get(i).map_or(VectorId::NONE.0, |h| h.id.0);
        }
        if let Some(scores) = out_scores.as_deref_mut() {
            for (i, slot) in scores.iter_mut().enumerate() {
                *slot = hits.get(i).map_or(0.0, |h| h.distance);
            }
        }
        Ok(())
    })
}

/// Persist the index to the directory it was opened from.
#[no_mangle]
pub extern "C" fn spfresh_save(handle: SPFreshIndex) -> SPFreshStatus {
    guarded("spfresh_save", || {
        let index = self::handle(handle)?;
        index
            .save()
            .map(|_| ())
            .map_err(|e| fail("spfresh_save", e))
    })
}
