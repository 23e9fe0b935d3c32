use crate::{
    constants::ABI_VERSION,
    errors::{get_last_error, record, ErrorCode},
    handle_registry::{register_handle, unregister_handle, with_handle, HandleId, OpaqueTrie},
    heap::CoreId,
    telemetry,
    types::TrieConfig,
};
use log::warn;
use std::{ffi::c_void, os::raw::c_char, ptr::NonNull};

// ─── small helper to turn Result<T,ErrorCode> into early-return ──────────
macro_rules! try_c { ($expr:expr) => { match $expr {
    Ok(v)  => v,
    Err(e) => return record(e),
}}}

#[inline]
fn finish(r: Result<(), crate::Error>) -> ErrorCode {
    record(match r {
        Ok(()) => ErrorCode::Success,
        Err(e) => e.into(),
    })
}

// ───────────────────────── lifetime ──────────────────────────────────── //

/// Create a trie bound to `core_id` and store its handle in `*out_handle`.
/// `yield_after == 0` makes writers spin without yielding while readers drain.
#[no_mangle]
pub extern "C" fn mbtrie_open(
    core_id: CoreId,
    yield_after: u32,
    reserve_sentinel: bool,
    out_handle: *mut HandleId,
) -> ErrorCode {
    OpaqueTrie::ensure_logging();
    telemetry::init();
    if out_handle.is_null() {
        return record(ErrorCode::NullPointer);
    }
    let config = TrieConfig::default()
        .core_id(core_id)
        .yield_after(yield_after)
        .reserve_sentinel(reserve_sentinel);
    let id = register_handle(OpaqueTrie::with_config(config));
    unsafe { *out_handle = id };
    log::info!("[OPEN] handle={}, core={}", id, core_id);
    record(ErrorCode::Success)
}

/// Release a handle. Stored data pointers are not touched.
#[no_mangle]
pub extern "C" fn mbtrie_close(h: HandleId) -> ErrorCode {
    try_c!(unregister_handle(h));
    record(ErrorCode::Success)
}

// ───────────────────────── CRUD ──────────────────────────────────────── //

#[no_mangle]
pub extern "C" fn mbtrie_insert(h: HandleId, key: u32, data: *mut c_void) -> ErrorCode {
    let Some(data) = NonNull::new(data) else {
        return record(ErrorCode::NullPointer);
    };
    finish(try_c!(with_handle(h, |t| t.insert(key, data))))
}

/// Store the value for `key` in `*out_data`; `NotFound` leaves it null.
#[no_mangle]
pub extern "C" fn mbtrie_lookup(h: HandleId, key: u32, out_data: *mut *mut c_void) -> ErrorCode {
    if out_data.is_null() {
        return record(ErrorCode::NullPointer);
    }
    let found = try_c!(with_handle(h, |t| t.lookup(key)));
    unsafe { *out_data = found.map_or(std::ptr::null_mut(), NonNull::as_ptr) };
    record(if found.is_some() {
        ErrorCode::Success
    } else {
        ErrorCode::NotFound
    })
}

/// Remove `key`, handing its value back through `*out_data`.
/// Returns `false` when nothing was removed.
#[no_mangle]
pub extern "C" fn mbtrie_remove(h: HandleId, key: u32, out_data: *mut *mut c_void) -> bool {
    if out_data.is_null() {
        warn!("[REMOVE] handle={} key={:#010x}: null output location", h, key);
        record(ErrorCode::NullPointer);
        return false;
    }
    let removed = match with_handle(h, |t| t.remove(key)) {
        Ok(Ok(v)) => v,
        Ok(Err(e)) => {
            record(e.into());
            return false;
        }
        Err(code) => {
            record(code);
            return false;
        }
    };
    unsafe { *out_data = removed.map_or(std::ptr::null_mut(), NonNull::as_ptr) };
    record(if removed.is_some() {
        ErrorCode::Success
    } else {
        ErrorCode::NotFound
    });
    removed.is_some()
}

// ───────────────────── maintenance ───────────────────────────────────── //

/// Drop every entry and free every table.
#[no_mangle]
pub extern "C" fn mbtrie_flush(h: HandleId) -> ErrorCode {
    finish(try_c!(with_handle(h, |t| t.flush())))
}

#[no_mangle]
pub extern "C" fn mbtrie_len(h: HandleId, out: *mut usize) -> ErrorCode {
    if out.is_null() {
        return record(ErrorCode::NullPointer);
    }
    let n = try_c!(with_handle(h, |t| t.len()));
    unsafe { *out = n };
    record(ErrorCode::Success)
}

// ───────────────────── convenience ─────────────────────────────────── //

/// Code of the last failed (or succeeded) call on this thread.
#[no_mangle]
pub extern "C" fn mbtrie_last_error() -> ErrorCode {
    get_last_error()
}

/// Static NUL-terminated description of `code`.
#[no_mangle]
pub extern "C" fn mbtrie_strerror(code: ErrorCode) -> *const c_char {
    code.as_c_str()
}

#[no_mangle]
pub extern "C" fn mbtrie_abi_version() -> u16 {
    ABI_VERSION
}
