//! The `$readmem` builtin: resolve a file through the host callback, parse
//! hex or binary lines, and fill the target memory chunk by chunk.
//!
//! Parsing happens before any write, so a failing call leaves the
//! destination bytes untouched.

use wasmi::{Caller, Extern};

use super::HostState;
use crate::Error;

pub(crate) fn builtin_readmem(
    caller: &mut Caller<HostState>,
    dp: i32,
    file_ptr: i32,
    mem_ptr: i32,
    is_hex: i32,
) -> Result<(), wasmi::Error> {
    let memory = caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| wasmi::Error::new("no memory export"))?;

    let filename = {
        let data = memory.data(&caller);
        read_cstr(data, file_ptr as u32)
            .ok_or_else(|| wasmi::Error::new("$readmem: unterminated filename"))?
    };

    let content = caller
        .data()
        .get_file
        .as_ref()
        .and_then(|lookup| lookup(&filename));
    let Some(content) = content else {
        caller.data_mut().host_error = Some(Error::MissingFile(filename.clone()));
        return Err(wasmi::Error::new(format!(
            "$readmem: cannot resolve {filename}"
        )));
    };

    let chunks = match parse_lines(&content, is_hex != 0) {
        Ok(chunks) => chunks,
        Err(msg) => {
            let err = format!("$readmem {filename}: {msg}");
            caller.data_mut().host_error = Some(Error::Internal(err.clone()));
            return Err(wasmi::Error::new(err));
        }
    };

    // The destination must be a known variable large enough for every line.
    let rel = (mem_ptr - dp) as u32;
    let dest_size = {
        let layout = &caller.data().layout;
        layout
            .slot_at(rel)
            .map(|slot| slot.offset + slot.size - rel)
    };
    let Some(dest_size) = dest_size else {
        let err = format!("$readmem {filename}: destination is not a variable");
        caller.data_mut().host_error = Some(Error::Internal(err.clone()));
        return Err(wasmi::Error::new(err));
    };
    if chunks.len() as u32 * 4 > dest_size {
        let err = format!(
            "$readmem {filename}: {} chunks exceed the {dest_size} byte destination",
            chunks.len()
        );
        caller.data_mut().host_error = Some(Error::Internal(err.clone()));
        return Err(wasmi::Error::new(err));
    }

    let data = memory.data_mut(&mut *caller);
    let base = mem_ptr as usize;
    for (i, chunk) in chunks.iter().enumerate() {
        data[base + i * 4..base + i * 4 + 4].copy_from_slice(&chunk.to_le_bytes());
    }
    Ok(())
}

/// NUL-terminated ASCII string at `ptr`.
fn read_cstr(data: &[u8], ptr: u32) -> Option<String> {
    let start = ptr as usize;
    let end = data[start..].iter().position(|&b| b == 0)? + start;
    Some(String::from_utf8_lossy(&data[start..end]).into_owned())
}

/// One `u32` chunk per non-empty, non-comment line.
fn parse_lines(content: &str, is_hex: bool) -> Result<Vec<u32>, String> {
    let radix = if is_hex { 16 } else { 2 };
    let mut chunks = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        let value = u32::from_str_radix(line, radix)
            .map_err(|e| format!("bad line {line:?}: {e}"))?;
        chunks.push(value);
    }
    Ok(chunks)
}
