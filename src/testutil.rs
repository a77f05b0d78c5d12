//! Hand assembly of v12 module binaries for the test suites. Everything
//! here mirrors the wire format the decoder consumes: LEB128 integers,
//! little-endian words, sections in id order.

/// Encode an unsigned LEB128 integer.
pub fn uleb(mut v: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
    out
}

/// Encode a signed LEB128 integer.
pub fn sleb(mut v: i64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        let done = (v == 0 && byte & 0x40 == 0) || (v == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
    out
}

/// Magic and version words.
pub fn header() -> Vec<u8> {
    vec![0x00, 0x61, 0x73, 0x6d, 0x0c, 0x00, 0x00, 0x00]
}

pub fn section(id: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![id];
    out.extend(uleb(payload.len() as u64));
    out.extend_from_slice(payload);
    out
}

fn name(s: &str) -> Vec<u8> {
    let mut out = uleb(s.len() as u64);
    out.extend_from_slice(s.as_bytes());
    out
}

/// One type-section entry: func form, parameter kinds, result kinds
/// (value-kind byte codes: 0x01 i32, 0x02 i64, 0x03 f32, 0x04 f64).
pub fn func_type(params: &[u8], results: &[u8]) -> Vec<u8> {
    let mut out = vec![0x20];
    out.extend(uleb(params.len() as u64));
    out.extend_from_slice(params);
    out.extend(uleb(results.len() as u64));
    out.extend_from_slice(results);
    out
}

pub fn type_section(types: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = uleb(types.len() as u64);
    for t in types {
        payload.extend_from_slice(t);
    }
    section(1, &payload)
}

/// One import-section entry of Function kind.
pub fn import_function(module: &str, field: &str, type_idx: u32) -> Vec<u8> {
    let mut out = name(module);
    out.extend(name(field));
    out.push(0x00);
    out.extend(uleb(u64::from(type_idx)));
    out
}

pub fn import_section(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = uleb(entries.len() as u64);
    for e in entries {
        payload.extend_from_slice(e);
    }
    section(2, &payload)
}

pub fn function_section(type_indices: &[u32]) -> Vec<u8> {
    let mut payload = uleb(type_indices.len() as u64);
    for idx in type_indices {
        payload.extend(uleb(u64::from(*idx)));
    }
    section(3, &payload)
}

pub fn memory_section(initial: u32) -> Vec<u8> {
    let mut payload = uleb(1);
    payload.extend(uleb(0)); // flags: no maximum
    payload.extend(uleb(u64::from(initial)));
    section(5, &payload)
}

pub fn export_section(entries: &[(&str, u8, u32)]) -> Vec<u8> {
    let mut payload = uleb(entries.len() as u64);
    for (field, kind, index) in entries {
        payload.extend(name(field));
        payload.push(*kind);
        payload.extend(uleb(u64::from(*index)));
    }
    section(7, &payload)
}

/// One code body: local groups of (count, kind code), then the code
/// stream, which must include the terminating `end` byte.
pub fn body(local_groups: &[(u32, u8)], code: &[u8]) -> Vec<u8> {
    let mut inner = uleb(local_groups.len() as u64);
    for (count, kind) in local_groups {
        inner.extend(uleb(u64::from(*count)));
        inner.push(*kind);
    }
    inner.extend_from_slice(code);
    let mut out = uleb(inner.len() as u64);
    out.extend(inner);
    out
}

pub fn code_section(bodies: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = uleb(bodies.len() as u64);
    for b in bodies {
        payload.extend_from_slice(b);
    }
    section(10, &payload)
}

pub fn data_section(segments: &[(usize, &[u8])]) -> Vec<u8> {
    let mut payload = uleb(segments.len() as u64);
    for (offset, bytes) in segments {
        payload.extend(uleb(0)); // memory index
        payload.extend(uleb(*offset as u64));
        payload.extend(uleb(bytes.len() as u64));
        payload.extend_from_slice(bytes);
    }
    section(11, &payload)
}

/// `add(i32, i32) -> i32`, exported as "add".
pub fn add_module() -> Vec<u8> {
    let mut wasm = header();
    wasm.extend(type_section(&[func_type(&[0x01, 0x01], &[0x01])]));
    wasm.extend(function_section(&[0]));
    wasm.extend(export_section(&[("add", 0x00, 0)]));
    wasm.extend(code_section(&[body(
        &[],
        &[
            0x14, 0x00, // get_local 0
            0x14, 0x01, // get_local 1
            0x40, // i32.add
            0x0f, // end
        ],
    )]));
    wasm
}

/// A module importing `core.writeline`, with a length-prefixed
/// "hello world" placed at `addr` by a data segment. Exported "main"
/// calls the import with `addr`.
pub fn writeline_module(addr: usize) -> Vec<u8> {
    let mut wasm = header();
    wasm.extend(type_section(&[
        func_type(&[0x01], &[]), // (i32) -> ()
        func_type(&[], &[]),     // () -> ()
    ]));
    wasm.extend(import_section(&[import_function("core", "writeline", 0)]));
    wasm.extend(function_section(&[1]));
    wasm.extend(memory_section(1));
    wasm.extend(export_section(&[("main", 0x00, 1)]));
    let mut code = vec![0x10]; // i32.const addr
    code.extend(sleb(addr as i64));
    code.extend([0x16, 0x00, 0x0f]); // call 0; end
    wasm.extend(code_section(&[body(&[], &code)]));
    let mut payload = (11u32).to_le_bytes().to_vec();
    payload.extend_from_slice(b"hello world");
    wasm.extend(data_section(&[(addr, &payload)]));
    wasm
}
