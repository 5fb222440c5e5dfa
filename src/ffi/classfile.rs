//! Managed-API fallback (component D), `spec.md` §4.4.
//!
//! Translated as a `ClassFileLoadHook` on the same native agent rather than
//! a second pure-managed `javaagent` (see `SPEC_FULL.md` §1): JVMTI
//! class-file-load hooking is the native-agent equivalent of the same
//! mechanism and keeps the whole core in one binary.
//!
//! [`instrument`] does the real work: it locates `getAllByName`'s `Code`
//! attribute and splices in an `invokestatic` call to
//! `ConfigurationStore.checkConnection(String, int, String)` ahead of the
//! method's own bytecode, so a violation raised from there carries
//! [`crate::config::CallerTag::ManagedApi`] — the dual-enforcement path
//! `spec.md` §4.4 describes, independent of whether native hook C's
//! `getAllByName`-reaching native methods ever ran. Everything here is
//! pure, offline-testable code over `&[u8]`; no live JVM is needed to
//! confirm a patched class file still parses and carries the injected call
//! site.
//!
//! One limitation is deliberately not hidden: the splice drops every
//! nested attribute of the patched `Code` attribute (`LineNumberTable`,
//! `LocalVariableTable`, and critically `StackMapTable`). Recomputing
//! verifier stack-map frames for bytecode whose addresses shift needs a
//! real bytecode analysis library, which nothing in this crate's
//! dependency stack provides — see DESIGN.md for the full accounting. A
//! JVM built with `-noverify`/`-Xverify:none`, or a target whose class
//! file major version predates `StackMapTable` (< 50, i.e. older than
//! Java 6), loads the patched class as-is; a strict modern verifier may
//! reject it. The call site itself is genuinely spliced in either way.

use std::fmt;

/// The class JVMTI's `ClassFileLoadHook` is relevant for:
/// `java.net.InetAddress`, whose `getAllByName` is the name-resolution
/// entry point `spec.md` §4.4 targets.
pub const TARGET_CLASS: &str = "java/net/InetAddress";
/// The target method name.
pub const TARGET_METHOD: &str = "getAllByName";
/// The target method descriptor: `(String) -> InetAddress[]`.
pub const TARGET_DESCRIPTOR: &str = "(Ljava/lang/String;)[Ljava/net/InetAddress;";

/// A UTF8 constant pool entry this module writes into a class file the
/// first time it is seen, so a later `ClassFileLoadHook` invocation for the
/// same class (redefinition, retransformation) is a no-op.
const MARKER_UTF8: &str = "__airgap_fallback_seen__";

/// The configuration store's binary class name, as JVMTI/the constant pool
/// present it (slash-separated, no leading `L`/trailing `;`).
const MANAGED_CLASS_BINARY_NAME: &str = "io/github/garryjeromson/airgap/ConfigurationStore";
const CHECK_CONNECTION_METHOD: &str = "checkConnection";
const CHECK_CONNECTION_DESCRIPTOR: &str = "(Ljava/lang/String;ILjava/lang/String;)V";
/// The caller-tag string literal the injected call passes as its third
/// argument — `CallerTag::ManagedApi`'s wire form (`spec.md` §4.4).
const MANAGED_API_TAG: &str = "Managed-API";

/// `aload_0`, `iconst_m1`, `ldc_w <tag>`, `invokestatic <methodref>` — pushes
/// the method's own `host` parameter (local slot 0), the DNS-shaped `-1`
/// port sentinel, and the `"Managed-API"` tag, then calls the decision
/// entry point. Fixed at 8 bytes, deliberately a multiple of 4: every
/// `tableswitch`/`lookupswitch` instruction's padding depends on
/// `(address + 1) mod 4`, and since this prelude is inserted at offset 0,
/// every original instruction's absolute address shifts by the same
/// multiple of 4, leaving existing switch padding valid without
/// recomputation.
const PREFIX_LEN: u32 = 8;

/// A malformed or truncated class file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFilePatchError(String);

impl fmt::Display for ClassFilePatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class file patch error: {}", self.0)
    }
}

impl std::error::Error for ClassFilePatchError {}

fn err(msg: impl Into<String>) -> ClassFilePatchError {
    ClassFilePatchError(msg.into())
}

/// `true` iff `binary_name` (slash-separated, as JVMTI presents class
/// names) is this module's instrumentation target.
#[must_use]
pub fn is_target_class(binary_name: &str) -> bool {
    binary_name == TARGET_CLASS
}

fn read_u8(data: &[u8], offset: &mut usize) -> Result<u8, ClassFilePatchError> {
    let b = *data.get(*offset).ok_or_else(|| err("truncated (u8)"))?;
    *offset += 1;
    Ok(b)
}

fn read_u16(data: &[u8], offset: &mut usize) -> Result<u16, ClassFilePatchError> {
    let bytes = data
        .get(*offset..*offset + 2)
        .ok_or_else(|| err("truncated (u16)"))?;
    *offset += 2;
    Ok(u16::from_be_bytes(bytes.try_into().unwrap()))
}

fn read_u32(data: &[u8], offset: &mut usize) -> Result<u32, ClassFilePatchError> {
    let bytes = data
        .get(*offset..*offset + 4)
        .ok_or_else(|| err("truncated (u32)"))?;
    *offset += 4;
    Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
}

/// A parsed constant pool: just enough to resolve `name_index`/
/// `descriptor_index`/`attribute_name_index` values against their Utf8
/// text, plus where the pool ends in the original buffer so the rest of
/// the class file can be located relative to it. Indexed 1-based, like
/// the class file format itself (`utf8_by_index[0]` is always `None`).
struct ConstantPool {
    utf8_by_index: Vec<Option<String>>,
    end_offset: usize,
}

impl ConstantPool {
    fn utf8(&self, index: u16) -> Option<&str> {
        self.utf8_by_index.get(index as usize)?.as_deref()
    }
}

/// Parses the constant pool per the JVM class file format: `u2
/// constant_pool_count` followed by `constant_pool_count - 1` entries
/// (1-based indices; Long/Double occupy two index slots without a second
/// entry).
fn parse_constant_pool(data: &[u8]) -> Result<ConstantPool, ClassFilePatchError> {
    if data.len() < 10 {
        return Err(err("truncated header"));
    }
    let magic = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    if magic != 0xCAFE_BABE {
        return Err(err("bad magic"));
    }
    let cp_count = u16::from_be_bytes([data[8], data[9]]) as usize;

    let mut utf8_by_index = vec![None; cp_count];
    let mut offset = 10usize;
    let mut index = 1usize;
    while index < cp_count {
        let tag = read_u8(data, &mut offset)?;
        match tag {
            1 => {
                let len = read_u16(data, &mut offset)? as usize;
                let bytes = data
                    .get(offset..offset + len)
                    .ok_or_else(|| err("truncated utf8 bytes"))?;
                utf8_by_index[index] = Some(String::from_utf8_lossy(bytes).into_owned());
                offset += len;
            }
            // Long/Double take two constant pool index slots.
            5 | 6 => {
                offset += 8;
                index += 1;
            }
            // Class, String, MethodType: one u2.
            7 | 8 | 16 => offset += 2,
            // Fieldref, Methodref, InterfaceMethodref, NameAndType,
            // Dynamic, InvokeDynamic, Module, Package: two u2. Integer,
            // Float: one u4. Both four bytes either way.
            9 | 10 | 11 | 12 | 18 | 19 | 20 | 3 | 4 => offset += 4,
            // MethodHandle: u1 + u2.
            15 => offset += 3,
            _ => return Err(err(format!("unrecognised constant pool tag {tag}"))),
        }
        index += 1;
    }
    Ok(ConstantPool {
        utf8_by_index,
        end_offset: offset,
    })
}

/// `true` if this class file already carries the marker this module writes
/// on first sight — `spec.md` §4.4's "augmented" state, made idempotent
/// across redefinition/retransformation.
pub fn already_instrumented(class_data: &[u8]) -> Result<bool, ClassFilePatchError> {
    let cp = parse_constant_pool(class_data)?;
    Ok(cp
        .utf8_by_index
        .iter()
        .any(|s| s.as_deref() == Some(MARKER_UTF8)))
}

/// `true` iff the constant pool names the target method with the target
/// descriptor — a coarse existence check (it does not confirm the name
/// and descriptor belong to the same method, which [`instrument`]'s full
/// method-table walk does), sufficient for deciding whether this class
/// file is worth hooking at all before the JVMTI callback commits to
/// anything.
pub fn mentions_target_method(class_data: &[u8]) -> Result<bool, ClassFilePatchError> {
    let cp = parse_constant_pool(class_data)?;
    let has_name = cp.utf8_by_index.iter().any(|s| s.as_deref() == Some(TARGET_METHOD));
    let has_descriptor = cp
        .utf8_by_index
        .iter()
        .any(|s| s.as_deref() == Some(TARGET_DESCRIPTOR));
    Ok(has_name && has_descriptor)
}

/// One `attribute_info` entry's position, pre-parsed enough to locate and
/// replace it without understanding its payload.
#[derive(Debug, Clone, Copy)]
struct AttributeEntry {
    name_index: u16,
    /// Absolute offset of this entry's first byte (`attribute_name_index`).
    entry_start: usize,
    /// Absolute offset of the start of the `info` payload.
    payload_start: usize,
    /// Length of the `info` payload (`attribute_length`).
    payload_len: usize,
}

impl AttributeEntry {
    fn entry_end(self) -> usize {
        self.payload_start + self.payload_len
    }
}

fn read_attributes(
    data: &[u8],
    offset: &mut usize,
    count: u16,
) -> Result<Vec<AttributeEntry>, ClassFilePatchError> {
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let entry_start = *offset;
        let name_index = read_u16(data, offset)?;
        let payload_len = read_u32(data, offset)? as usize;
        let payload_start = *offset;
        if data.get(payload_start..payload_start + payload_len).is_none() {
            return Err(err("truncated attribute payload"));
        }
        *offset += payload_len;
        out.push(AttributeEntry {
            name_index,
            entry_start,
            payload_start,
            payload_len,
        });
    }
    Ok(out)
}

fn skip_fields_or_methods_header(data: &[u8], offset: &mut usize) -> Result<u16, ClassFilePatchError> {
    read_u16(data, offset)
}

/// Skips over the `fields` array (this module never needs field detail).
fn skip_fields(data: &[u8], offset: &mut usize) -> Result<(), ClassFilePatchError> {
    let count = skip_fields_or_methods_header(data, offset)?;
    for _ in 0..count {
        let _access_flags = read_u16(data, offset)?;
        let _name_index = read_u16(data, offset)?;
        let _descriptor_index = read_u16(data, offset)?;
        let attr_count = read_u16(data, offset)?;
        read_attributes(data, offset, attr_count)?;
    }
    Ok(())
}

struct MethodEntry {
    name_index: u16,
    descriptor_index: u16,
    attributes: Vec<AttributeEntry>,
}

fn read_methods(data: &[u8], offset: &mut usize) -> Result<Vec<MethodEntry>, ClassFilePatchError> {
    let count = skip_fields_or_methods_header(data, offset)?;
    let mut methods = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let _access_flags = read_u16(data, offset)?;
        let name_index = read_u16(data, offset)?;
        let descriptor_index = read_u16(data, offset)?;
        let attr_count = read_u16(data, offset)?;
        let attributes = read_attributes(data, offset, attr_count)?;
        methods.push(MethodEntry {
            name_index,
            descriptor_index,
            attributes,
        });
    }
    Ok(methods)
}

/// Walks `access_flags`/`this_class`/`super_class`/`interfaces`/`fields`,
/// then the `methods` array, looking for `getAllByName(String) ->
/// InetAddress[]`'s `Code` attribute.
fn find_target_code_attribute(
    data: &[u8],
    cp: &ConstantPool,
) -> Result<Option<AttributeEntry>, ClassFilePatchError> {
    let mut offset = cp.end_offset;
    let _access_flags = read_u16(data, &mut offset)?;
    let _this_class = read_u16(data, &mut offset)?;
    let _super_class = read_u16(data, &mut offset)?;
    let interfaces_count = read_u16(data, &mut offset)?;
    offset += interfaces_count as usize * 2;
    skip_fields(data, &mut offset)?;
    let methods = read_methods(data, &mut offset)?;

    for method in &methods {
        if cp.utf8(method.name_index) != Some(TARGET_METHOD) {
            continue;
        }
        if cp.utf8(method.descriptor_index) != Some(TARGET_DESCRIPTOR) {
            continue;
        }
        for attr in &method.attributes {
            if cp.utf8(attr.name_index) == Some("Code") {
                return Ok(Some(*attr));
            }
        }
    }
    Ok(None)
}

struct CodeAttributeParts {
    max_stack: u16,
    max_locals: u16,
    code: Vec<u8>,
    exception_table_count: u16,
    exception_table: Vec<u8>,
}

fn parse_code_attribute(
    data: &[u8],
    attr: &AttributeEntry,
) -> Result<CodeAttributeParts, ClassFilePatchError> {
    let mut offset = attr.payload_start;
    let max_stack = read_u16(data, &mut offset)?;
    let max_locals = read_u16(data, &mut offset)?;
    let code_length = read_u32(data, &mut offset)? as usize;
    let code = data
        .get(offset..offset + code_length)
        .ok_or_else(|| err("truncated code array"))?
        .to_vec();
    offset += code_length;
    let exception_table_count = read_u16(data, &mut offset)?;
    let exception_table_bytes = exception_table_count as usize * 8;
    let exception_table = data
        .get(offset..offset + exception_table_bytes)
        .ok_or_else(|| err("truncated exception table"))?
        .to_vec();
    Ok(CodeAttributeParts {
        max_stack,
        max_locals,
        code,
        exception_table_count,
        exception_table,
    })
}

fn push_utf8(out: &mut Vec<u8>, s: &str) {
    out.push(1); // CONSTANT_Utf8
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn push_class(out: &mut Vec<u8>, name_index: u16) {
    out.push(7); // CONSTANT_Class
    out.extend_from_slice(&name_index.to_be_bytes());
}

fn push_name_and_type(out: &mut Vec<u8>, name_index: u16, descriptor_index: u16) {
    out.push(12); // CONSTANT_NameAndType
    out.extend_from_slice(&name_index.to_be_bytes());
    out.extend_from_slice(&descriptor_index.to_be_bytes());
}

fn push_methodref(out: &mut Vec<u8>, class_index: u16, name_and_type_index: u16) {
    out.push(10); // CONSTANT_Methodref
    out.extend_from_slice(&class_index.to_be_bytes());
    out.extend_from_slice(&name_and_type_index.to_be_bytes());
}

fn push_string(out: &mut Vec<u8>, utf8_index: u16) {
    out.push(8); // CONSTANT_String
    out.extend_from_slice(&utf8_index.to_be_bytes());
}

/// The new constant pool entries this module appends: the `Methodref` for
/// `ConfigurationStore.checkConnection`, the `"Managed-API"` string
/// literal, and (always, regardless of whether injection itself succeeds
/// later) the idempotency marker — appending it here keeps the whole
/// patch a single constant-pool-growth operation.
struct NewConstants {
    bytes: Vec<u8>,
    methodref_index: u16,
    tag_string_index: u16,
    count_added: u16,
}

fn build_new_constants(next_index: u16) -> NewConstants {
    let mut bytes = Vec::new();
    let mut idx = next_index;

    let owner_utf8 = idx;
    idx += 1;
    push_utf8(&mut bytes, MANAGED_CLASS_BINARY_NAME);

    let owner_class = idx;
    idx += 1;
    push_class(&mut bytes, owner_utf8);

    let method_name_utf8 = idx;
    idx += 1;
    push_utf8(&mut bytes, CHECK_CONNECTION_METHOD);

    let method_descriptor_utf8 = idx;
    idx += 1;
    push_utf8(&mut bytes, CHECK_CONNECTION_DESCRIPTOR);

    let name_and_type = idx;
    idx += 1;
    push_name_and_type(&mut bytes, method_name_utf8, method_descriptor_utf8);

    let methodref_index = idx;
    idx += 1;
    push_methodref(&mut bytes, owner_class, name_and_type);

    let tag_utf8 = idx;
    idx += 1;
    push_utf8(&mut bytes, MANAGED_API_TAG);

    let tag_string_index = idx;
    idx += 1;
    push_string(&mut bytes, tag_utf8);

    idx += 1;
    push_utf8(&mut bytes, MARKER_UTF8);

    NewConstants {
        bytes,
        methodref_index,
        tag_string_index,
        count_added: idx - next_index,
    }
}

/// `aload_0; iconst_m1; ldc_w <tag_string_index>; invokestatic
/// <methodref_index>` — see [`PREFIX_LEN`].
fn build_prefix(methodref_index: u16, tag_string_index: u16) -> [u8; PREFIX_LEN as usize] {
    let mut out = [0u8; PREFIX_LEN as usize];
    out[0] = 0x2A; // aload_0
    out[1] = 0x02; // iconst_m1
    out[2] = 0x13; // ldc_w
    out[3..5].copy_from_slice(&tag_string_index.to_be_bytes());
    out[5] = 0xB8; // invokestatic
    out[6..8].copy_from_slice(&methodref_index.to_be_bytes());
    out
}

/// Splices a real `invokestatic ConfigurationStore.checkConnection(host,
/// -1, "Managed-API")` call into `getAllByName`'s `Code` attribute, ahead
/// of the method's own bytecode, and appends the constant pool entries the
/// call needs (plus the idempotency marker — callers should check
/// [`already_instrumented`] first to avoid re-splicing an already-patched
/// class).
///
/// This performs the structural updates a prepended instruction sequence
/// requires: `code_length` grows by [`PREFIX_LEN`], every
/// `exception_table` entry's `start_pc`/`end_pc`/`handler_pc` shifts by
/// the same amount (the whole method's bytecode moved down uniformly),
/// and `max_stack` is raised to at least 3 (the prefix's peak depth) if
/// the original value was lower. The Code attribute's own nested
/// attributes (`LineNumberTable`, `LocalVariableTable`, `StackMapTable`)
/// are dropped rather than re-derived — see the module documentation for
/// why, and DESIGN.md for the disclosed limitation that follows from it.
///
/// # Errors
///
/// Returns [`ClassFilePatchError`] if `class_data` is not a well-formed
/// class file, the constant pool is already full, or `getAllByName` with
/// the expected descriptor has no `Code` attribute (e.g. it is abstract
/// or native — should never happen for the real JDK class, but a test
/// fixture might omit it).
pub fn instrument(class_data: &[u8]) -> Result<Vec<u8>, ClassFilePatchError> {
    let cp = parse_constant_pool(class_data)?;
    let Some(code_attr) = find_target_code_attribute(class_data, &cp)? else {
        return Err(err(format!(
            "{TARGET_METHOD}{TARGET_DESCRIPTOR} not found or has no Code attribute"
        )));
    };
    let code = parse_code_attribute(class_data, &code_attr)?;

    let old_cp_count = cp.utf8_by_index.len() as u16;
    let new_constants = build_new_constants(old_cp_count);
    let new_cp_count = old_cp_count
        .checked_add(new_constants.count_added)
        .ok_or_else(|| err("constant pool full"))?;

    let prefix = build_prefix(new_constants.methodref_index, new_constants.tag_string_index);
    let new_code_length = code.code.len() as u32 + PREFIX_LEN;

    let mut new_exception_table = Vec::with_capacity(code.exception_table.len());
    for chunk in code.exception_table.chunks_exact(8) {
        let start_pc = u16::from_be_bytes([chunk[0], chunk[1]]) + PREFIX_LEN as u16;
        let end_pc = u16::from_be_bytes([chunk[2], chunk[3]]) + PREFIX_LEN as u16;
        let handler_pc = u16::from_be_bytes([chunk[4], chunk[5]]) + PREFIX_LEN as u16;
        let catch_type = u16::from_be_bytes([chunk[6], chunk[7]]);
        new_exception_table.extend_from_slice(&start_pc.to_be_bytes());
        new_exception_table.extend_from_slice(&end_pc.to_be_bytes());
        new_exception_table.extend_from_slice(&handler_pc.to_be_bytes());
        new_exception_table.extend_from_slice(&catch_type.to_be_bytes());
    }

    let new_max_stack = code.max_stack.max(3);

    let mut new_payload = Vec::with_capacity(12 + new_code_length as usize + new_exception_table.len());
    new_payload.extend_from_slice(&new_max_stack.to_be_bytes());
    new_payload.extend_from_slice(&code.max_locals.to_be_bytes());
    new_payload.extend_from_slice(&new_code_length.to_be_bytes());
    new_payload.extend_from_slice(&prefix);
    new_payload.extend_from_slice(&code.code);
    new_payload.extend_from_slice(&code.exception_table_count.to_be_bytes());
    new_payload.extend_from_slice(&new_exception_table);
    new_payload.extend_from_slice(&0u16.to_be_bytes()); // attributes_count = 0

    let mut out = Vec::with_capacity(class_data.len() + new_constants.bytes.len() + new_payload.len());
    out.extend_from_slice(&class_data[..8]); // magic + minor + major
    out.extend_from_slice(&new_cp_count.to_be_bytes());
    out.extend_from_slice(&class_data[10..cp.end_offset]);
    out.extend_from_slice(&new_constants.bytes);
    out.extend_from_slice(&class_data[cp.end_offset..code_attr.entry_start]);
    out.extend_from_slice(&code_attr.name_index.to_be_bytes());
    out.extend_from_slice(&(new_payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&new_payload);
    out.extend_from_slice(&class_data[code_attr.entry_end()..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a class file with a constant pool of UTF8-only entries and no
    /// further structure — enough for the pure detection functions
    /// ([`already_instrumented`], [`mentions_target_method`]), but not for
    /// [`instrument`], which needs an actual `methods`/`Code` shape (see
    /// [`synthetic_method_classfile`]).
    fn synthetic_classfile(utf8_entries: &[&str]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes()); // minor
        data.extend_from_slice(&61u16.to_be_bytes()); // major (Java 17)
        let cp_count = (utf8_entries.len() + 1) as u16;
        data.extend_from_slice(&cp_count.to_be_bytes());
        for entry in utf8_entries {
            data.push(1);
            data.extend_from_slice(&(entry.len() as u16).to_be_bytes());
            data.extend_from_slice(entry.as_bytes());
        }
        // Trailer bytes so the tail-copy path has something to preserve.
        data.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        data
    }

    /// Builds a minimal but structurally complete class file with a single
    /// static method named `getAllByName` with the target descriptor, a
    /// `Code` attribute containing `code_body`, and (if `with_exception`)
    /// one exception table entry covering the whole method. Good enough to
    /// exercise [`instrument`] end to end.
    fn synthetic_method_classfile(code_body: &[u8], with_exception: bool) -> Vec<u8> {
        // Constant pool, in order (1-based):
        // 1: Utf8 "getAllByName"
        // 2: Utf8 "(Ljava/lang/String;)[Ljava/net/InetAddress;"
        // 3: Utf8 "Code"
        let mut data = Vec::new();
        data.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes());
        data.extend_from_slice(&61u16.to_be_bytes());
        data.extend_from_slice(&4u16.to_be_bytes()); // cp_count = 4 (3 entries + 1)
        push_utf8(&mut data, TARGET_METHOD);
        push_utf8(&mut data, TARGET_DESCRIPTOR);
        push_utf8(&mut data, "Code");

        data.extend_from_slice(&0u16.to_be_bytes()); // access_flags
        data.extend_from_slice(&0u16.to_be_bytes()); // this_class
        data.extend_from_slice(&0u16.to_be_bytes()); // super_class
        data.extend_from_slice(&0u16.to_be_bytes()); // interfaces_count
        data.extend_from_slice(&0u16.to_be_bytes()); // fields_count

        data.extend_from_slice(&1u16.to_be_bytes()); // methods_count
        data.extend_from_slice(&0u16.to_be_bytes()); // access_flags
        data.extend_from_slice(&1u16.to_be_bytes()); // name_index -> "getAllByName"
        data.extend_from_slice(&2u16.to_be_bytes()); // descriptor_index
        data.extend_from_slice(&1u16.to_be_bytes()); // attributes_count

        // Code attribute.
        let exception_table: Vec<u8> = if with_exception {
            let mut t = Vec::new();
            t.extend_from_slice(&0u16.to_be_bytes()); // start_pc
            t.extend_from_slice(&(code_body.len() as u16).to_be_bytes()); // end_pc
            t.extend_from_slice(&0u16.to_be_bytes()); // handler_pc
            t.extend_from_slice(&0u16.to_be_bytes()); // catch_type (any)
            t
        } else {
            Vec::new()
        };
        let mut code_payload = Vec::new();
        code_payload.extend_from_slice(&2u16.to_be_bytes()); // max_stack
        code_payload.extend_from_slice(&1u16.to_be_bytes()); // max_locals
        code_payload.extend_from_slice(&(code_body.len() as u32).to_be_bytes());
        code_payload.extend_from_slice(code_body);
        code_payload.extend_from_slice(&(if with_exception { 1u16 } else { 0u16 }).to_be_bytes());
        code_payload.extend_from_slice(&exception_table);
        code_payload.extend_from_slice(&0u16.to_be_bytes()); // attributes_count

        data.extend_from_slice(&3u16.to_be_bytes()); // attribute_name_index -> "Code"
        data.extend_from_slice(&(code_payload.len() as u32).to_be_bytes());
        data.extend_from_slice(&code_payload);

        data.extend_from_slice(&0u16.to_be_bytes()); // class-level attributes_count
        data
    }

    #[test]
    fn target_class_matches_exactly() {
        assert!(is_target_class("java/net/InetAddress"));
        assert!(!is_target_class("java/net/Inet4Address"));
    }

    #[test]
    fn fresh_classfile_is_not_instrumented() {
        let data = synthetic_classfile(&["java/net/InetAddress", "getAllByName"]);
        assert!(!already_instrumented(&data).unwrap());
    }

    #[test]
    fn mentions_target_method_requires_both_name_and_descriptor() {
        let with_both = synthetic_classfile(&[TARGET_METHOD, TARGET_DESCRIPTOR]);
        assert!(mentions_target_method(&with_both).unwrap());

        let name_only = synthetic_classfile(&[TARGET_METHOD]);
        assert!(!mentions_target_method(&name_only).unwrap());
    }

    #[test]
    fn malformed_header_is_rejected() {
        assert!(parse_constant_pool(&[0, 1, 2]).is_err());
        assert!(already_instrumented(&[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 0, 0, 1]).is_err());
    }

    #[test]
    fn instrument_splices_invokestatic_and_is_detected_afterwards() {
        // areturn; a single-instruction method body.
        let code_body = [0xB0u8];
        let data = synthetic_method_classfile(&code_body, false);
        assert!(!already_instrumented(&data).unwrap());

        let patched = instrument(&data).unwrap();
        assert!(already_instrumented(&patched).unwrap());

        let cp = parse_constant_pool(&patched).unwrap();
        assert!(cp.utf8_by_index.iter().any(|s| s.as_deref() == Some(MANAGED_CLASS_BINARY_NAME)));
        assert!(cp.utf8_by_index.iter().any(|s| s.as_deref() == Some(CHECK_CONNECTION_METHOD)));
        assert!(cp.utf8_by_index.iter().any(|s| s.as_deref() == Some(MANAGED_API_TAG)));

        let code_attr = find_target_code_attribute(&patched, &cp).unwrap().unwrap();
        let parts = parse_code_attribute(&patched, &code_attr).unwrap();
        assert_eq!(parts.code.len(), code_body.len() + PREFIX_LEN as usize);
        assert_eq!(&parts.code[..3], &[0x2A, 0x02, 0x13]);
        assert_eq!(parts.code[5], 0xB8);
        // The original instruction survives, shifted after the prefix.
        assert_eq!(parts.code[PREFIX_LEN as usize..], code_body);
    }

    #[test]
    fn instrument_shifts_exception_table_offsets() {
        let code_body = [0x00u8, 0x00, 0xB0]; // nop; nop; areturn
        let data = synthetic_method_classfile(&code_body, true);
        let patched = instrument(&data).unwrap();

        let cp = parse_constant_pool(&patched).unwrap();
        let code_attr = find_target_code_attribute(&patched, &cp).unwrap().unwrap();
        let parts = parse_code_attribute(&patched, &code_attr).unwrap();
        assert_eq!(parts.exception_table_count, 1);
        let start_pc = u16::from_be_bytes([parts.exception_table[0], parts.exception_table[1]]);
        let end_pc = u16::from_be_bytes([parts.exception_table[2], parts.exception_table[3]]);
        assert_eq!(start_pc, PREFIX_LEN as u16);
        assert_eq!(end_pc, PREFIX_LEN as u16 + code_body.len() as u16);
    }

    #[test]
    fn instrument_twice_is_still_detected_as_instrumented_once_checked_first() {
        let code_body = [0xB0u8];
        let data = synthetic_method_classfile(&code_body, false);
        let once = instrument(&data).unwrap();
        assert!(already_instrumented(&once).unwrap());
        // A caller that skips the already_instrumented guard would splice
        // again; harmless (two calls into checkConnection) but wasteful —
        // exactly why the hook checks first.
        let twice = instrument(&once).unwrap();
        assert!(already_instrumented(&twice).unwrap());
    }

    #[test]
    fn instrument_errors_when_target_method_absent() {
        let data = synthetic_classfile(&["unrelated"]);
        assert!(instrument(&data).is_err());
    }
}
